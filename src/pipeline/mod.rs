//! Tutorial Generation Pipeline
//!
//! Six stages run strictly in order over one [`SharedContext`]:
//!
//! ```text
//! FetchRepo → IdentifyAbstractions → AnalyzeRelationships
//!     → OrderChapters → WriteChapters → CombineTutorial
//! ```
//!
//! A run may enter at any stage as long as the context already holds that
//! stage's prerequisites; the incremental driver uses this to skip work the
//! cache still covers.

pub mod context;
pub mod diagram;
pub mod files;
pub mod incremental;
pub mod naming;
pub mod parse;
pub mod progress;
pub mod prompts;
pub mod stage;
pub mod stages;

pub use context::SharedContext;
pub use incremental::{
    GenerationOutcome, GenerationRequest, IncrementalGenerator, PlanPreview, RunStats, preview_plan,
};
pub use naming::{assign_slugs, create_chapter_filename, slugify};
pub use progress::{ProgressCallback, ProgressEmitter, ProgressEvent};
pub use stage::{
    CancellationFlag, GenerationSettings, Stage, StageDeps, StageKind, StagePolicy, UsageMeter,
};
pub use stages::{OutputFile, TutorialOutput};

use std::time::Instant;

use tracing::{debug, info, instrument};

use crate::ai::SharedInvoker;
use crate::crawler::SharedCrawler;
use crate::types::{ErrorKind, Result};
use stages::{
    AnalyzeRelationships, CombineTutorial, FetchRepo, IdentifyAbstractions, OrderChapters,
    WriteChapters,
};

/// Stage runner with its collaborators
pub struct TutorialPipeline {
    deps: StageDeps,
    settings: GenerationSettings,
}

impl TutorialPipeline {
    pub fn new(invoker: SharedInvoker) -> Self {
        Self {
            deps: StageDeps::new(invoker),
            settings: GenerationSettings::default(),
        }
    }

    pub fn with_crawler(mut self, crawler: SharedCrawler) -> Self {
        self.deps.crawler = Some(crawler);
        self
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_policy(mut self, policy: StagePolicy) -> Self {
        self.deps.policy = policy;
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.deps.progress = ProgressEmitter::new(Some(callback));
        self
    }

    pub fn with_cancellation(mut self, flag: CancellationFlag) -> Self {
        self.deps.cancel = flag;
        self
    }

    pub fn deps(&self) -> &StageDeps {
        &self.deps
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    /// Run every stage
    pub async fn run(&self, ctx: &mut SharedContext) -> Result<()> {
        self.run_from(StageKind::FetchRepo, ctx).await
    }

    /// Run from `start` through CombineTutorial
    pub async fn run_from(&self, start: StageKind, ctx: &mut SharedContext) -> Result<()> {
        self.run_between(start, StageKind::CombineTutorial, ctx)
            .await
    }

    /// Run stages `start..=end` in order
    #[instrument(skip_all, fields(run = %ctx.run_id.short(), start = %start, end = %end))]
    pub async fn run_between(
        &self,
        start: StageKind,
        end: StageKind,
        ctx: &mut SharedContext,
    ) -> Result<()> {
        for kind in StageKind::ALL
            .into_iter()
            .filter(|k| *k >= start && *k <= end)
        {
            match kind {
                StageKind::FetchRepo if !ctx.files.is_empty() => {
                    debug!("Files supplied, skipping FetchRepo");
                }
                StageKind::FetchRepo => self.run_stage(&FetchRepo, ctx).await?,
                StageKind::IdentifyAbstractions => {
                    self.run_stage(&IdentifyAbstractions::new(self.settings.clone()), ctx)
                        .await?
                }
                StageKind::AnalyzeRelationships => {
                    self.run_stage(&AnalyzeRelationships::new(self.settings.clone()), ctx)
                        .await?
                }
                StageKind::OrderChapters => self.run_stage(&OrderChapters, ctx).await?,
                StageKind::WriteChapters => {
                    self.run_stage(&WriteChapters::new(self.settings.clone()), ctx)
                        .await?
                }
                StageKind::CombineTutorial => self.run_stage(&CombineTutorial, ctx).await?,
            }
        }
        Ok(())
    }

    async fn run_stage<S: Stage>(&self, stage: &S, ctx: &mut SharedContext) -> Result<()> {
        let kind = stage.kind();
        self.deps.cancel.check(kind.name())?;

        let started = Instant::now();
        info!(stage = %kind, "Stage started");

        let input = stage.prepare(ctx)?;
        let output = stage
            .execute(&input, &self.deps)
            .await
            .map_err(|e| match e.kind {
                ErrorKind::Validation { .. } => e.in_phase(kind.name(), None),
                _ => e,
            })?;
        stage.apply(ctx, output);

        info!(
            stage = %kind,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Stage finished"
        );
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn fast_policy() -> StagePolicy {
        StagePolicy {
            max_attempts: 2,
            min_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            timeout: Duration::from_secs(5),
        }
    }

    fn pipeline(invoker: Arc<ScriptedInvoker>) -> TutorialPipeline {
        TutorialPipeline::new(invoker)
            .with_crawler(Arc::new(StaticCrawler::new(sample_files())))
            .with_policy(fast_policy())
    }

    #[tokio::test]
    async fn test_full_run_produces_ordered_tutorial() {
        let invoker = Arc::new(ScriptedInvoker::standard());
        let mut ctx = SharedContext::new("https://github.com/acme/jobs");
        pipeline(invoker.clone()).run(&mut ctx).await.unwrap();

        assert_eq!(ctx.project_name.as_deref(), Some("jobs"));
        assert_eq!(ctx.chapter_order, vec![1, 0, 2]);
        assert_eq!(ctx.chapter_slugs, vec!["worker", "scheduler", "store"]);
        assert_eq!(invoker.calls(), 6);

        let output = ctx.output.as_ref().unwrap();
        assert_eq!(output.chapters[0].filename, "01_worker.md");
        assert!(output.chapters[0].content.starts_with("# Chapter 1: Worker\n\n"));
        assert!(output.index.contains("# Tutorial: jobs"));
        assert!(output.index.contains("A0 -- \"Dispatches\" --> A1"));
        assert!(output.index.contains("1. [Worker](01_worker.md)"));
        assert!(output.index.contains("https://github.com/acme/jobs"));
    }

    #[tokio::test]
    async fn test_chapters_see_prior_chapters() {
        let invoker = Arc::new(ScriptedInvoker::standard());
        let mut ctx = SharedContext::with_files("acme/jobs", sample_files());
        pipeline(invoker.clone()).run(&mut ctx).await.unwrap();

        let prompts = invoker.prompts.lock().unwrap();
        let third = prompts
            .iter()
            .find(|p| p.contains("You are writing Chapter 3"))
            .unwrap();
        assert!(third.contains("Fresh text about Worker."));
        assert!(third.contains("Fresh text about Scheduler."));
    }

    #[tokio::test]
    async fn test_invalid_order_is_generation_error() {
        let mut script = ScriptedInvoker::standard();
        script.order = yaml("- 0\n- 0\n- 2");
        let invoker = Arc::new(script);
        let mut ctx = SharedContext::with_files("acme/jobs", sample_files());

        let err = pipeline(invoker).run(&mut ctx).await.unwrap_err();
        match &err.kind {
            ErrorKind::Generation { phase, .. } => assert_eq!(phase, "OrderChapters"),
            other => panic!("unexpected kind {other:?}"),
        }
        assert!(err.detail.contains("index 0 appears more than once"));
        assert_eq!(err.extensions.field.as_deref(), Some("order"));
        // failing stage left the context untouched
        assert!(ctx.chapter_order.is_empty());
        assert!(ctx.relationships.is_some());
    }

    #[tokio::test]
    async fn test_entry_requires_prerequisites() {
        let invoker = Arc::new(ScriptedInvoker::standard());
        let mut ctx = SharedContext::with_files("acme/jobs", sample_files());
        let err = pipeline(invoker.clone())
            .run_from(StageKind::OrderChapters, &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Generation { .. }));
        assert_eq!(invoker.calls(), 0);
    }

    #[tokio::test]
    async fn test_reused_chapters_skip_model() {
        let invoker = Arc::new(ScriptedInvoker::standard());
        let p = pipeline(invoker.clone());
        let mut ctx = SharedContext::with_files("acme/jobs", sample_files());
        p.run_between(StageKind::IdentifyAbstractions, StageKind::OrderChapters, &mut ctx)
            .await
            .unwrap();

        ctx.reusable.insert(
            "scheduler".into(),
            crate::cache::CachedChapter {
                title: "Scheduler".into(),
                content: "# Chapter 2: Scheduler\n\nCached body.".into(),
                abstractions: vec!["Scheduler".into()],
                dependencies: vec![],
                generated_at: chrono::Utc::now(),
                prompt_hash: "abc".into(),
                number: 2,
                filename: "02_scheduler.md".into(),
            },
        );
        p.run_from(StageKind::WriteChapters, &mut ctx).await.unwrap();

        assert_eq!(invoker.chapter_calls(), vec!["Worker", "Store"]);
        assert_eq!(ctx.chapters_reused, 1);
        assert_eq!(ctx.chapters[1].prompt_hash, "abc");
        assert!(ctx.chapters[1].content.contains("Cached body."));
    }

    #[tokio::test]
    async fn test_chapter_failure_names_chapter_and_stops() {
        let mut script = ScriptedInvoker::standard();
        script.fail_chapter = Some(2);
        let invoker = Arc::new(script);
        let mut ctx = SharedContext::with_files("acme/jobs", sample_files());

        let err = pipeline(invoker.clone()).run(&mut ctx).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Auth);
        assert!(ctx.chapters.is_empty());
        // chapter 3 never attempted
        assert_eq!(invoker.chapter_calls(), vec!["Worker", "Scheduler"]);
    }

    #[tokio::test]
    async fn test_cancellation_before_stage() {
        let invoker = Arc::new(ScriptedInvoker::standard());
        let flag = CancellationFlag::new();
        flag.cancel();
        let mut ctx = SharedContext::with_files("acme/jobs", sample_files());
        let err = pipeline(invoker.clone())
            .with_cancellation(flag)
            .run(&mut ctx)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(invoker.calls(), 0);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_chapter_tagged() {
        let invoker = Arc::new(ScriptedInvoker::standard());
        let events: Arc<Mutex<Vec<ProgressEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let mut ctx = SharedContext::new("acme/jobs");
        pipeline(invoker)
            .with_progress(Arc::new(move |e: &ProgressEvent| {
                sink.lock().unwrap().push(e.clone())
            }))
            .run(&mut ctx)
            .await
            .unwrap();

        let events = events.lock().unwrap();
        assert!(events.windows(2).all(|w| w[0].progress <= w[1].progress));
        assert_eq!(events.last().unwrap().progress, 100);
        let chapter_events = events
            .iter()
            .filter(|e| e.stage == StageKind::WriteChapters)
            .count();
        assert_eq!(chapter_events, 6);
        assert!(
            events
                .iter()
                .any(|e| e.current_chapter == Some(3) && e.total_chapters == Some(3))
        );
    }

    #[tokio::test]
    async fn test_empty_crawl_fails() {
        let invoker = Arc::new(ScriptedInvoker::standard());
        let mut ctx = SharedContext::new("acme/empty");
        let err = TutorialPipeline::new(invoker)
            .with_crawler(Arc::new(StaticCrawler::new(vec![])))
            .run(&mut ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Crawler);
    }
}
