//! Incremental driver: crawl, compare with the cache, run only what changed.
//!
//! Every run crawls first because the change analysis needs fresh content.
//! The regeneration plan then picks the pipeline entry stage and the set of
//! cached chapters that may be folded in verbatim.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{Duration, Instant};

use chrono::Utc;
use secrecy::SecretString;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::TutorialPipeline;
use super::context::SharedContext;
use super::stage::StageKind;
use super::stages::{TutorialOutput, set_order};
use crate::cache::{
    CacheManager, CacheMetadata, FileChangeAnalysis, GenerationSnapshot, RegenerationMode,
    RegenerationPlan, RepoCache, analyze_file_changes, determine_regeneration_plan,
    find_affected_chapters, fingerprint_files, normalize_repo_url,
};
use crate::constants::{crawl as crawl_constants, pipeline as pipeline_constants};
use crate::crawler::Crawler;
use crate::types::{Chapter, Relationship, RelationshipSummary, Result, RunId, TutorError};

/// What to generate and how
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub repo_url: String,
    pub local_dir_name: Option<String>,
    pub project_name: Option<String>,
    pub language: String,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub max_file_size: u64,
    pub token: Option<SecretString>,
    /// Consult and compare against the stored cache
    pub use_cache: bool,
}

impl GenerationRequest {
    pub fn new(repo_url: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            local_dir_name: None,
            project_name: None,
            language: pipeline_constants::DEFAULT_LANGUAGE.to_string(),
            include: Vec::new(),
            exclude: crawl_constants::DEFAULT_EXCLUDE
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_file_size: crawl_constants::DEFAULT_MAX_FILE_SIZE,
            token: None,
            use_cache: true,
        }
    }

    pub fn into_context(self) -> SharedContext {
        let mut ctx = SharedContext::new(self.repo_url);
        ctx.local_dir_name = self.local_dir_name;
        ctx.project_name = self.project_name;
        ctx.language = self.language;
        ctx.include = self.include;
        ctx.exclude = self.exclude;
        ctx.max_file_size = self.max_file_size;
        ctx.token = self.token;
        ctx
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub model_calls: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub chapters_written: usize,
    pub chapters_reused: usize,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub run_id: RunId,
    pub plan: RegenerationPlan,
    pub analysis: FileChangeAnalysis,
    pub output: TutorialOutput,
    pub stats: RunStats,
}

/// Change analysis and plan without any model calls
#[derive(Debug, Clone, Serialize)]
pub struct PlanPreview {
    pub repo_id: String,
    pub cached: bool,
    pub plan: RegenerationPlan,
    pub analysis: FileChangeAnalysis,
}

/// How much of the cached structure survived re-resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Restored {
    /// Abstractions, relationships and order
    Structure,
    AbstractionsOnly,
    Nothing,
}

pub struct IncrementalGenerator {
    cache: CacheManager,
    pipeline: TutorialPipeline,
}

impl IncrementalGenerator {
    pub fn new(cache: CacheManager, pipeline: TutorialPipeline) -> Self {
        Self { cache, pipeline }
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn pipeline(&self) -> &TutorialPipeline {
        &self.pipeline
    }

    /// Crawl and plan, leaving the cache and the model untouched
    pub async fn plan_only(&self, request: GenerationRequest) -> Result<PlanPreview> {
        let crawler = self
            .pipeline
            .deps()
            .crawler
            .clone()
            .ok_or_else(|| TutorError::config("No crawler configured"))?;
        preview_plan(&self.cache, crawler.as_ref(), request).await
    }

    /// Generate a tutorial, reusing whatever the cache still covers
    #[instrument(skip_all, fields(repo = %request.repo_url, use_cache = request.use_cache))]
    pub async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutcome> {
        let started = Instant::now();
        let use_cache = request.use_cache;
        let deps = self.pipeline.deps();
        let provider = deps.invoker.name().to_string();
        let model = deps.invoker.model().to_string();
        deps.usage.take(&provider, &model);
        deps.progress.reset();

        let mut ctx = request.into_context();
        self.pipeline
            .run_between(StageKind::FetchRepo, StageKind::FetchRepo, &mut ctx)
            .await?;
        let crawled_at = ctx.crawled_at.unwrap_or_else(Utc::now);
        let fingerprints = fingerprint_files(&ctx.files, crawled_at);

        let cache = if use_cache {
            self.cache.load_repo_cache(&ctx.repo_url).await
        } else {
            None
        };

        let (mut plan, analysis) = match &cache {
            Some(cache) => {
                let analysis = analyze_file_changes(&cache.files, &fingerprints);
                let plan = match cache.language.as_deref() {
                    Some(previous) if !previous.eq_ignore_ascii_case(&ctx.language) => {
                        RegenerationPlan::fresh(format!(
                            "Output language changed from {} to {}",
                            previous, ctx.language
                        ))
                    }
                    _ => determine_regeneration_plan(cache, &analysis),
                };
                (plan, analysis)
            }
            None => (
                RegenerationPlan::fresh(if use_cache {
                    "No cache found for this repository"
                } else {
                    "Cache disabled for this run"
                }),
                analyze_file_changes(&[], &fingerprints),
            ),
        };
        info!(mode = %plan.mode, "{}", plan.reason);

        match (&cache, plan.mode) {
            (Some(cache), RegenerationMode::Skip | RegenerationMode::Partial) => {
                self.run_restored(cache, &mut ctx, &mut plan).await?;
            }
            (Some(cache), RegenerationMode::PartialReidentify) => {
                self.run_reidentified(cache, &analysis, &mut ctx, &mut plan)
                    .await?;
            }
            _ => {
                self.pipeline
                    .run_from(StageKind::IdentifyAbstractions, &mut ctx)
                    .await?;
            }
        }

        let run_usage = deps.usage.take(&provider, &model);
        let mut metadata = cache
            .as_ref()
            .map(|c| c.metadata.clone())
            .unwrap_or_default();
        metadata.absorb(&run_usage);
        metadata.generation_count += 1;

        let relationships = ctx.relationships.clone().ok_or_else(|| {
            TutorError::generation("CombineTutorial", None, "Run ended without relationships")
        })?;
        let record = RepoCache::from_generation(GenerationSnapshot {
            repo_url: &ctx.repo_url,
            project_name: ctx.project_name(),
            language: &ctx.language,
            files: &ctx.files,
            crawled_at,
            abstractions: &ctx.abstractions,
            relationships: &relationships,
            chapters: &ctx.chapters,
            metadata,
        });
        self.cache.save_repo_cache(&record).await?;

        let output = ctx.output.take().ok_or_else(|| {
            TutorError::generation("CombineTutorial", None, "Run ended without output")
        })?;
        let stats = RunStats {
            model_calls: run_usage.model_calls,
            input_tokens: run_usage.input_tokens,
            output_tokens: run_usage.output_tokens,
            chapters_written: ctx.chapters.len() - ctx.chapters_reused,
            chapters_reused: ctx.chapters_reused,
            duration: started.elapsed(),
        };
        info!(
            calls = stats.model_calls,
            written = stats.chapters_written,
            reused = stats.chapters_reused,
            "Generation finished"
        );

        Ok(GenerationOutcome {
            run_id: ctx.run_id.clone(),
            plan,
            analysis,
            output,
            stats,
        })
    }

    /// Skip and partial plans: resume from cached structure
    async fn run_restored(
        &self,
        cache: &RepoCache,
        ctx: &mut SharedContext,
        plan: &mut RegenerationPlan,
    ) -> Result<()> {
        match restore(cache, ctx) {
            Restored::Structure => {
                let regenerate: BTreeSet<String> =
                    plan.chapters_to_regenerate.iter().cloned().collect();
                let written = collect_reusable(cache, ctx, &regenerate);
                if plan.mode == RegenerationMode::Skip && !written.is_empty() {
                    plan.mode = RegenerationMode::Partial;
                    plan.reason = format!(
                        "No file changes, but {} cached chapters are missing",
                        written.len()
                    );
                }
                record_reuse(plan, written, ctx.chapter_slugs.len());
                self.pipeline
                    .run_from(StageKind::WriteChapters, ctx)
                    .await
            }
            Restored::AbstractionsOnly => {
                debug!("Cache lacks relationships or order; re-deriving them");
                self.pipeline
                    .run_between(
                        StageKind::AnalyzeRelationships,
                        StageKind::OrderChapters,
                        ctx,
                    )
                    .await?;
                let regenerate: BTreeSet<String> =
                    plan.chapters_to_regenerate.iter().cloned().collect();
                let written = collect_reusable(cache, ctx, &regenerate);
                record_reuse(plan, written, ctx.chapter_slugs.len());
                plan.mode = RegenerationMode::Partial;
                self.pipeline
                    .run_from(StageKind::WriteChapters, ctx)
                    .await
            }
            Restored::Nothing => {
                *plan = RegenerationPlan::fresh(format!(
                    "{}; cached structure unusable, regenerating everything",
                    plan.reason
                ));
                self.pipeline
                    .run_from(StageKind::IdentifyAbstractions, ctx)
                    .await
            }
        }
    }

    /// Re-identify, then regenerate only chapters the change reaches
    async fn run_reidentified(
        &self,
        cache: &RepoCache,
        analysis: &FileChangeAnalysis,
        ctx: &mut SharedContext,
        plan: &mut RegenerationPlan,
    ) -> Result<()> {
        self.pipeline
            .run_between(
                StageKind::IdentifyAbstractions,
                StageKind::OrderChapters,
                ctx,
            )
            .await?;

        let affected: BTreeSet<String> = match &ctx.relationships {
            Some(relationships) => {
                let now = Utc::now();
                let stubs: Vec<Chapter> = ctx
                    .chapter_order
                    .iter()
                    .zip(&ctx.chapter_slugs)
                    .enumerate()
                    .filter_map(|(position, (&index, slug))| {
                        let abstraction = ctx.abstractions.get(index)?;
                        Some(Chapter {
                            number: position + 1,
                            abstraction_index: index,
                            title: abstraction.name.clone(),
                            slug: slug.clone(),
                            filename: String::new(),
                            content: String::new(),
                            generated_at: now,
                            prompt_hash: String::new(),
                        })
                    })
                    .collect();
                let provisional = RepoCache::from_generation(GenerationSnapshot {
                    repo_url: &ctx.repo_url,
                    project_name: ctx.project_name(),
                    language: &ctx.language,
                    files: &ctx.files,
                    crawled_at: now,
                    abstractions: &ctx.abstractions,
                    relationships,
                    chapters: &stubs,
                    metadata: CacheMetadata::default(),
                });
                find_affected_chapters(&provisional, &analysis.changed_paths())
                    .into_iter()
                    .collect()
            }
            None => ctx.chapter_slugs.iter().cloned().collect(),
        };

        let written = collect_reusable(cache, ctx, &affected);
        record_reuse(plan, written, ctx.chapter_slugs.len());
        info!(
            "Re-identified abstractions; regenerating {} of {} chapters",
            plan.chapters_to_regenerate.len(),
            ctx.chapter_slugs.len()
        );

        self.pipeline
            .run_from(StageKind::WriteChapters, ctx)
            .await
    }
}

/// Crawl and compare against the stored cache without touching the model or
/// the index
pub async fn preview_plan(
    cache: &CacheManager,
    crawler: &dyn Crawler,
    request: GenerationRequest,
) -> Result<PlanPreview> {
    let ctx = request.into_context();
    let crawled = crawler.crawl(&ctx.crawl_request()).await?;
    let fingerprints = fingerprint_files(&crawled.files, Utc::now());
    let repo_id = normalize_repo_url(&ctx.repo_url);

    Ok(match cache.peek_repo_cache(&ctx.repo_url).await {
        Some(cached) => {
            let analysis = analyze_file_changes(&cached.files, &fingerprints);
            let plan = determine_regeneration_plan(&cached, &analysis);
            PlanPreview {
                repo_id,
                cached: true,
                plan,
                analysis,
            }
        }
        None => PlanPreview {
            repo_id,
            cached: false,
            plan: RegenerationPlan::fresh("No cache found for this repository"),
            analysis: analyze_file_changes(&[], &fingerprints),
        },
    })
}

/// Rebuild abstractions, relationships and order from a cache record
fn restore(cache: &RepoCache, ctx: &mut SharedContext) -> Restored {
    ctx.reset_structure();
    if cache.abstractions.is_empty() {
        return Restored::Nothing;
    }
    ctx.abstractions = cache
        .abstractions
        .iter()
        .map(|a| a.to_abstraction(&ctx.files))
        .collect();

    let index_of: HashMap<&str, usize> = ctx
        .abstractions
        .iter()
        .enumerate()
        .map(|(i, a)| (a.name.as_str(), i))
        .collect();

    if cache.summary.is_empty() && cache.relationships.is_empty() {
        return Restored::AbstractionsOnly;
    }
    let details = cache
        .relationships
        .iter()
        .filter_map(|r| {
            Some(Relationship {
                from: *index_of.get(r.from.as_str())?,
                to: *index_of.get(r.to.as_str())?,
                label: r.label.clone(),
            })
        })
        .collect();
    ctx.relationships = Some(RelationshipSummary {
        summary: cache.summary.clone(),
        details,
    });

    if !cache.has_structure() {
        return Restored::AbstractionsOnly;
    }
    let order: Option<Vec<usize>> = cache
        .chapter_order
        .iter()
        .map(|slug| {
            let name = cache.chapters.get(slug)?.abstractions.first()?;
            index_of.get(name.as_str()).copied()
        })
        .collect();
    let Some(order) = order.filter(|o| is_permutation(o, ctx.abstractions.len())) else {
        warn!("Cached chapter order no longer matches its abstractions");
        return Restored::AbstractionsOnly;
    };
    set_order(ctx, order);
    Restored::Structure
}

fn is_permutation(order: &[usize], n: usize) -> bool {
    let mut seen = vec![false; n];
    order.len() == n
        && order.iter().all(|&i| match seen.get_mut(i) {
            Some(slot) if !*slot => {
                *slot = true;
                true
            }
            _ => false,
        })
}

/// Fill `ctx.reusable` with cached chapters outside `regenerate` that still sit
/// at the same position under the same abstraction. Returns the sorted slugs
/// that will be written.
fn collect_reusable(
    cache: &RepoCache,
    ctx: &mut SharedContext,
    regenerate: &BTreeSet<String>,
) -> Vec<String> {
    let mut reusable = BTreeMap::new();
    let mut written = BTreeSet::new();

    for (position, (&index, slug)) in ctx.chapter_order.iter().zip(&ctx.chapter_slugs).enumerate() {
        let name = ctx.abstractions.get(index).map(|a| a.name.as_str());
        let cached = cache.chapters.get(slug).filter(|c| {
            !regenerate.contains(slug)
                && c.number == position + 1
                && c.abstractions.first().map(String::as_str) == name
        });
        match cached {
            Some(chapter) => {
                reusable.insert(slug.clone(), chapter.clone());
            }
            None => {
                written.insert(slug.clone());
            }
        }
    }

    debug!(
        reusable = reusable.len(),
        written = written.len(),
        "Selected cached chapters"
    );
    ctx.reusable = reusable;
    written.into_iter().collect()
}

/// Replace the plan's chapter list with what will actually be written and
/// derive the savings from it
fn record_reuse(plan: &mut RegenerationPlan, written: Vec<String>, total: usize) {
    let total = total.max(1);
    plan.estimated_savings = 100.0 - 100.0 * written.len() as f64 / total as f64;
    plan.chapters_to_regenerate = written;
}
