//! Stage Contract
//!
//! Each stage is split in three: `prepare` reads what it needs out of the
//! shared context, `execute` does the I/O (crawl or model call), `apply`
//! writes the result back. `apply` only runs after a successful `execute`,
//! so a failing stage never leaves a half-written context behind.
//!
//! Model calls go through [`StageDeps::call_model`], which owns the retry
//! loop and the per-attempt deadline. Parsing stays outside that loop: a reply
//! that fails validation is fatal for the stage.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use serde::Serialize;
use tracing::{debug, warn};

use super::context::SharedContext;
use super::progress::{ProgressEmitter, ProgressEvent};
use crate::ai::{Completion, SharedInvoker, with_timeout};
use crate::cache::CacheMetadata;
use crate::constants::{network as net_constants, pipeline as pipeline_constants, retry};
use crate::crawler::SharedCrawler;
use crate::types::{Result, TutorError};

// =============================================================================
// Stage Identity
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    FetchRepo,
    IdentifyAbstractions,
    AnalyzeRelationships,
    OrderChapters,
    WriteChapters,
    CombineTutorial,
}

impl StageKind {
    pub const ALL: [StageKind; 6] = [
        Self::FetchRepo,
        Self::IdentifyAbstractions,
        Self::AnalyzeRelationships,
        Self::OrderChapters,
        Self::WriteChapters,
        Self::CombineTutorial,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::FetchRepo => "FetchRepo",
            Self::IdentifyAbstractions => "IdentifyAbstractions",
            Self::AnalyzeRelationships => "AnalyzeRelationships",
            Self::OrderChapters => "OrderChapters",
            Self::WriteChapters => "WriteChapters",
            Self::CombineTutorial => "CombineTutorial",
        }
    }

    /// Share of overall progress owned by this stage, as `(start, end)`
    pub fn progress_span(&self) -> (u8, u8) {
        match self {
            Self::FetchRepo => (0, 10),
            Self::IdentifyAbstractions => (10, 25),
            Self::AnalyzeRelationships => (25, 40),
            Self::OrderChapters => (40, 50),
            Self::WriteChapters => (50, 95),
            Self::CombineTutorial => (95, 100),
        }
    }

    /// Progress at `done` of `total` units inside this stage
    pub fn progress_at(&self, done: usize, total: usize) -> u8 {
        let (start, end) = self.progress_span();
        if total == 0 {
            return end;
        }
        let span = (end - start) as usize;
        start + (span * done.min(total) / total) as u8
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Policy & Settings
// =============================================================================

/// Retry and deadline policy for one stage's model calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePolicy {
    /// Attempts including the first
    pub max_attempts: usize,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    /// Deadline for a single attempt
    pub timeout: Duration,
}

impl Default for StagePolicy {
    fn default() -> Self {
        Self {
            max_attempts: retry::DEFAULT_MAX_ATTEMPTS,
            min_backoff: Duration::from_millis(retry::MIN_BACKOFF_MS),
            max_backoff: Duration::from_secs(retry::MAX_BACKOFF_SECS),
            timeout: Duration::from_secs(net_constants::DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl StagePolicy {
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_backoff)
            .with_max_delay(self.max_backoff)
            .with_max_times(self.max_attempts.saturating_sub(1))
            .with_jitter()
    }
}

/// Knobs the generation stages read
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub context_window: usize,
    pub context_usage_ratio: f64,
    pub max_abstractions: usize,
    pub max_lines_per_file: usize,
    pub head_ratio: f64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            context_window: pipeline_constants::DEFAULT_CONTEXT_WINDOW,
            context_usage_ratio: pipeline_constants::DEFAULT_CONTEXT_USAGE_RATIO,
            max_abstractions: pipeline_constants::DEFAULT_MAX_ABSTRACTIONS,
            max_lines_per_file: pipeline_constants::DEFAULT_MAX_LINES_PER_FILE,
            head_ratio: pipeline_constants::DEFAULT_HEAD_RATIO,
        }
    }
}

// =============================================================================
// Cancellation
// =============================================================================

/// Cooperative cancellation, checked before each stage and each chapter
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self, at: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(TutorError::cancelled(format!("Run cancelled before {}", at)));
        }
        Ok(())
    }
}

// =============================================================================
// Usage Metering
// =============================================================================

/// Token and cost totals for one run
#[derive(Debug, Default)]
pub struct UsageMeter {
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    /// Cost in micro-dollars
    cost_micros: AtomicU64,
    calls: AtomicU32,
}

impl UsageMeter {
    pub fn record(&self, completion: &Completion) {
        self.input_tokens
            .fetch_add(completion.usage.input_tokens as u64, Ordering::Relaxed);
        self.output_tokens
            .fetch_add(completion.usage.output_tokens as u64, Ordering::Relaxed);
        self.cost_micros.fetch_add(
            (completion.cost_usd.max(0.0) * 1_000_000.0).round() as u64,
            Ordering::Relaxed,
        );
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Snapshot and reset to zero
    pub fn take(&self, provider: &str, model: &str) -> CacheMetadata {
        CacheMetadata {
            input_tokens: self.input_tokens.swap(0, Ordering::Relaxed),
            output_tokens: self.output_tokens.swap(0, Ordering::Relaxed),
            total_cost: self.cost_micros.swap(0, Ordering::Relaxed) as f64 / 1_000_000.0,
            provider: Some(provider.to_string()),
            model: Some(model.to_string()),
            generation_count: 0,
            model_calls: self.calls.swap(0, Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Dependencies
// =============================================================================

/// Everything a stage may touch besides the context
pub struct StageDeps {
    pub invoker: SharedInvoker,
    pub crawler: Option<SharedCrawler>,
    pub policy: StagePolicy,
    pub cancel: CancellationFlag,
    pub progress: ProgressEmitter,
    pub usage: UsageMeter,
}

impl StageDeps {
    pub fn new(invoker: SharedInvoker) -> Self {
        Self {
            invoker,
            crawler: None,
            policy: StagePolicy::default(),
            cancel: CancellationFlag::new(),
            progress: ProgressEmitter::silent(),
            usage: UsageMeter::default(),
        }
    }

    pub fn report(&self, event: ProgressEvent) {
        self.progress.emit(event);
    }

    /// One model completion with retries on retryable errors.
    ///
    /// The upstream's retry-after hint, when present, replaces the computed
    /// backoff (capped at `max_backoff`).
    pub async fn call_model(&self, stage: StageKind, prompt: &str) -> Result<Completion> {
        let policy = self.policy;
        let operation = format!("{} model call", stage.name());

        debug!(stage = %stage, prompt_chars = prompt.len(), "Calling model");

        let operation = operation.as_str();
        let completion = (|| async move {
            self.cancel.check(stage.name())?;
            with_timeout(policy.timeout, self.invoker.complete(prompt), operation).await
        })
        .retry(policy.backoff())
        .when(|e: &TutorError| e.is_retryable())
        .adjust(|e: &TutorError, computed: Option<Duration>| {
            computed.map(|d| {
                e.recommended_delay()
                    .map_or(d, |hint| hint.min(policy.max_backoff))
            })
        })
        .notify(|e: &TutorError, wait: Duration| {
            warn!(stage = %stage, wait_ms = wait.as_millis() as u64, "Retrying model call: {}", e);
        })
        .await?;

        self.usage.record(&completion);
        Ok(completion)
    }
}

// =============================================================================
// Stage Trait
// =============================================================================

#[async_trait]
pub trait Stage: Send + Sync {
    type Input: Send + Sync;
    type Output: Send;

    fn kind(&self) -> StageKind;

    /// Read inputs; fails when prerequisites are missing
    fn prepare(&self, ctx: &SharedContext) -> Result<Self::Input>;

    async fn execute(&self, input: &Self::Input, deps: &StageDeps) -> Result<Self::Output>;

    fn apply(&self, ctx: &mut SharedContext, output: Self::Output);
}

/// Missing-prerequisite error for `stage`
pub(crate) fn missing(stage: StageKind, what: &str) -> TutorError {
    TutorError::generation(
        stage.name(),
        None,
        format!("{} requires {} in the context", stage.name(), what),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{ModelInvoker, TokenUsage};
    use crate::types::ErrorKind;
    use std::sync::Mutex;

    struct FlakyInvoker {
        failures: Mutex<Vec<TutorError>>,
    }

    #[async_trait]
    impl ModelInvoker for FlakyInvoker {
        async fn complete(&self, _prompt: &str) -> Result<Completion> {
            if let Some(err) = self.failures.lock().unwrap().pop() {
                return Err(err);
            }
            let mut completion = Completion::text_only("ok");
            completion.usage = TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
            };
            Ok(completion)
        }

        fn name(&self) -> &str {
            "flaky"
        }

        fn model(&self) -> &str {
            "test"
        }
    }

    fn deps(failures: Vec<TutorError>) -> StageDeps {
        let mut deps = StageDeps::new(Arc::new(FlakyInvoker {
            failures: Mutex::new(failures),
        }));
        deps.policy = StagePolicy {
            max_attempts: 3,
            min_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            timeout: Duration::from_secs(5),
        };
        deps
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let deps = deps(vec![
            TutorError::network("reset"),
            TutorError::rate_limit("slow down"),
        ]);
        let completion = deps
            .call_model(StageKind::IdentifyAbstractions, "p")
            .await
            .unwrap();
        assert_eq!(completion.text, "ok");
        assert_eq!(deps.usage.calls(), 1);
    }

    #[tokio::test]
    async fn test_auth_error_not_retried() {
        let deps = deps(vec![TutorError::auth("bad key")]);
        let err = deps
            .call_model(StageKind::OrderChapters, "p")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Auth);
    }

    #[tokio::test]
    async fn test_attempts_exhausted() {
        let deps = deps(vec![
            TutorError::network("1"),
            TutorError::network("2"),
            TutorError::network("3"),
        ]);
        let err = deps
            .call_model(StageKind::WriteChapters, "p")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Network);
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let deps = deps(vec![]);
        deps.cancel.cancel();
        let err = deps
            .call_model(StageKind::WriteChapters, "p")
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_usage_take_resets() {
        let meter = UsageMeter::default();
        let mut completion = Completion::text_only("x");
        completion.usage = TokenUsage {
            input_tokens: 100,
            output_tokens: 20,
        };
        completion.cost_usd = 0.0025;
        meter.record(&completion);
        meter.record(&completion);
        let meta = meter.take("openai", "gpt");
        assert_eq!(meta.input_tokens, 200);
        assert_eq!(meta.output_tokens, 40);
        assert_eq!(meta.model_calls, 2);
        assert_eq!(meta.provider.as_deref(), Some("openai"));
        assert!((meta.total_cost - 0.005).abs() < 1e-9);

        assert_eq!(meter.calls(), 0);
        assert_eq!(meter.take("openai", "gpt").input_tokens, 0);
    }

    #[test]
    fn test_progress_at() {
        assert_eq!(StageKind::WriteChapters.progress_at(0, 9), 50);
        assert_eq!(StageKind::WriteChapters.progress_at(9, 9), 95);
        assert_eq!(StageKind::CombineTutorial.progress_at(0, 0), 100);
    }
}
