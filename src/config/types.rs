//! Configuration Types
//!
//! All configuration structures with sensible defaults.
//! Supports global (~/.config/tutorgen/) and project (.tutorgen/) level configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::ai::ProviderConfig;
use crate::constants::{crawl, network, pipeline, retry};
use crate::pipeline::{GenerationSettings, StagePolicy};
use crate::types::{Result, TutorError};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration version
    pub version: String,

    /// Model provider settings
    pub llm: LlmConfig,

    /// Repository crawl settings
    pub crawl: CrawlConfig,

    /// Generation pipeline settings
    pub pipeline: PipelineConfig,

    /// Cache storage settings
    pub storage: StorageConfig,

    /// Tutorial output settings
    pub output: OutputConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            llm: LlmConfig::default(),
            crawl: CrawlConfig::default(),
            pipeline: PipelineConfig::default(),
            storage: StorageConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    /// Returns a config error on validation failure.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(TutorError::config(format!(
                "LLM temperature must be between 0.0 and 2.0, got {}",
                self.llm.temperature
            )));
        }

        if self.llm.timeout_secs == 0 {
            return Err(TutorError::config(
                "LLM timeout_secs must be greater than 0",
            ));
        }

        if self.llm.context_window == 0 {
            return Err(TutorError::config(
                "LLM context_window must be greater than 0",
            ));
        }

        if !(self.llm.context_usage_ratio > 0.0 && self.llm.context_usage_ratio <= 1.0) {
            return Err(TutorError::config(format!(
                "LLM context_usage_ratio must be in (0.0, 1.0], got {}",
                self.llm.context_usage_ratio
            )));
        }

        if self.pipeline.max_abstractions == 0 {
            return Err(TutorError::config(
                "Pipeline max_abstractions must be greater than 0",
            ));
        }

        if !(0.0..=1.0).contains(&self.pipeline.head_ratio) {
            return Err(TutorError::config(format!(
                "Pipeline head_ratio must be between 0.0 and 1.0, got {}",
                self.pipeline.head_ratio
            )));
        }

        if self.pipeline.max_attempts == 0 {
            return Err(TutorError::config(
                "Pipeline max_attempts must be at least 1",
            ));
        }

        if self.pipeline.stage_timeout_secs == 0 {
            return Err(TutorError::config(
                "Pipeline stage_timeout_secs must be greater than 0",
            ));
        }

        if self.pipeline.language.trim().is_empty() {
            return Err(TutorError::config("Pipeline language must not be empty"));
        }

        if self.storage.quota_bytes == Some(0) {
            return Err(TutorError::config(
                "Storage quota_bytes must be greater than 0 when set",
            ));
        }

        Ok(())
    }

    /// Provider settings for [`crate::ai::create_invoker`]
    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            provider: self.llm.provider.clone(),
            model: self.llm.model.clone(),
            timeout_secs: self.llm.timeout_secs,
            temperature: self.llm.temperature,
            api_key: self.llm.api_key.clone(),
            api_base: self.llm.api_base.clone(),
            max_tokens: self.llm.max_tokens,
            context_window: Some(self.llm.context_window),
        }
    }

    pub fn generation_settings(&self) -> GenerationSettings {
        GenerationSettings {
            context_window: self.llm.context_window,
            context_usage_ratio: self.llm.context_usage_ratio,
            max_abstractions: self.pipeline.max_abstractions,
            max_lines_per_file: self.pipeline.max_lines_per_file,
            head_ratio: self.pipeline.head_ratio,
        }
    }

    pub fn stage_policy(&self) -> StagePolicy {
        StagePolicy {
            max_attempts: self.pipeline.max_attempts,
            min_backoff: Duration::from_millis(self.pipeline.min_backoff_ms),
            max_backoff: Duration::from_secs(self.pipeline.max_backoff_secs),
            timeout: Duration::from_secs(self.pipeline.stage_timeout_secs),
        }
    }
}

// =============================================================================
// LLM Configuration
// =============================================================================

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name: "openai" or "ollama"
    pub provider: String,

    /// Model name (provider default when unset)
    pub model: Option<String>,

    /// Custom endpoint
    pub api_base: Option<String>,

    /// API key; prefer the provider's environment variable
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Sampling temperature
    pub temperature: f32,

    /// Maximum tokens per completion
    pub max_tokens: usize,

    /// Model context window in tokens
    pub context_window: usize,

    /// Share of the context window spent on file content
    pub context_usage_ratio: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        let provider = ProviderConfig::default();
        Self {
            provider: provider.provider,
            model: None,
            api_base: None,
            api_key: None,
            timeout_secs: network::DEFAULT_TIMEOUT_SECS,
            temperature: provider.temperature,
            max_tokens: provider.max_tokens,
            context_window: pipeline::DEFAULT_CONTEXT_WINDOW,
            context_usage_ratio: pipeline::DEFAULT_CONTEXT_USAGE_RATIO,
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_secs", &self.timeout_secs)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("context_window", &self.context_window)
            .field("context_usage_ratio", &self.context_usage_ratio)
            .finish()
    }
}

// =============================================================================
// Crawl Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Glob patterns to include (empty means everything)
    pub include: Vec<String>,

    /// Glob patterns to exclude
    pub exclude: Vec<String>,

    /// Maximum file size in bytes
    pub max_file_size: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: crawl::DEFAULT_EXCLUDE.iter().map(|s| s.to_string()).collect(),
            max_file_size: crawl::DEFAULT_MAX_FILE_SIZE,
        }
    }
}

// =============================================================================
// Pipeline Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Output language for generated prose
    pub language: String,

    /// Compare against the stored cache and reuse unchanged chapters
    pub use_cache: bool,

    pub max_abstractions: usize,

    /// Lines kept per file when rendering code snippets
    pub max_lines_per_file: usize,

    /// Share of a truncated file taken from the top
    pub head_ratio: f64,

    /// Model call attempts per stage, first try included
    pub max_attempts: usize,

    pub min_backoff_ms: u64,

    pub max_backoff_secs: u64,

    /// Deadline for a single model call
    pub stage_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            language: pipeline::DEFAULT_LANGUAGE.to_string(),
            use_cache: true,
            max_abstractions: pipeline::DEFAULT_MAX_ABSTRACTIONS,
            max_lines_per_file: pipeline::DEFAULT_MAX_LINES_PER_FILE,
            head_ratio: pipeline::DEFAULT_HEAD_RATIO,
            max_attempts: retry::DEFAULT_MAX_ATTEMPTS,
            min_backoff_ms: retry::MIN_BACKOFF_MS,
            max_backoff_secs: retry::MAX_BACKOFF_SECS,
            stage_timeout_secs: network::DEFAULT_TIMEOUT_SECS,
        }
    }
}

// =============================================================================
// Storage Configuration
// =============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    #[default]
    File,
    Sqlite,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Memory => write!(f, "memory"),
            StorageBackend::File => write!(f, "file"),
            StorageBackend::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "file" => Ok(StorageBackend::File),
            "sqlite" => Ok(StorageBackend::Sqlite),
            _ => Err(format!(
                "Unknown storage backend: {}. Valid values: memory, file, sqlite",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    /// Directory holding the cache (file records or the sqlite database)
    pub path: PathBuf,

    /// Byte quota for memory and file backends
    pub quota_bytes: Option<usize>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            path: super::ConfigLoader::global_cache_dir()
                .unwrap_or_else(|| super::ConfigLoader::project_dir().join("cache")),
            quota_bytes: None,
        }
    }
}

// =============================================================================
// Output Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Root directory; each tutorial lands in `<dir>/<project name>/`
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.llm.provider, "openai");
        assert_eq!(config.storage.backend, StorageBackend::File);
        assert!(config.pipeline.use_cache);
        config.validate().unwrap();
    }

    #[test]
    fn test_storage_backend_parse() {
        assert_eq!(StorageBackend::Sqlite.to_string(), "sqlite");
        assert_eq!(
            "MEMORY".parse::<StorageBackend>().unwrap(),
            StorageBackend::Memory
        );
        assert!("redis".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut config = Config::default();
        config.llm.temperature = 3.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.llm.context_usage_ratio = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.pipeline.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.storage.quota_bytes = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_conversions() {
        let mut config = Config::default();
        config.llm.model = Some("llama3".into());
        config.pipeline.max_attempts = 5;
        config.pipeline.stage_timeout_secs = 42;
        config.pipeline.max_abstractions = 7;

        assert_eq!(config.provider_config().model.as_deref(), Some("llama3"));
        let policy = config.stage_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.timeout, Duration::from_secs(42));
        assert_eq!(config.generation_settings().max_abstractions, 7);
    }

    #[test]
    fn test_api_key_never_serialized() {
        let mut config = Config::default();
        config.llm.api_key = Some("sk-secret".into());
        let rendered = toml::to_string_pretty(&config).unwrap();
        assert!(!rendered.contains("sk-secret"));
        assert!(!format!("{:?}", config).contains("sk-secret"));
    }
}
