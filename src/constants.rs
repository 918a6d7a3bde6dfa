//! Global Constants
//!
//! Centralized constants for configuration and tuning.
//! All magic numbers should be defined here with documentation.

/// Cache engine constants
pub mod cache {
    /// Storage key holding the repository index
    pub const INDEX_KEY: &str = "repo_index";

    /// Prefix shared by every per-repository cache record
    pub const CACHE_KEY_PREFIX: &str = "repo_cache_";

    /// Schema version written into fresh indexes
    pub const INDEX_VERSION: u32 = 1;

    /// Host prefix stripped during repository normalization
    pub const DEFAULT_HOST_PREFIX: &str = "github.com/";

    /// Width of the fast content hash in hex digits
    pub const FAST_HASH_WIDTH: usize = 8;

    /// Length of the truncated SHA-256 fingerprint in hex digits
    pub const SECURE_HASH_WIDTH: usize = 16;

    /// Hex digits of the repository id digest appended to cache keys
    pub const KEY_DIGEST_WIDTH: usize = 12;

    /// Fields inspected, in order, when ranking entries for eviction
    pub const TIMESTAMP_FIELDS: &[&str] = &["lastAccessed", "lastCrawlTime", "timestamp", "updatedAt"];
}

/// Regeneration planning thresholds
pub mod plan {
    /// Below this percentage of changed files, only affected chapters are rewritten
    pub const PARTIAL_THRESHOLD_PCT: f64 = 30.0;

    /// Below this percentage, abstractions are re-identified but chapters may be reused
    pub const REIDENTIFY_THRESHOLD_PCT: f64 = 60.0;

    /// Fixed savings estimate reported for re-identification runs
    pub const REIDENTIFY_SAVINGS_PCT: f64 = 30.0;
}

/// Pipeline constants
pub mod pipeline {
    /// Characters per token used when converting token budgets to character budgets
    pub const CHARS_PER_TOKEN: usize = 4;

    /// Default model context window (tokens)
    pub const DEFAULT_CONTEXT_WINDOW: usize = 128_000;

    /// Share of the context window spent on file content
    pub const DEFAULT_CONTEXT_USAGE_RATIO: f64 = 0.5;

    /// Default upper bound on identified abstractions
    pub const DEFAULT_MAX_ABSTRACTIONS: usize = 10;

    /// Default maximum lines rendered per file in relationship context
    pub const DEFAULT_MAX_LINES_PER_FILE: usize = 300;

    /// Share of truncated files taken from the top (remainder from the bottom)
    pub const DEFAULT_HEAD_RATIO: f64 = 0.8;

    /// Maximum slug length in chapter filenames (before the extension)
    pub const MAX_SLUG_LEN: usize = 50;

    /// Maximum length of a diagram edge label
    pub const MAX_EDGE_LABEL_LEN: usize = 30;

    /// Footer appended to every generated chapter
    pub const ATTRIBUTION_FOOTER: &str = "Generated by tutorgen";

    /// Default output language
    pub const DEFAULT_LANGUAGE: &str = "english";
}

/// Retry constants
pub mod retry {
    /// Default model call attempts per stage (first try included)
    pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

    /// Base delay for exponential backoff (milliseconds)
    pub const MIN_BACKOFF_MS: u64 = 500;

    /// Maximum delay between retries (seconds)
    pub const MAX_BACKOFF_SECS: u64 = 30;
}

/// Crawl constants
pub mod crawl {
    /// Default maximum file size in bytes (100KB)
    pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024;

    /// Default exclude patterns
    pub const DEFAULT_EXCLUDE: &[&str] = &[
        "**/node_modules/**",
        "**/target/**",
        "**/.git/**",
        "**/dist/**",
        "**/build/**",
        "**/vendor/**",
        "**/__pycache__/**",
        "**/.venv/**",
        "**/*.lock",
        "**/*.min.js",
    ];
}

/// HTTP/Network constants
pub mod network {
    /// Default request timeout (seconds)
    pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

    /// Default rate-limit wait when the upstream gives no hint (seconds)
    pub const DEFAULT_RATE_LIMIT_WAIT_SECS: u64 = 30;
}
