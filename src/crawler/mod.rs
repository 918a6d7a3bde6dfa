//! Repository Crawler
//!
//! The crawler supplies `(path, content)` pairs for a repository reference.
//! The pipeline treats it as opaque I/O behind the [`Crawler`] trait.

mod local;

pub use local::LocalCrawler;

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::constants::crawl as crawl_constants;
use crate::types::{Result, SourceFile};

/// Shared crawler handle
pub type SharedCrawler = Arc<dyn Crawler>;

/// What to crawl and which files to keep
pub struct CrawlRequest {
    /// Repository reference (URL, `owner/name`, or local path)
    pub repo_url: String,
    /// Access token for private repositories
    pub token: Option<SecretString>,
    /// Glob patterns a path must match (any); empty keeps everything
    pub include: Vec<String>,
    /// Glob patterns that drop a path (any)
    pub exclude: Vec<String>,
    /// Files larger than this are skipped
    pub max_file_size: u64,
}

impl CrawlRequest {
    pub fn new(repo_url: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            token: None,
            include: Vec::new(),
            exclude: crawl_constants::DEFAULT_EXCLUDE
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_file_size: crawl_constants::DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl std::fmt::Debug for CrawlRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrawlRequest")
            .field("repo_url", &self.repo_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("include", &self.include)
            .field("exclude", &self.exclude)
            .field("max_file_size", &self.max_file_size)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub downloaded: usize,
    /// Too large, binary or unreadable
    pub skipped: usize,
    /// Filtered out by include/exclude patterns
    pub excluded: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CrawlResult {
    /// Files ordered by path
    pub files: Vec<SourceFile>,
    pub stats: CrawlStats,
}

#[async_trait]
pub trait Crawler: Send + Sync {
    async fn crawl(&self, request: &CrawlRequest) -> Result<CrawlResult>;

    /// Crawler name for logging
    fn name(&self) -> &str;
}
