//! CLI Common Utilities
//!
//! Shared initialization and context management for CLI commands.

use std::path::{Path, PathBuf};

use crate::cache::CacheManager;
use crate::config::{Config, ConfigLoader};
use crate::pipeline::GenerationRequest;
use crate::storage::create_storage;
use crate::types::{Result, TutorError};

/// Command execution context
///
/// Loaded configuration plus a cache manager over the configured backend.
pub struct CommandContext {
    pub config: Config,
    pub cache: CacheManager,
}

impl CommandContext {
    /// Load config from every source and open storage
    pub fn load() -> Result<Self> {
        Self::from_config(ConfigLoader::load()?)
    }

    pub fn from_config(config: Config) -> Result<Self> {
        config.validate()?;
        let storage = create_storage(&config.storage)?;
        Ok(Self {
            config,
            cache: CacheManager::new(storage),
        })
    }

    /// Request with crawl and pipeline defaults taken from config
    pub fn request(&self, target: &Target) -> GenerationRequest {
        let mut request = GenerationRequest::new(target.repo_url.clone());
        request.local_dir_name = target.dir_name.clone();
        request.language = self.config.pipeline.language.clone();
        request.use_cache = self.config.pipeline.use_cache;
        request.include = self.config.crawl.include.clone();
        request.exclude = self.config.crawl.exclude.clone();
        request.max_file_size = self.config.crawl.max_file_size;
        request
    }
}

/// What to crawl and which identity to cache it under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Cache identity and source link
    pub repo_url: String,
    /// Local checkout to crawl
    pub dir: PathBuf,
    pub dir_name: Option<String>,
}

/// Resolve `--repo` / `--dir` into a crawl target.
///
/// Only local checkouts are crawled. A repository URL alone is rejected; with
/// a directory it names the cache entry and the source link.
pub fn resolve_target(repo: Option<&str>, dir: Option<&Path>) -> Result<Target> {
    let Some(dir) = dir else {
        return Err(match repo {
            Some(url) => TutorError::config(format!(
                "Remote crawling is not supported for {}",
                url
            ))
            .with_remediation("Clone the repository and pass its path with --dir"),
            None => TutorError::config("Nothing to generate from")
                .with_remediation("Pass --dir <PATH>, optionally with --repo <URL>"),
        });
    };

    if !dir.is_dir() {
        return Err(TutorError::not_found(format!(
            "Directory not found: {}",
            dir.display()
        )));
    }

    let canonical = dir.canonicalize()?;
    let dir_name = canonical
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string);
    let repo_url = match repo {
        Some(url) if !url.trim().is_empty() => url.trim().to_string(),
        _ => canonical.to_string_lossy().into_owned(),
    };

    Ok(Target {
        repo_url,
        dir: canonical,
        dir_name,
    })
}
