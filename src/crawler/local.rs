use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ignore::WalkBuilder;
use tracing::{debug, info};

use super::{CrawlRequest, CrawlResult, CrawlStats, Crawler};
use crate::types::{Result, SourceFile, TutorError};

/// Crawls a checked-out repository on the local filesystem.
///
/// Honors `.gitignore`, never follows symlinks, and matches include/exclude
/// globs against the `/`-separated path relative to the root.
pub struct LocalCrawler {
    root: PathBuf,
}

impl LocalCrawler {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

struct PathFilter {
    include: Vec<glob::Pattern>,
    exclude: Vec<glob::Pattern>,
}

impl PathFilter {
    fn new(request: &CrawlRequest) -> Result<Self> {
        Ok(Self {
            include: compile(&request.include)?,
            exclude: compile(&request.exclude)?,
        })
    }

    fn keeps(&self, relative: &str) -> bool {
        if self.exclude.iter().any(|p| p.matches(relative)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|p| p.matches(relative))
    }
}

fn compile(patterns: &[String]) -> Result<Vec<glob::Pattern>> {
    patterns
        .iter()
        .map(|p| {
            glob::Pattern::new(p)
                .map_err(|e| TutorError::validation("pattern", format!("Invalid glob '{}': {}", p, e)))
        })
        .collect()
}

fn scan(root: &Path, filter: &PathFilter, max_file_size: u64) -> CrawlResult {
    let mut result = CrawlResult::default();

    let walker = WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true)
        .follow_links(false)
        .build();

    for entry in walker.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(relative) = path
            .strip_prefix(root)
            .ok()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
        else {
            continue;
        };

        if !filter.keeps(&relative) {
            result.stats.excluded += 1;
            continue;
        }

        let too_large = path
            .metadata()
            .map(|m| m.len() > max_file_size)
            .unwrap_or(true);
        if too_large {
            result.stats.skipped += 1;
            continue;
        }

        // Binary and non-UTF-8 files are skipped
        match std::fs::read_to_string(path) {
            Ok(content) if !content.contains('\0') => {
                result.files.push(SourceFile::new(relative, content));
                result.stats.downloaded += 1;
            }
            _ => result.stats.skipped += 1,
        }
    }

    result.files.sort_by(|a, b| a.path.cmp(&b.path));
    result
}

#[async_trait]
impl Crawler for LocalCrawler {
    async fn crawl(&self, request: &CrawlRequest) -> Result<CrawlResult> {
        if !self.root.is_dir() {
            return Err(TutorError::not_found(format!(
                "Repository directory not found: {}",
                self.root.display()
            )));
        }

        let filter = PathFilter::new(request)?;
        let root = self.root.clone();
        let max_file_size = request.max_file_size;

        debug!("Crawling {} for '{}'", root.display(), request.repo_url);
        let result = tokio::task::spawn_blocking(move || scan(&root, &filter, max_file_size))
            .await
            .map_err(|e| TutorError::crawler(format!("Crawl task failed: {}", e)))?;

        info!(
            "Crawled {} files ({} skipped, {} excluded)",
            result.stats.downloaded, result.stats.skipped, result.stats.excluded
        );
        Ok(result)
    }

    fn name(&self) -> &str {
        "local"
    }
}
