//! Per-run shared context.
//!
//! One `SharedContext` is created per run and threaded through the stages in
//! order. Each stage reads its prerequisites from it and writes its own
//! results back; nothing else mutates it during a run.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use secrecy::SecretString;

use super::stages::TutorialOutput;
use crate::cache::CachedChapter;
use crate::constants::{crawl as crawl_constants, pipeline as pipeline_constants};
use crate::crawler::{CrawlRequest, CrawlStats};
use crate::types::{Abstraction, Chapter, RelationshipSummary, RunId, SourceFile};

pub struct SharedContext {
    pub run_id: RunId,

    // Inputs
    pub repo_url: String,
    /// Directory name when crawling a local checkout; used for the project name
    pub local_dir_name: Option<String>,
    pub project_name: Option<String>,
    pub language: String,
    pub token: Option<SecretString>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub max_file_size: u64,

    // FetchRepo
    pub files: Vec<SourceFile>,
    pub crawled_at: Option<DateTime<Utc>>,
    pub crawl_stats: CrawlStats,

    // IdentifyAbstractions
    pub abstractions: Vec<Abstraction>,

    // AnalyzeRelationships
    pub relationships: Option<RelationshipSummary>,

    // OrderChapters
    /// Abstraction indices in reading order
    pub chapter_order: Vec<usize>,
    /// Slug per position in `chapter_order`
    pub chapter_slugs: Vec<String>,

    // WriteChapters
    /// Chapters that may be reused verbatim, keyed by slug
    pub reusable: BTreeMap<String, CachedChapter>,
    pub chapters: Vec<Chapter>,
    pub chapters_reused: usize,

    // CombineTutorial
    pub output: Option<TutorialOutput>,
}

impl SharedContext {
    pub fn new(repo_url: impl Into<String>) -> Self {
        Self {
            run_id: RunId::generate(),
            repo_url: repo_url.into(),
            local_dir_name: None,
            project_name: None,
            language: pipeline_constants::DEFAULT_LANGUAGE.to_string(),
            token: None,
            include: Vec::new(),
            exclude: crawl_constants::DEFAULT_EXCLUDE
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_file_size: crawl_constants::DEFAULT_MAX_FILE_SIZE,
            files: Vec::new(),
            crawled_at: None,
            crawl_stats: CrawlStats::default(),
            abstractions: Vec::new(),
            relationships: None,
            chapter_order: Vec::new(),
            chapter_slugs: Vec::new(),
            reusable: BTreeMap::new(),
            chapters: Vec::new(),
            chapters_reused: 0,
            output: None,
        }
    }

    /// Context with files already supplied; FetchRepo will be skipped
    pub fn with_files(repo_url: impl Into<String>, files: Vec<SourceFile>) -> Self {
        let mut ctx = Self::new(repo_url);
        ctx.files = files;
        ctx.crawled_at = Some(Utc::now());
        ctx
    }

    pub fn crawl_request(&self) -> CrawlRequest {
        let mut request = CrawlRequest::new(self.repo_url.clone());
        request.token = self.token.clone();
        request.include = self.include.clone();
        request.exclude = self.exclude.clone();
        request.max_file_size = self.max_file_size;
        request
    }

    pub fn project_name(&self) -> &str {
        self.project_name.as_deref().unwrap_or("project")
    }

    /// Abstraction names in reading order
    pub fn ordered_names(&self) -> Vec<&str> {
        self.chapter_order
            .iter()
            .filter_map(|&i| self.abstractions.get(i).map(|a| a.name.as_str()))
            .collect()
    }

    /// Drop everything derived from abstraction identification onward
    pub fn reset_structure(&mut self) {
        self.abstractions.clear();
        self.relationships = None;
        self.chapter_order.clear();
        self.chapter_slugs.clear();
        self.chapters.clear();
        self.chapters_reused = 0;
        self.output = None;
    }
}

impl std::fmt::Debug for SharedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedContext")
            .field("run_id", &self.run_id)
            .field("repo_url", &self.repo_url)
            .field("project_name", &self.project_name)
            .field("language", &self.language)
            .field("files", &self.files.len())
            .field("abstractions", &self.abstractions.len())
            .field("chapter_order", &self.chapter_order)
            .field("reusable", &self.reusable.len())
            .field("chapters", &self.chapters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_crawl_request_carries_filters() {
        let mut ctx = SharedContext::new("acme/widgets");
        ctx.include = vec!["src/**".into()];
        ctx.token = Some(SecretString::from("ghp_x".to_string()));
        let request = ctx.crawl_request();
        assert_eq!(request.include, vec!["src/**".to_string()]);
        assert_eq!(
            request.token.as_ref().map(|t| t.expose_secret().to_string()),
            Some("ghp_x".to_string())
        );
        assert!(!request.exclude.is_empty());
    }

    #[test]
    fn test_ordered_names() {
        let mut ctx = SharedContext::new("acme/widgets");
        ctx.abstractions = ["A", "B", "C"]
            .iter()
            .map(|n| Abstraction {
                name: n.to_string(),
                description: String::new(),
                files: vec![],
            })
            .collect();
        ctx.chapter_order = vec![2, 0, 1];
        assert_eq!(ctx.ordered_names(), vec!["C", "A", "B"]);
    }
}
