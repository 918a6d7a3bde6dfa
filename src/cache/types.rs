//! Persisted cache records.
//!
//! Field names are camelCase on the wire. Everything added after the first
//! release is `#[serde(default)]` so older records keep loading.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::hash::compute_content_hash;
use super::identity::{normalize_repo_url, project_name_from_repo, repo_cache_key};
use crate::constants::cache as cache_constants;
use crate::types::{Abstraction, Chapter, RelationshipSummary, SourceFile};

/// Fingerprint of one crawled file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedFile {
    pub path: String,
    pub hash: String,
    pub last_modified: DateTime<Utc>,
}

impl CachedFile {
    pub fn from_source(file: &SourceFile, seen_at: DateTime<Utc>) -> Self {
        Self {
            path: file.path.clone(),
            hash: compute_content_hash(&file.content),
            last_modified: seen_at,
        }
    }
}

/// Fingerprint a whole crawl with the fast hash
pub fn fingerprint_files(files: &[SourceFile], seen_at: DateTime<Utc>) -> Vec<CachedFile> {
    files
        .iter()
        .map(|f| CachedFile::from_source(f, seen_at))
        .collect()
}

/// Abstraction with owning files stored by path (indices are per-run)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedAbstraction {
    pub name: String,
    pub description: String,
    pub files: Vec<String>,
}

impl CachedAbstraction {
    /// Re-resolve owning paths against a new file list. Paths that no longer
    /// exist are dropped.
    pub fn to_abstraction(&self, files: &[SourceFile]) -> Abstraction {
        let positions: HashMap<&str, usize> = files
            .iter()
            .enumerate()
            .map(|(i, f)| (f.path.as_str(), i))
            .collect();
        let mut indices: Vec<usize> = self
            .files
            .iter()
            .filter_map(|p| positions.get(p.as_str()).copied())
            .collect();
        indices.sort_unstable();
        indices.dedup();

        Abstraction {
            name: self.name.clone(),
            description: self.description.clone(),
            files: indices,
        }
    }
}

/// Relationship stored by abstraction name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedRelationship {
    pub from: String,
    pub to: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedChapter {
    pub title: String,
    pub content: String,
    /// Abstraction names covered by this chapter
    pub abstractions: Vec<String>,
    /// Slugs of chapters this one builds on
    pub dependencies: Vec<String>,
    pub generated_at: DateTime<Utc>,
    pub prompt_hash: String,
    #[serde(default)]
    pub number: usize,
    #[serde(default)]
    pub filename: String,
}

/// Token, cost and provider accounting
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheMetadata {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_cost: f64,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub generation_count: u32,
    pub model_calls: u32,
}

impl CacheMetadata {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Fold one run's usage into the running totals
    pub fn absorb(&mut self, run: &CacheMetadata) {
        self.input_tokens += run.input_tokens;
        self.output_tokens += run.output_tokens;
        self.total_cost += run.total_cost;
        self.model_calls += run.model_calls;
        if run.provider.is_some() {
            self.provider = run.provider.clone();
        }
        if run.model.is_some() {
            self.model = run.model.clone();
        }
    }
}

/// Everything remembered about one repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoCache {
    pub repo_url: String,
    pub repo_id: String,
    pub last_crawl_time: DateTime<Utc>,
    #[serde(default)]
    pub files: Vec<CachedFile>,
    #[serde(default)]
    pub abstractions: Vec<CachedAbstraction>,
    #[serde(default)]
    pub chapters: BTreeMap<String, CachedChapter>,
    #[serde(default)]
    pub metadata: CacheMetadata,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub relationships: Vec<CachedRelationship>,
    /// Chapter slugs in reading order
    #[serde(default)]
    pub chapter_order: Vec<String>,
    #[serde(default)]
    pub language: Option<String>,
}

impl RepoCache {
    /// Empty scaffold for a repository seen for the first time
    pub fn new(repo_url: &str) -> Self {
        Self {
            repo_url: repo_url.to_string(),
            repo_id: normalize_repo_url(repo_url),
            last_crawl_time: Utc::now(),
            files: Vec::new(),
            abstractions: Vec::new(),
            chapters: BTreeMap::new(),
            metadata: CacheMetadata::default(),
            project_name: project_name_from_repo(repo_url),
            summary: String::new(),
            relationships: Vec::new(),
            chapter_order: Vec::new(),
            language: None,
        }
    }

    pub fn cache_key(&self) -> String {
        repo_cache_key(&self.repo_url)
    }

    pub fn chapter_slugs(&self) -> Vec<String> {
        self.chapters.keys().cloned().collect()
    }

    /// Whether the record holds enough to resume at chapter writing
    pub fn has_structure(&self) -> bool {
        !self.abstractions.is_empty()
            && !self.chapter_order.is_empty()
            && self.chapter_order.len() == self.abstractions.len()
    }

    /// Rebuild the record from a finished run.
    ///
    /// Chapters are keyed by slug; a chapter depends on the chapters of the
    /// abstractions its abstraction points to.
    pub fn from_generation(snapshot: GenerationSnapshot<'_>) -> Self {
        let GenerationSnapshot {
            repo_url,
            project_name,
            language,
            files,
            crawled_at,
            abstractions,
            relationships,
            chapters,
            metadata,
        } = snapshot;

        let cached_abstractions = abstractions
            .iter()
            .map(|a| CachedAbstraction {
                name: a.name.clone(),
                description: a.description.clone(),
                files: a
                    .files
                    .iter()
                    .filter_map(|&i| files.get(i).map(|f| f.path.clone()))
                    .collect(),
            })
            .collect();

        let name_of = |idx: usize| abstractions.get(idx).map(|a| a.name.clone());
        let cached_relationships = relationships
            .details
            .iter()
            .filter_map(|r| {
                Some(CachedRelationship {
                    from: name_of(r.from)?,
                    to: name_of(r.to)?,
                    label: r.label.clone(),
                })
            })
            .collect();

        let slug_by_abstraction: HashMap<usize, &str> = chapters
            .iter()
            .map(|c| (c.abstraction_index, c.slug.as_str()))
            .collect();

        let mut cached_chapters = BTreeMap::new();
        for chapter in chapters {
            let mut dependencies: Vec<String> = relationships
                .details
                .iter()
                .filter(|r| r.from == chapter.abstraction_index && r.to != r.from)
                .filter_map(|r| slug_by_abstraction.get(&r.to).map(|s| s.to_string()))
                .collect();
            dependencies.sort();
            dependencies.dedup();

            cached_chapters.insert(
                chapter.slug.clone(),
                CachedChapter {
                    title: chapter.title.clone(),
                    content: chapter.content.clone(),
                    abstractions: name_of(chapter.abstraction_index).into_iter().collect(),
                    dependencies,
                    generated_at: chapter.generated_at,
                    prompt_hash: chapter.prompt_hash.clone(),
                    number: chapter.number,
                    filename: chapter.filename.clone(),
                },
            );
        }

        Self {
            repo_url: repo_url.to_string(),
            repo_id: normalize_repo_url(repo_url),
            last_crawl_time: crawled_at,
            files: fingerprint_files(files, crawled_at),
            abstractions: cached_abstractions,
            chapters: cached_chapters,
            metadata,
            project_name: Some(project_name.to_string()),
            summary: relationships.summary.clone(),
            relationships: cached_relationships,
            chapter_order: chapters.iter().map(|c| c.slug.clone()).collect(),
            language: Some(language.to_string()),
        }
    }
}

/// Borrowed view of a finished run, consumed by [`RepoCache::from_generation`]
pub struct GenerationSnapshot<'a> {
    pub repo_url: &'a str,
    pub project_name: &'a str,
    pub language: &'a str,
    pub files: &'a [SourceFile],
    pub crawled_at: DateTime<Utc>,
    pub abstractions: &'a [Abstraction],
    pub relationships: &'a RelationshipSummary,
    /// Chapters in reading order
    pub chapters: &'a [Chapter],
    pub metadata: CacheMetadata,
}

/// Directory entry for one cached repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub cache_key: String,
    pub last_accessed: DateTime<Utc>,
    pub repo_url: String,
}

/// Directory of every cached repository, keyed by repo id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoIndex {
    #[serde(default)]
    pub repos: BTreeMap<String, IndexEntry>,
    pub version: u32,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for RepoIndex {
    fn default() -> Self {
        Self {
            repos: BTreeMap::new(),
            version: cache_constants::INDEX_VERSION,
            updated_at: None,
        }
    }
}

impl RepoIndex {
    /// Insert or refresh the entry for a repository
    pub fn touch(&mut self, repo_id: &str, cache_key: &str, repo_url: &str, at: DateTime<Utc>) {
        self.repos.insert(
            repo_id.to_string(),
            IndexEntry {
                cache_key: cache_key.to_string(),
                last_accessed: at,
                repo_url: repo_url.to_string(),
            },
        );
    }

    /// Entries sorted by last access, newest first
    pub fn recent(&self) -> Vec<(&String, &IndexEntry)> {
        let mut entries: Vec<_> = self.repos.iter().collect();
        entries.sort_by(|a, b| b.1.last_accessed.cmp(&a.1.last_accessed).then(a.0.cmp(b.0)));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Relationship;
    use serde_json::json;

    fn chapter(number: usize, abstraction_index: usize, slug: &str) -> Chapter {
        Chapter {
            number,
            abstraction_index,
            title: slug.to_uppercase(),
            slug: slug.to_string(),
            filename: format!("{:02}_{}.md", number - 1, slug),
            content: format!("# Chapter {}: {}", number, slug),
            generated_at: Utc::now(),
            prompt_hash: "h".into(),
        }
    }

    #[test]
    fn test_new_scaffold() {
        let cache = RepoCache::new("https://github.com/Foo/Bar.git");
        assert_eq!(cache.repo_id, "foo/bar");
        assert_eq!(cache.cache_key(), repo_cache_key("foo/bar"));
        assert_eq!(cache.project_name.as_deref(), Some("bar"));
        assert!(cache.files.is_empty() && cache.chapters.is_empty());
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let cache = RepoCache::new("foo/bar");
        let value = serde_json::to_value(&cache).unwrap();
        assert!(value.get("repoUrl").is_some());
        assert!(value.get("lastCrawlTime").is_some());
        assert!(value.get("chapterOrder").is_some());

        let index = serde_json::to_value(RepoIndex::default()).unwrap();
        assert_eq!(index["version"], json!(1));
    }

    #[test]
    fn test_minimal_record_loads() {
        let record = json!({
            "repoUrl": "foo/bar",
            "repoId": "foo/bar",
            "lastCrawlTime": "2024-01-01T00:00:00Z",
            "files": [{"path": "a.rs", "hash": "00000001", "lastModified": "2024-01-01T00:00:00Z"}],
        });
        let cache: RepoCache = serde_json::from_value(record).unwrap();
        assert_eq!(cache.files.len(), 1);
        assert!(cache.chapters.is_empty());
        assert!(!cache.has_structure());
    }

    #[test]
    fn test_abstraction_reresolves_by_path() {
        let cached = CachedAbstraction {
            name: "Core".into(),
            description: "d".into(),
            files: vec!["b.rs".into(), "gone.rs".into(), "a.rs".into()],
        };
        let files = vec![SourceFile::new("a.rs", ""), SourceFile::new("b.rs", "")];
        assert_eq!(cached.to_abstraction(&files).files, vec![0, 1]);
    }

    #[test]
    fn test_from_generation_links_dependencies() {
        let files = vec![SourceFile::new("a.rs", "a"), SourceFile::new("b.rs", "b")];
        let abstractions = vec![
            Abstraction {
                name: "Alpha".into(),
                description: "first".into(),
                files: vec![0],
            },
            Abstraction {
                name: "Beta".into(),
                description: "second".into(),
                files: vec![1],
            },
        ];
        let relationships = RelationshipSummary {
            summary: "sum".into(),
            details: vec![Relationship {
                from: 1,
                to: 0,
                label: "uses".into(),
            }],
        };
        let chapters = vec![chapter(1, 0, "alpha"), chapter(2, 1, "beta")];

        let cache = RepoCache::from_generation(GenerationSnapshot {
            repo_url: "foo/bar",
            project_name: "bar",
            language: "english",
            files: &files,
            crawled_at: Utc::now(),
            abstractions: &abstractions,
            relationships: &relationships,
            chapters: &chapters,
            metadata: CacheMetadata::default(),
        });

        assert_eq!(cache.chapter_order, vec!["alpha", "beta"]);
        assert_eq!(cache.chapters["beta"].dependencies, vec!["alpha"]);
        assert!(cache.chapters["alpha"].dependencies.is_empty());
        assert_eq!(cache.abstractions[1].files, vec!["b.rs"]);
        assert_eq!(cache.relationships[0].from, "Beta");
        assert_eq!(cache.files.len(), 2);
        assert!(cache.has_structure());
    }

    #[test]
    fn test_index_recent_order() {
        let mut index = RepoIndex::default();
        let old = DateTime::parse_from_rfc3339("2020-01-01T00:00:00Z").unwrap().to_utc();
        index.touch("a/old", "repo_cache_a_old", "a/old", old);
        index.touch("a/new", "repo_cache_a_new", "a/new", Utc::now());
        let recent = index.recent();
        assert_eq!(recent[0].0, "a/new");
        assert_eq!(recent[1].0, "a/old");
    }
}
