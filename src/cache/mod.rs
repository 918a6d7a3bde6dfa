//! Cache Engine
//!
//! Per-repository cache of crawl fingerprints and generated artifacts, plus the
//! change analysis and regeneration planning that decide what a run may reuse.
//!
//! ## Modules
//!
//! - `identity`: repository id normalization and storage keys
//! - `hash`: fast and secure content fingerprints
//! - `types`: persisted records (`RepoCache`, `RepoIndex`)
//! - `analysis`: added/removed/modified/unchanged diff
//! - `plan`: regeneration decision table and chapter cascade
//! - `manager`: load/save/clear over a storage backend

pub mod analysis;
pub mod hash;
pub mod identity;
pub mod manager;
pub mod plan;
pub mod types;

pub use analysis::{FileChangeAnalysis, analyze_file_changes};
pub use hash::{compute_content_hash, compute_content_hash_async};
pub use identity::{normalize_repo_url, project_name_from_repo, repo_cache_key};
pub use manager::{CacheManager, CacheStats, CachedRepoSummary};
pub use plan::{
    RegenerationMode, RegenerationPlan, determine_regeneration_plan, find_affected_chapters,
};
pub use types::{
    CacheMetadata, CachedAbstraction, CachedChapter, CachedFile, CachedRelationship,
    GenerationSnapshot, IndexEntry, RepoCache, RepoIndex, fingerprint_files,
};
