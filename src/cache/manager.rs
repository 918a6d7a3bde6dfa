//! Cache Manager
//!
//! Loads and saves repository caches and the repository index through a
//! [`StorageAdapter`](crate::storage::StorageAdapter).
//!
//! The index is an explicit record re-read on every call; nothing is held in
//! process memory between calls.
//!
//! ## Failure policy
//!
//! - Reads recover: a missing or unreadable record is logged and treated as
//!   empty (`RepoIndex::default()` / `None`).
//! - Writes are fatal: a failed save surfaces as `ErrorKind::Cache { op: Save }`.
//! - Saving writes the index entry first and the cache record second. The two
//!   writes are not atomic; [`CacheManager::reconcile_index`] drops index
//!   entries whose record never landed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::identity::{normalize_repo_url, repo_cache_key};
use super::types::{RepoCache, RepoIndex};
use crate::constants::cache as cache_constants;
use crate::storage::{SharedStorage, StorageExt};
use crate::types::{CacheOp, Result, ResultExt};

/// Aggregate numbers for `cache list`
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub repo_count: usize,
    pub chapter_count: usize,
    pub file_count: usize,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub oldest_access: Option<DateTime<Utc>>,
    pub newest_access: Option<DateTime<Utc>>,
    pub backend: &'static str,
}

/// Listing row for one cached repository
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedRepoSummary {
    pub repo_id: String,
    pub repo_url: String,
    pub cache_key: String,
    pub last_accessed: DateTime<Utc>,
}

#[derive(Clone)]
pub struct CacheManager {
    storage: SharedStorage,
}

impl CacheManager {
    pub fn new(storage: SharedStorage) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    // -------------------------------------------------------------------------
    // Index
    // -------------------------------------------------------------------------

    /// Load the index, falling back to an empty one on miss or read failure
    pub async fn load_repo_index(&self) -> RepoIndex {
        match self
            .storage
            .get_as::<RepoIndex>(cache_constants::INDEX_KEY)
            .await
        {
            Ok(Some(index)) => index,
            Ok(None) => RepoIndex::default(),
            Err(e) => {
                warn!("Failed to load repository index, starting empty: {}", e);
                RepoIndex::default()
            }
        }
    }

    pub async fn save_repo_index(&self, mut index: RepoIndex) -> Result<()> {
        index.updated_at = Some(Utc::now());
        self.storage
            .set_as(cache_constants::INDEX_KEY, &index)
            .await
            .cache_context(CacheOp::Save, "Failed to save repository index")
    }

    // -------------------------------------------------------------------------
    // Repository caches
    // -------------------------------------------------------------------------

    /// Read a cache record without touching the index.
    ///
    /// A record stored under the key but belonging to another repository is a
    /// miss.
    pub async fn peek_repo_cache(&self, repo_url: &str) -> Option<RepoCache> {
        let key = repo_cache_key(repo_url);
        let cache = match self.storage.get_as::<RepoCache>(&key).await {
            Ok(cache) => cache?,
            Err(e) => {
                warn!("Ignoring unreadable cache record '{}': {}", key, e);
                return None;
            }
        };

        let repo_id = normalize_repo_url(repo_url);
        if cache.repo_id != repo_id {
            warn!(
                "Ignoring cache record '{}': it belongs to '{}', not '{}'",
                key, cache.repo_id, repo_id
            );
            return None;
        }
        Some(cache)
    }

    /// Load a repository cache and bump its last-access time in the index.
    ///
    /// A failure to persist the bumped index is logged; the cache is still
    /// returned.
    pub async fn load_repo_cache(&self, repo_url: &str) -> Option<RepoCache> {
        let cache = self.peek_repo_cache(repo_url).await?;

        let mut index = self.load_repo_index().await;
        index.touch(&cache.repo_id, &cache.cache_key(), &cache.repo_url, Utc::now());
        if let Err(e) = self.save_repo_index(index).await {
            warn!("Failed to record access for '{}': {}", cache.repo_id, e);
        }

        debug!(
            "Loaded cache for '{}' ({} files, {} chapters)",
            cache.repo_id,
            cache.files.len(),
            cache.chapters.len()
        );
        Some(cache)
    }

    /// Persist a repository cache: index entry first, then the record.
    pub async fn save_repo_cache(&self, cache: &RepoCache) -> Result<()> {
        let key = cache.cache_key();

        let mut index = self.load_repo_index().await;
        index.touch(&cache.repo_id, &key, &cache.repo_url, Utc::now());
        self.save_repo_index(index).await?;

        self.storage
            .set_as(&key, cache)
            .await
            .cache_context(CacheOp::Save, format!("Failed to save cache '{}'", key))?;

        info!(
            "Saved cache for '{}' ({} files, {} chapters)",
            cache.repo_id,
            cache.files.len(),
            cache.chapters.len()
        );
        Ok(())
    }

    pub fn create_repo_cache(&self, repo_url: &str) -> RepoCache {
        RepoCache::new(repo_url)
    }

    /// Remove one repository's cache and index entry. `false` if neither existed.
    pub async fn clear_repo_cache(&self, repo_url: &str) -> Result<bool> {
        let key = repo_cache_key(repo_url);
        let repo_id = normalize_repo_url(repo_url);

        let removed_record = self
            .storage
            .delete(&key)
            .await
            .cache_context(CacheOp::Clear, format!("Failed to delete cache '{}'", key))?;

        let mut index = self.load_repo_index().await;
        let removed_entry = index.repos.remove(&repo_id).is_some();
        if removed_entry {
            self.save_repo_index(index)
                .await
                .cache_context(CacheOp::Clear, "Failed to update repository index")?;
        }

        if removed_record || removed_entry {
            info!("Cleared cache for '{}'", repo_id);
        } else {
            debug!("No cache to clear for '{}'", repo_id);
        }
        Ok(removed_record || removed_entry)
    }

    /// Remove every repository cache and the index. Returns records removed.
    pub async fn clear_all_caches(&self) -> Result<usize> {
        let keys = self
            .storage
            .keys(Some(cache_constants::CACHE_KEY_PREFIX))
            .await
            .cache_context(CacheOp::Clear, "Failed to list caches")?;

        self.storage
            .clear(Some(cache_constants::CACHE_KEY_PREFIX))
            .await
            .cache_context(CacheOp::Clear, "Failed to clear caches")?;
        self.storage
            .delete(cache_constants::INDEX_KEY)
            .await
            .cache_context(CacheOp::Clear, "Failed to delete repository index")?;

        info!("Cleared {} repository caches", keys.len());
        Ok(keys.len())
    }

    // -------------------------------------------------------------------------
    // Maintenance
    // -------------------------------------------------------------------------

    /// Index entries, most recently accessed first
    pub async fn list_cached_repos(&self) -> Vec<CachedRepoSummary> {
        self.load_repo_index()
            .await
            .recent()
            .into_iter()
            .map(|(repo_id, entry)| CachedRepoSummary {
                repo_id: repo_id.clone(),
                repo_url: entry.repo_url.clone(),
                cache_key: entry.cache_key.clone(),
                last_accessed: entry.last_accessed,
            })
            .collect()
    }

    /// Drop index entries whose cache record is missing. Returns the removed ids.
    pub async fn reconcile_index(&self) -> Result<Vec<String>> {
        let stored = self
            .storage
            .keys(Some(cache_constants::CACHE_KEY_PREFIX))
            .await
            .cache_context(CacheOp::Load, "Failed to list caches")?;

        let mut index = self.load_repo_index().await;
        let stale: Vec<String> = index
            .repos
            .iter()
            .filter(|(_, entry)| !stored.contains(&entry.cache_key))
            .map(|(id, _)| id.clone())
            .collect();

        if stale.is_empty() {
            return Ok(stale);
        }

        for id in &stale {
            index.repos.remove(id);
        }
        self.save_repo_index(index).await?;
        warn!("Removed {} stale index entries", stale.len());
        Ok(stale)
    }

    pub async fn cache_stats(&self) -> CacheStats {
        let repos = self.list_cached_repos().await;
        let mut stats = CacheStats {
            repo_count: repos.len(),
            newest_access: repos.first().map(|r| r.last_accessed),
            oldest_access: repos.last().map(|r| r.last_accessed),
            backend: self.storage.backend_name(),
            ..Default::default()
        };

        for repo in &repos {
            if let Some(cache) = self.peek_repo_cache(&repo.repo_url).await {
                stats.chapter_count += cache.chapters.len();
                stats.file_count += cache.files.len();
                stats.total_tokens += cache.metadata.total_tokens();
                stats.total_cost += cache.metadata.total_cost;
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, StorageAdapter};
    use crate::types::{ErrorKind, TutorError};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::Arc;

    fn manager() -> CacheManager {
        CacheManager::new(Arc::new(MemoryStorage::new(None)))
    }

    #[tokio::test]
    async fn test_missing_index_is_default() {
        let index = manager().load_repo_index().await;
        assert!(index.repos.is_empty());
        assert_eq!(index.version, 1);
    }

    #[tokio::test]
    async fn test_corrupt_index_is_default() {
        let mgr = manager();
        mgr.storage()
            .set("repo_index", json!({"repos": "not a map"}))
            .await
            .unwrap();
        assert!(mgr.load_repo_index().await.repos.is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let mgr = manager();
        let mut cache = mgr.create_repo_cache("https://github.com/Foo/Bar");
        cache.summary = "hello".into();
        mgr.save_repo_cache(&cache).await.unwrap();

        let loaded = mgr.load_repo_cache("foo/bar").await.unwrap();
        assert_eq!(loaded.summary, "hello");

        let index = mgr.load_repo_index().await;
        let entry = &index.repos["foo/bar"];
        assert_eq!(entry.cache_key, repo_cache_key("foo/bar"));
        assert!(index.updated_at.is_some());
    }

    #[tokio::test]
    async fn test_load_bumps_last_accessed() {
        let mgr = manager();
        let cache = mgr.create_repo_cache("foo/bar");
        mgr.save_repo_cache(&cache).await.unwrap();
        let before = mgr.load_repo_index().await.repos["foo/bar"].last_accessed;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        mgr.load_repo_cache("foo/bar").await.unwrap();

        let after = mgr.load_repo_index().await.repos["foo/bar"].last_accessed;
        assert!(after > before);
    }

    #[tokio::test]
    async fn test_missing_cache_is_none() {
        assert!(manager().load_repo_cache("nobody/nothing").await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_cache_is_miss() {
        let mgr = manager();
        mgr.storage()
            .set(&repo_cache_key("foo/bar"), json!({"garbage": true}))
            .await
            .unwrap();
        assert!(mgr.load_repo_cache("foo/bar").await.is_none());
    }

    #[tokio::test]
    async fn test_punctuation_variants_do_not_share_a_cache() {
        let mgr = manager();
        let mut cache = mgr.create_repo_cache("https://github.com/acme/my_app");
        cache.summary = "docs for my_app".into();
        mgr.save_repo_cache(&cache).await.unwrap();

        assert!(mgr.load_repo_cache("https://github.com/acme/my-app").await.is_none());
        assert!(mgr.load_repo_cache("acme/my.app").await.is_none());
        let own = mgr.load_repo_cache("acme/my_app").await.unwrap();
        assert_eq!(own.summary, "docs for my_app");
    }

    #[tokio::test]
    async fn test_record_for_another_repo_is_miss() {
        let mgr = manager();
        let stray = mgr.create_repo_cache("acme/other");
        mgr.storage()
            .set_as(&repo_cache_key("acme/widgets"), &stray)
            .await
            .unwrap();

        assert!(mgr.peek_repo_cache("acme/widgets").await.is_none());
        assert!(mgr.load_repo_cache("acme/widgets").await.is_none());
        assert!(mgr.load_repo_index().await.repos.is_empty());
    }

    #[tokio::test]
    async fn test_clear_reports_absence() {
        let mgr = manager();
        assert!(!mgr.clear_repo_cache("foo/bar").await.unwrap());

        mgr.save_repo_cache(&mgr.create_repo_cache("foo/bar"))
            .await
            .unwrap();
        assert!(mgr.clear_repo_cache("https://github.com/foo/bar.git").await.unwrap());
        assert!(mgr.load_repo_cache("foo/bar").await.is_none());
        assert!(mgr.load_repo_index().await.repos.is_empty());
    }

    #[tokio::test]
    async fn test_clear_all() {
        let mgr = manager();
        for url in ["a/one", "b/two", "c/three"] {
            mgr.save_repo_cache(&mgr.create_repo_cache(url)).await.unwrap();
        }
        assert_eq!(mgr.clear_all_caches().await.unwrap(), 3);
        assert!(mgr.list_cached_repos().await.is_empty());
        assert_eq!(mgr.clear_all_caches().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_drops_stale_entries() {
        let mgr = manager();
        mgr.save_repo_cache(&mgr.create_repo_cache("a/one")).await.unwrap();
        mgr.save_repo_cache(&mgr.create_repo_cache("b/two")).await.unwrap();
        mgr.storage().delete(&repo_cache_key("b/two")).await.unwrap();

        assert_eq!(mgr.reconcile_index().await.unwrap(), vec!["b/two"]);
        assert!(mgr.reconcile_index().await.unwrap().is_empty());
        assert_eq!(mgr.list_cached_repos().await.len(), 1);
    }

    #[tokio::test]
    async fn test_stats() {
        let mgr = manager();
        mgr.save_repo_cache(&mgr.create_repo_cache("a/one")).await.unwrap();
        let stats = mgr.cache_stats().await;
        assert_eq!(stats.repo_count, 1);
        assert_eq!(stats.backend, "memory");
    }

    /// Accepts the index write, rejects everything else
    struct RejectingStore {
        inner: MemoryStorage,
    }

    #[async_trait]
    impl StorageAdapter for RejectingStore {
        async fn get(&self, key: &str) -> Result<Option<Value>> {
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: Value) -> Result<()> {
            if key == "repo_index" {
                return self.inner.set(key, value).await;
            }
            Err(TutorError::quota_exceeded("full"))
        }
        async fn delete(&self, key: &str) -> Result<bool> {
            self.inner.delete(key).await
        }
        async fn keys(&self, prefix: Option<&str>) -> Result<Vec<String>> {
            self.inner.keys(prefix).await
        }
        async fn clear(&self, prefix: Option<&str>) -> Result<()> {
            self.inner.clear(prefix).await
        }
        fn backend_name(&self) -> &'static str {
            "rejecting"
        }
    }

    #[tokio::test]
    async fn test_write_failure_is_fatal_and_reconcilable() {
        let mgr = CacheManager::new(Arc::new(RejectingStore {
            inner: MemoryStorage::new(None),
        }));
        let err = mgr
            .save_repo_cache(&mgr.create_repo_cache("foo/bar"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cache { op: CacheOp::Save });

        // Index landed, record did not
        assert_eq!(mgr.list_cached_repos().await.len(), 1);
        assert_eq!(mgr.reconcile_index().await.unwrap(), vec!["foo/bar"]);
    }
}
