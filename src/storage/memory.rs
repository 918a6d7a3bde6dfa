//! In-memory storage backend
//!
//! Lock-free concurrent map. Size is measured as the serialized JSON length of
//! each value, so the optional quota behaves like a browser storage limit.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use super::quota::{QuotaWrite, set_with_eviction};
use super::StorageAdapter;
use crate::types::{Result, TutorError};

#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: DashMap<String, Value>,
    quota_bytes: Option<usize>,
}

impl MemoryStorage {
    pub fn new(quota_bytes: Option<usize>) -> Self {
        Self {
            data: DashMap::new(),
            quota_bytes,
        }
    }

    /// Bytes used by every entry except `exclude`
    fn used_bytes(&self, exclude: &str) -> usize {
        self.data
            .iter()
            .filter(|e| e.key() != exclude)
            .map(|e| value_size(e.value()))
            .sum()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

fn value_size(value: &Value) -> usize {
    serde_json::to_string(value).map(|s| s.len()).unwrap_or(0)
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.data.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        set_with_eviction(self, key, &value).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.data.remove(key).is_some())
    }

    async fn keys(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .data
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| prefix.is_none_or(|p| k.starts_with(p)))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn clear(&self, prefix: Option<&str>) -> Result<()> {
        match prefix {
            Some(p) => self.data.retain(|k, _| !k.starts_with(p)),
            None => self.data.clear(),
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl QuotaWrite for MemoryStorage {
    async fn write_raw(&self, key: &str, value: &Value) -> Result<()> {
        if let Some(quota) = self.quota_bytes {
            let needed = self.used_bytes(key) + value_size(value);
            if needed > quota {
                return Err(TutorError::quota_exceeded(format!(
                    "memory storage quota exceeded: {} > {} bytes",
                    needed, quota
                )));
            }
        }
        self.data.insert(key.to_string(), value.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_basic_operations() {
        let storage = MemoryStorage::new(None);

        assert!(storage.get("a").await.unwrap().is_none());
        assert!(!storage.delete("a").await.unwrap());

        storage.set("a", json!(1)).await.unwrap();
        storage.set("b", json!(2)).await.unwrap();
        assert_eq!(storage.get("a").await.unwrap(), Some(json!(1)));
        assert_eq!(storage.keys(None).await.unwrap(), vec!["a", "b"]);

        assert!(storage.delete("a").await.unwrap());
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn test_prefix_keys_and_clear() {
        let storage = MemoryStorage::new(None);
        storage.set("repo_cache_a", json!({})).await.unwrap();
        storage.set("repo_cache_b", json!({})).await.unwrap();
        storage.set("repo_index", json!({})).await.unwrap();

        assert_eq!(storage.keys(Some("repo_cache_")).await.unwrap().len(), 2);

        storage.clear(Some("repo_cache_")).await.unwrap();
        assert_eq!(storage.keys(None).await.unwrap(), vec!["repo_index"]);

        storage.clear(None).await.unwrap();
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_quota_evicts_oldest_entry() {
        let storage = MemoryStorage::new(Some(120));
        storage
            .set("old", json!({"lastAccessed": "2020-01-01T00:00:00Z", "p": "xxxxxxxxxx"}))
            .await
            .unwrap();
        storage
            .set("new", json!({"lastAccessed": "2030-01-01T00:00:00Z", "p": "xxxxxxxxxx"}))
            .await
            .unwrap();

        storage
            .set("third", json!({"lastAccessed": "2031-01-01T00:00:00Z"}))
            .await
            .unwrap();

        assert!(storage.get("old").await.unwrap().is_none());
        assert!(storage.get("new").await.unwrap().is_some());
        assert!(storage.get("third").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_quota_failure_surfaces_after_retry() {
        let storage = MemoryStorage::new(Some(10));
        let err = storage
            .set("big", json!({"payload": "this will never fit"}))
            .await
            .unwrap_err();
        assert!(err.is_quota_exceeded());
    }
}
