//! File-backed storage
//!
//! Persists each key as one JSON document inside a directory. Keys are escaped
//! into file names reversibly (`~xx` hex escapes), writes go through a temp file
//! and rename so a crash never leaves a half-written record.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::quota::{QuotaWrite, set_with_eviction};
use super::StorageAdapter;
use crate::types::{CacheOp, Result, ResultExt, TutorError};

const EXTENSION: &str = "json";

pub struct FileStorage {
    dir: PathBuf,
    quota_bytes: Option<usize>,
}

impl FileStorage {
    pub fn new(dir: impl AsRef<Path>, quota_bytes: Option<usize>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            quota_bytes,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", encode_key(key), EXTENSION))
    }

    /// All stored keys with their on-disk size
    async fn entries(&self) -> Result<Vec<(String, u64)>> {
        let mut entries = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|e| e != EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(key) = decode_key(stem) else {
                continue;
            };
            let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
            entries.push((key, size));
        }

        entries.sort();
        Ok(entries)
    }
}

/// Escape everything outside `[A-Za-z0-9_-]` as `~xx`
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("~{:02x}", byte));
        }
    }
    out
}

fn decode_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'~' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[async_trait]
impl StorageAdapter for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let value = serde_json::from_str(&content)
                    .cache_context(CacheOp::Load, format!("Corrupt record '{}'", key))?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        set_with_eviction(self, key, &value).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .map(|(key, _)| key)
            .filter(|k| prefix.is_none_or(|p| k.starts_with(p)))
            .collect())
    }

    async fn clear(&self, prefix: Option<&str>) -> Result<()> {
        for key in self.keys(prefix).await? {
            self.delete(&key).await?;
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}

#[async_trait]
impl QuotaWrite for FileStorage {
    async fn write_raw(&self, key: &str, value: &Value) -> Result<()> {
        let content = serde_json::to_string_pretty(value)?;

        if let Some(quota) = self.quota_bytes {
            let used: u64 = self
                .entries()
                .await?
                .into_iter()
                .filter(|(k, _)| k != key)
                .map(|(_, size)| size)
                .sum();
            let needed = used as usize + content.len();
            if needed > quota {
                return Err(TutorError::quota_exceeded(format!(
                    "file storage quota exceeded: {} > {} bytes",
                    needed, quota
                )));
            }
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &content).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!("Wrote '{}' ({} bytes)", key, content.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_key_encoding_round_trip() {
        for key in ["repo_index", "repo_cache_foo_bar", "a/b:c d", "ünïcode"] {
            let encoded = encode_key(key);
            assert!(encoded.chars().all(|c| c.is_ascii_alphanumeric() || "_-~".contains(c)));
            assert_eq!(decode_key(&encoded).as_deref(), Some(key));
        }
    }

    #[tokio::test]
    async fn test_persists_across_instances() {
        let temp = TempDir::new().unwrap();

        let storage = FileStorage::new(temp.path(), None);
        storage.set("repo_index", json!({"version": 1})).await.unwrap();

        let reopened = FileStorage::new(temp.path(), None);
        assert_eq!(
            reopened.get("repo_index").await.unwrap(),
            Some(json!({"version": 1}))
        );
        assert_eq!(reopened.keys(None).await.unwrap(), vec!["repo_index"]);
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty() {
        let temp = TempDir::new().unwrap();
        let storage = FileStorage::new(temp.path().join("absent"), None);

        assert!(storage.get("x").await.unwrap().is_none());
        assert!(storage.keys(None).await.unwrap().is_empty());
        assert!(!storage.delete("x").await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_with_prefix() {
        let temp = TempDir::new().unwrap();
        let storage = FileStorage::new(temp.path(), None);
        storage.set("repo_cache_a", json!({})).await.unwrap();
        storage.set("repo_index", json!({})).await.unwrap();

        storage.clear(Some("repo_cache_")).await.unwrap();
        assert_eq!(storage.keys(None).await.unwrap(), vec!["repo_index"]);
    }

    #[tokio::test]
    async fn test_corrupt_record_is_load_error() {
        let temp = TempDir::new().unwrap();
        let storage = FileStorage::new(temp.path(), None);
        std::fs::write(temp.path().join("broken.json"), "{not json").unwrap();

        let err = storage.get("broken").await.unwrap_err();
        assert_eq!(
            err.kind,
            crate::types::ErrorKind::Cache { op: CacheOp::Load }
        );
    }

    #[tokio::test]
    async fn test_quota_evicts() {
        let temp = TempDir::new().unwrap();
        let storage = FileStorage::new(temp.path(), Some(200));
        storage
            .set("old", json!({"lastAccessed": "2020-01-01T00:00:00Z", "pad": "x".repeat(60)}))
            .await
            .unwrap();
        storage
            .set("new", json!({"lastAccessed": "2030-01-01T00:00:00Z"}))
            .await
            .unwrap();

        storage
            .set("big", json!({"pad": "y".repeat(80)}))
            .await
            .unwrap();

        assert!(storage.get("old").await.unwrap().is_none());
        assert!(storage.get("big").await.unwrap().is_some());
    }
}
