//! Quota Handling
//!
//! Backends that enforce a size quota report overflow from their raw write as
//! `ErrorKind::QuotaExceeded`. [`set_with_eviction`] then evicts the
//! least-recently-used entries and retries the write exactly once.
//!
//! Entries are ranked by an embedded timestamp field (see
//! `constants::cache::TIMESTAMP_FIELDS`); values without one rank as `0` and go first.

use async_trait::async_trait;
use chrono::DateTime;
use serde_json::Value;
use tracing::{debug, warn};

use super::StorageAdapter;
use crate::constants::cache as cache_constants;
use crate::types::Result;

/// Raw write used by quota-enforcing backends
#[async_trait]
pub trait QuotaWrite: StorageAdapter {
    /// Write without eviction; must fail with `QuotaExceeded` on overflow
    async fn write_raw(&self, key: &str, value: &Value) -> Result<()>;
}

/// Write `value`, evicting and retrying once on quota overflow.
///
/// If the retry also fails, the ORIGINAL quota error is returned.
pub async fn set_with_eviction<S>(store: &S, key: &str, value: &Value) -> Result<()>
where
    S: QuotaWrite + ?Sized,
{
    let original = match store.write_raw(key, value).await {
        Ok(()) => return Ok(()),
        Err(e) if e.is_quota_exceeded() => e,
        Err(e) => return Err(e),
    };

    warn!(
        "Storage quota exceeded writing '{}' on {} backend, evicting old entries",
        key,
        store.backend_name()
    );
    let evicted = evict_lru(store, key).await?;
    debug!("Evicted {} entries", evicted.len());

    match store.write_raw(key, value).await {
        Ok(()) => Ok(()),
        Err(retry_err) => {
            warn!("Write still failing after eviction: {}", retry_err);
            Err(original)
        }
    }
}

/// Evict the oldest quarter (at least one) of all keys other than `keep`.
async fn evict_lru<S>(store: &S, keep: &str) -> Result<Vec<String>>
where
    S: StorageAdapter + ?Sized,
{
    let mut ranked = Vec::new();
    for key in store.keys(None).await? {
        if key == keep {
            continue;
        }
        let ts = store
            .get(&key)
            .await?
            .map(|v| entry_timestamp(&v))
            .unwrap_or(0);
        ranked.push((ts, key));
    }

    if ranked.is_empty() {
        return Ok(Vec::new());
    }

    ranked.sort();
    let count = ranked.len().div_ceil(4).max(1);

    let mut evicted = Vec::with_capacity(count);
    for (_, key) in ranked.into_iter().take(count) {
        if store.delete(&key).await? {
            evicted.push(key);
        }
    }
    Ok(evicted)
}

/// Extract the eviction rank (epoch millis) from a stored value.
///
/// Accepts RFC 3339 strings and numeric epoch milliseconds; anything else is `0`.
pub fn entry_timestamp(value: &Value) -> i64 {
    for field in cache_constants::TIMESTAMP_FIELDS {
        match value.get(*field) {
            Some(Value::String(s)) => {
                if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                    return ts.timestamp_millis();
                }
            }
            Some(Value::Number(n)) => {
                if let Some(ms) = n.as_i64() {
                    return ms;
                }
            }
            _ => {}
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TutorError;
    use dashmap::DashMap;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend that rejects the first `failures` raw writes with a quota error
    struct FlakyStore {
        data: DashMap<String, Value>,
        failures: usize,
        attempts: AtomicUsize,
        deletes: AtomicUsize,
    }

    impl FlakyStore {
        fn new(failures: usize) -> Self {
            Self {
                data: DashMap::new(),
                failures,
                attempts: AtomicUsize::new(0),
                deletes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl StorageAdapter for FlakyStore {
        async fn get(&self, key: &str) -> Result<Option<Value>> {
            Ok(self.data.get(key).map(|v| v.value().clone()))
        }

        async fn set(&self, key: &str, value: Value) -> Result<()> {
            set_with_eviction(self, key, &value).await
        }

        async fn delete(&self, key: &str) -> Result<bool> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Ok(self.data.remove(key).is_some())
        }

        async fn keys(&self, _prefix: Option<&str>) -> Result<Vec<String>> {
            Ok(self.data.iter().map(|e| e.key().clone()).collect())
        }

        async fn clear(&self, _prefix: Option<&str>) -> Result<()> {
            self.data.clear();
            Ok(())
        }

        fn backend_name(&self) -> &'static str {
            "flaky"
        }
    }

    #[async_trait]
    impl QuotaWrite for FlakyStore {
        async fn write_raw(&self, key: &str, value: &Value) -> Result<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.failures {
                return Err(TutorError::quota_exceeded(format!("attempt {}", attempt)));
            }
            self.data.insert(key.to_string(), value.clone());
            Ok(())
        }
    }

    fn seed(store: &FlakyStore) {
        store.data.insert("old".into(), json!({"lastAccessed": "2020-01-01T00:00:00Z"}));
        store.data.insert("new".into(), json!({"lastAccessed": "2030-01-01T00:00:00Z"}));
        store.data.insert("untimed".into(), json!({"value": 1}));
    }

    #[tokio::test]
    async fn test_single_eviction_then_success() {
        let store = FlakyStore::new(1);
        seed(&store);

        store.set("fresh", json!({"x": 1})).await.unwrap();

        assert_eq!(store.attempts.load(Ordering::SeqCst), 2);
        assert!(store.data.contains_key("fresh"));
        // Three candidates -> one evicted, the untimed entry ranks first
        assert!(!store.data.contains_key("untimed"));
        assert!(store.data.contains_key("old"));
        assert!(store.data.contains_key("new"));
    }

    #[tokio::test]
    async fn test_exactly_one_retry_then_original_error() {
        let store = FlakyStore::new(usize::MAX);
        seed(&store);

        let err = store.set("fresh", json!({"x": 1})).await.unwrap_err();

        assert!(err.is_quota_exceeded());
        assert_eq!(err.detail, "attempt 1");
        assert_eq!(store.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(store.deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_eviction_without_quota_error() {
        let store = FlakyStore::new(0);
        seed(&store);

        store.set("fresh", json!({})).await.unwrap();

        assert_eq!(store.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(store.deletes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_entry_timestamp_formats() {
        assert_eq!(entry_timestamp(&json!({"timestamp": 1234})), 1234);
        assert_eq!(entry_timestamp(&json!({"other": "x"})), 0);
        assert_eq!(entry_timestamp(&json!({"lastAccessed": "garbage"})), 0);
        assert!(entry_timestamp(&json!({"lastCrawlTime": "2024-05-01T12:00:00Z"})) > 0);
    }
}
