//! Storage Adapter
//!
//! Key/value persistence behind one async contract so the cache engine never
//! depends on a specific backend.
//!
//! ## Backends
//!
//! - [`MemoryStorage`]: process-local map with an optional byte quota
//! - [`FileStorage`]: one JSON document per key on disk, optional byte quota
//! - [`SqliteStorage`]: relational key/value table with connection pooling
//!
//! "Not found" is never an error: `get` returns `None`, `delete` returns `false`.

pub mod file;
pub mod memory;
pub mod quota;
pub mod sqlite;

pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use quota::{QuotaWrite, entry_timestamp, set_with_eviction};
pub use sqlite::SqliteStorage;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::config::{StorageBackend, StorageConfig};
use crate::types::Result;

/// Shared storage handle for async contexts.
pub type SharedStorage = Arc<dyn StorageAdapter>;

/// Five-operation key/value contract implemented by every backend
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Fetch a value, `None` when the key is absent
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Insert or replace a value
    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Remove a key, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// List keys, optionally restricted to a prefix
    async fn keys(&self, prefix: Option<&str>) -> Result<Vec<String>>;

    /// Remove every key, optionally restricted to a prefix
    async fn clear(&self, prefix: Option<&str>) -> Result<()>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Typed access on top of the JSON contract
#[async_trait]
pub trait StorageExt: StorageAdapter {
    async fn get_as<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn set_as<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + Sync,
    {
        let value = serde_json::to_value(value)?;
        self.set(key, value).await
    }
}

impl<S: StorageAdapter + ?Sized> StorageExt for S {}

/// Database file name inside the storage directory
pub const SQLITE_FILE: &str = "cache.db";

/// Create a shared storage backend from configuration.
///
/// `config.path` is a directory for both persistent backends.
pub fn create_storage(config: &StorageConfig) -> Result<SharedStorage> {
    let storage: SharedStorage = match config.backend {
        StorageBackend::Memory => Arc::new(MemoryStorage::new(config.quota_bytes)),
        StorageBackend::File => Arc::new(FileStorage::new(&config.path, config.quota_bytes)),
        StorageBackend::Sqlite => Arc::new(SqliteStorage::open(config.path.join(SQLITE_FILE))?),
    };
    tracing::debug!("Using {} storage backend", storage.backend_name());
    Ok(storage)
}
