//! SQLite storage backend with connection pooling
//!
//! Relational key/value table behind an r2d2 pool. SQLite calls are blocking,
//! so every operation runs on the tokio blocking pool.

use std::path::Path;

use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;

use super::StorageAdapter;
use crate::types::{Result, ResultExt, TutorError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

pub struct SqliteStorage {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStorage {
    /// Open (and initialize) a database file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let manager =
            SqliteConnectionManager::file(path.as_ref()).with_init(Self::configure_connection);
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .with_context("Failed to create connection pool")?;

        let storage = Self { pool };
        storage.initialize()?;
        Ok(storage)
    }

    /// Open an in-memory database for testing or temporary use.
    pub fn open_in_memory() -> Result<Self> {
        // Each in-memory connection is its own database, so the pool holds one.
        let pool = Pool::builder()
            .max_size(1)
            .build(SqliteConnectionManager::memory())
            .with_context("Failed to create in-memory pool")?;

        let storage = Self { pool };
        storage.initialize()?;
        Ok(storage)
    }

    fn configure_connection(conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            "#,
        )
    }

    fn initialize(&self) -> Result<()> {
        let conn = self
            .pool
            .get()
            .with_context("Failed to acquire database connection")?;
        conn.execute_batch(SCHEMA)
            .with_context("Failed to initialize kv_store schema")
    }

    /// Run a blocking closure with a pooled connection.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool
                .get()
                .with_context("Failed to acquire database connection")?;
            f(&conn)
        })
        .await
        .map_err(|e| TutorError::io(format!("SQLite task failed: {}", e)))?
    }
}

#[async_trait]
impl StorageAdapter for SqliteStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let key = key.to_string();
        let raw: Option<String> = self
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT value FROM kv_store WHERE key = ?1",
                        params![key],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;

        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let key = key.to_string();
        let text = serde_json::to_string(&value)?;
        self.with_conn(move |conn| {
            let now = chrono::Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, text, now],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let removed = conn.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
            Ok(removed > 0)
        })
        .await
    }

    async fn keys(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let prefix = prefix.unwrap_or_default().to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT key FROM kv_store WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
            )?;
            let keys = stmt
                .query_map(params![prefix], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(keys)
        })
        .await
    }

    async fn clear(&self, prefix: Option<&str>) -> Result<()> {
        let prefix = prefix.unwrap_or_default().to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM kv_store WHERE substr(key, 1, length(?1)) = ?1",
                params![prefix],
            )?;
            Ok(())
        })
        .await
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_in_memory_operations() {
        let storage = SqliteStorage::open_in_memory().unwrap();

        assert!(storage.get("missing").await.unwrap().is_none());
        storage.set("a", json!({"n": 1})).await.unwrap();
        storage.set("a", json!({"n": 2})).await.unwrap();
        assert_eq!(storage.get("a").await.unwrap(), Some(json!({"n": 2})));

        assert!(storage.delete("a").await.unwrap());
        assert!(!storage.delete("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_prefix_queries() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage.set("repo_cache_x", json!({})).await.unwrap();
        storage.set("repo_cache_y", json!({})).await.unwrap();
        storage.set("repo_index", json!({})).await.unwrap();

        assert_eq!(
            storage.keys(Some("repo_cache_")).await.unwrap(),
            vec!["repo_cache_x", "repo_cache_y"]
        );
        assert_eq!(storage.keys(None).await.unwrap().len(), 3);

        storage.clear(Some("repo_cache_")).await.unwrap();
        assert_eq!(storage.keys(None).await.unwrap(), vec!["repo_index"]);
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/cache.db");

        {
            let storage = SqliteStorage::open(&path).unwrap();
            storage.set("k", json!("v")).await.unwrap();
        }

        let reopened = SqliteStorage::open(&path).unwrap();
        assert_eq!(reopened.get("k").await.unwrap(), Some(json!("v")));
    }
}
