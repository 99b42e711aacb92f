// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite storage backend.
//!
//! All partitions share one table:
//! ```sql
//! CREATE TABLE kv_entries (
//!   part TEXT NOT NULL,        -- Partition::as_str()
//!   entry_key TEXT NOT NULL,
//!   payload TEXT NOT NULL,     -- JSON document
//!   updated_at INTEGER NOT NULL,
//!   PRIMARY KEY (part, entry_key)
//! )
//! ```
//!
//! ## sqlx Any Driver Quirks
//!
//! TEXT columns may come back as bytes depending on the driver, so reads try
//! `String` first and fall back to `Vec<u8>`.

use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{any::AnyPoolOptions, AnyPool, Row};
use tracing::{debug, info};

use super::traits::{Partition, PersistentStore, StorageError};
use crate::resilience::retry::{retry, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

fn map_sqlx_err(e: sqlx::Error) -> StorageError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StorageError::Unavailable(e.to_string())
        }
        sqlx::Error::Database(ref db) if db.message().contains("full") => {
            StorageError::Unavailable(format!("database full: {}", db.message()))
        }
        other => StorageError::Backend(other.to_string()),
    }
}

fn read_text(row: &sqlx::any::AnyRow, column: &str) -> Option<String> {
    row.try_get::<String, _>(column).ok().or_else(|| {
        row.try_get::<Vec<u8>, _>(column)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
    })
}

pub struct SqlStore {
    pool: AnyPool,
}

impl SqlStore {
    /// Open (creating if needed) a SQLite database with startup-mode retry.
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        install_drivers();

        if !connection_string.starts_with("sqlite:") {
            return Err(StorageError::Unavailable(format!(
                "unsupported database url: {}",
                connection_string
            )));
        }

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(4)
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
                .map_err(map_sqlx_err)
        })
        .await?;

        let store = Self { pool };
        store.enable_wal_mode().await?;
        store.init_schema().await?;
        info!(url = %connection_string, "SQLite store opened");
        Ok(store)
    }

    /// Concurrent readers during writes, one fsync per commit.
    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        let sql = r#"
            CREATE TABLE IF NOT EXISTS kv_entries (
                part TEXT NOT NULL,
                entry_key TEXT NOT NULL,
                payload TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (part, entry_key)
            )
        "#;

        retry("sql_init_schema", &RetryConfig::startup(), || async {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_err)
        })
        .await?;

        Ok(())
    }

    /// Close the pool, waiting for in-flight queries.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl PersistentStore for SqlStore {
    async fn put(&self, partition: Partition, key: &str, value: String) -> Result<(), StorageError> {
        let now = chrono::Utc::now().timestamp_millis();
        retry("sql_put", &RetryConfig::query(), || async {
            sqlx::query(
                "INSERT INTO kv_entries (part, entry_key, payload, updated_at) VALUES (?, ?, ?, ?) \
                 ON CONFLICT(part, entry_key) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at",
            )
            .bind(partition.as_str())
            .bind(key)
            .bind(value.as_str())
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)
        })
        .await?;
        debug!(partition = %partition, key = %key, "SQL put");
        Ok(())
    }

    async fn get(&self, partition: Partition, key: &str) -> Result<Option<String>, StorageError> {
        let row = retry("sql_get", &RetryConfig::query(), || async {
            sqlx::query("SELECT payload FROM kv_entries WHERE part = ? AND entry_key = ?")
                .bind(partition.as_str())
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_err)
        })
        .await?;

        match row {
            Some(row) => match read_text(&row, "payload") {
                Some(payload) => Ok(Some(payload)),
                // Non-UTF-8 bytes: surface as an undecodable document so the
                // typed layer drops it.
                None => Ok(Some(String::new())),
            },
            None => Ok(None),
        }
    }

    async fn delete(&self, partition: Partition, key: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM kv_entries WHERE part = ? AND entry_key = ?")
            .bind(partition.as_str())
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn enumerate(&self, partition: Partition) -> Result<Vec<(String, String)>, StorageError> {
        let rows = sqlx::query("SELECT entry_key, payload FROM kv_entries WHERE part = ?")
            .bind(partition.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let key = read_text(row, "entry_key")?;
                Some((key, read_text(row, "payload").unwrap_or_default()))
            })
            .collect())
    }

    async fn clear(&self, partition: Partition) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM kv_entries WHERE part = ?")
            .bind(partition.as_str())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn count(&self, partition: Partition) -> Result<usize, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM kv_entries WHERE part = ?")
            .bind(partition.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        let n: i64 = row.try_get("n").map_err(map_sqlx_err)?;
        Ok(usize::try_from(n).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_url(dir: &tempfile::TempDir) -> String {
        format!("sqlite://{}?mode=rwc", dir.path().join("offline.db").display())
    }

    #[tokio::test]
    async fn test_put_get_roundtrip_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqlStore::new(&db_url(&dir)).await.unwrap();

        store.put(Partition::Records, "r1", r#"{"v":1}"#.into()).await.unwrap();
        store.put(Partition::Records, "r1", r#"{"v":2}"#.into()).await.unwrap();

        let value = store.get(Partition::Records, "r1").await.unwrap();
        assert_eq!(value.as_deref(), Some(r#"{"v":2}"#));
        assert_eq!(store.count(Partition::Records).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_partitions_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqlStore::new(&db_url(&dir)).await.unwrap();

        store.put(Partition::CacheData, "k", "1".into()).await.unwrap();
        store.put(Partition::CacheMetadata, "k", "2".into()).await.unwrap();
        store.clear(Partition::CacheData).await.unwrap();

        assert!(store.get(Partition::CacheData, "k").await.unwrap().is_none());
        assert_eq!(store.get(Partition::CacheMetadata, "k").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = db_url(&dir);
        {
            let store = SqlStore::new(&url).await.unwrap();
            store.put(Partition::SyncQueue, "q1", "{}".into()).await.unwrap();
            store.close().await;
        }

        let store = SqlStore::new(&url).await.unwrap();
        let entries = store.enumerate(Partition::SyncQueue).await.unwrap();
        assert_eq!(entries, vec![("q1".to_string(), "{}".to_string())]);
    }

    #[tokio::test]
    async fn test_rejects_non_sqlite_url() {
        let result = SqlStore::new("mysql://localhost/db").await;
        assert!(matches!(result, Err(StorageError::Unavailable(_))));
    }
}
