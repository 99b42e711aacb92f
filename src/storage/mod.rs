//! Persistent Store: durable, partitioned key-value storage.
//!
//! - [`traits`]: the raw [`PersistentStore`](traits::PersistentStore) contract
//! - [`table`]: typed per-partition access with corrupted-entry dropping
//! - [`memory`]: DashMap backend (volatile)
//! - [`sql`]: SQLite backend via sqlx

pub mod traits;
pub mod table;
pub mod memory;
pub mod sql;

use std::sync::Arc;

use tracing::info;

use traits::{Partition, PersistentStore, StorageError};

/// Schema version written by this build.
pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA_VERSION_KEY: &str = "schema_version";

/// Check the stored schema version, stamping the current one on a fresh store.
///
/// Returns the version found (or written).
pub async fn ensure_schema(store: &Arc<dyn PersistentStore>) -> Result<u32, StorageError> {
    match store.get(Partition::Meta, SCHEMA_VERSION_KEY).await? {
        Some(raw) => {
            let found: u32 = raw.trim().parse().map_err(|_| StorageError::Corruption {
                partition: Partition::Meta.as_str().to_string(),
                key: SCHEMA_VERSION_KEY.to_string(),
                reason: format!("not a version number: {}", raw),
            })?;
            if found > SCHEMA_VERSION {
                return Err(StorageError::SchemaMismatch {
                    found,
                    supported: SCHEMA_VERSION,
                });
            }
            Ok(found)
        }
        None => {
            store
                .put(Partition::Meta, SCHEMA_VERSION_KEY, SCHEMA_VERSION.to_string())
                .await?;
            info!(version = SCHEMA_VERSION, "Initialized store schema version");
            Ok(SCHEMA_VERSION)
        }
    }
}
