use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("No entry '{key}' in partition {partition}")]
    NotFound { partition: String, key: String },
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Insufficient space: {required} bytes required, {available} available")]
    InsufficientSpace { required: usize, available: usize },
    #[error("Corrupted entry '{key}' in partition {partition}: {reason}")]
    Corruption {
        partition: String,
        key: String,
        reason: String,
    },
    #[error("Serialization failed: {0}")]
    Serialization(String),
    #[error("Stored schema version {found} is newer than supported version {supported}")]
    SchemaMismatch { found: u32, supported: u32 },
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    #[error("Entry '{key}' is {from} and cannot become {to}")]
    InvalidTransition { key: String, from: String, to: String },
}

impl StorageError {
    /// True when the store itself is unusable, as opposed to one entry failing.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::SchemaMismatch { .. } | Self::InsufficientSpace { .. }
        )
    }

    pub(crate) fn not_found(partition: Partition, key: &str) -> Self {
        Self::NotFound {
            partition: partition.as_str().to_string(),
            key: key.to_string(),
        }
    }
}

/// Logical partitions of the persistent store.
///
/// Each partition is an independent key space; there are no
/// cross-partition transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Partition {
    SyncQueue,
    CacheData,
    CacheMetadata,
    Conflicts,
    /// Entities targeted by bulk operations
    Records,
    BulkHistory,
    UndoSnapshots,
    /// Store bookkeeping (schema version)
    Meta,
}

impl Partition {
    pub const ALL: [Partition; 8] = [
        Self::SyncQueue,
        Self::CacheData,
        Self::CacheMetadata,
        Self::Conflicts,
        Self::Records,
        Self::BulkHistory,
        Self::UndoSnapshots,
        Self::Meta,
    ];

    /// Stable name used as the on-disk partition key.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SyncQueue => "sync_queue",
            Self::CacheData => "cache_data",
            Self::CacheMetadata => "cache_metadata",
            Self::Conflicts => "conflicts",
            Self::Records => "records",
            Self::BulkHistory => "bulk_history",
            Self::UndoSnapshots => "undo_snapshots",
            Self::Meta => "meta",
        }
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable key-value storage split into [`Partition`]s.
///
/// Values are serialized JSON documents. Every operation is atomic per key.
/// Backends hold no business logic; typed access goes through
/// [`super::table::Table`].
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn put(&self, partition: Partition, key: &str, value: String) -> Result<(), StorageError>;
    async fn get(&self, partition: Partition, key: &str) -> Result<Option<String>, StorageError>;
    /// Deleting a missing key is not an error.
    async fn delete(&self, partition: Partition, key: &str) -> Result<(), StorageError>;
    /// All entries of a partition, in no particular order.
    async fn enumerate(&self, partition: Partition) -> Result<Vec<(String, String)>, StorageError>;
    async fn clear(&self, partition: Partition) -> Result<(), StorageError>;

    /// Number of entries in a partition.
    /// Default implementation falls back to a full enumeration.
    async fn count(&self, partition: Partition) -> Result<usize, StorageError> {
        Ok(self.enumerate(partition).await?.len())
    }
}
