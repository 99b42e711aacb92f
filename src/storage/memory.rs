use async_trait::async_trait;
use dashmap::DashMap;

use super::traits::{Partition, PersistentStore, StorageError};

/// Volatile store for tests and for running without a database.
pub struct MemoryStore {
    data: DashMap<(Partition, String), String>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Get current entry count across all partitions
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Overwrite a raw value, bypassing serialization. Used to simulate corruption.
    pub fn put_raw(&self, partition: Partition, key: &str, raw: &str) {
        self.data.insert((partition, key.to_string()), raw.to_string());
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn put(&self, partition: Partition, key: &str, value: String) -> Result<(), StorageError> {
        self.data.insert((partition, key.to_string()), value);
        Ok(())
    }

    async fn get(&self, partition: Partition, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .data
            .get(&(partition, key.to_string()))
            .map(|r| r.value().clone()))
    }

    async fn delete(&self, partition: Partition, key: &str) -> Result<(), StorageError> {
        self.data.remove(&(partition, key.to_string()));
        Ok(())
    }

    async fn enumerate(&self, partition: Partition) -> Result<Vec<(String, String)>, StorageError> {
        Ok(self
            .data
            .iter()
            .filter(|r| r.key().0 == partition)
            .map(|r| (r.key().1.clone(), r.value().clone()))
            .collect())
    }

    async fn clear(&self, partition: Partition) -> Result<(), StorageError> {
        self.data.retain(|(p, _), _| *p != partition);
        Ok(())
    }

    async fn count(&self, partition: Partition) -> Result<usize, StorageError> {
        Ok(self.data.iter().filter(|r| r.key().0 == partition).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store = MemoryStore::new();
        store.put(Partition::CacheData, "k1", "\"v1\"".into()).await.unwrap();

        let result = store.get(Partition::CacheData, "k1").await.unwrap();
        assert_eq!(result.as_deref(), Some("\"v1\""));
    }

    #[tokio::test]
    async fn test_partitions_are_independent() {
        let store = MemoryStore::new();
        store.put(Partition::CacheData, "same", "1".into()).await.unwrap();
        store.put(Partition::Conflicts, "same", "2".into()).await.unwrap();

        assert_eq!(store.get(Partition::CacheData, "same").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.get(Partition::Conflicts, "same").await.unwrap().as_deref(), Some("2"));
        assert!(store.get(Partition::SyncQueue, "same").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_nonexistent_is_ok() {
        let store = MemoryStore::new();
        assert!(store.delete(Partition::Records, "missing").await.is_ok());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = MemoryStore::new();
        store.put(Partition::Records, "id", "1".into()).await.unwrap();
        store.put(Partition::Records, "id", "2".into()).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(Partition::Records, "id").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_enumerate_and_clear_scoped_to_partition() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.put(Partition::SyncQueue, &format!("q{}", i), "{}".into()).await.unwrap();
        }
        store.put(Partition::Meta, "schema_version", "1".into()).await.unwrap();

        assert_eq!(store.enumerate(Partition::SyncQueue).await.unwrap().len(), 5);
        assert_eq!(store.count(Partition::SyncQueue).await.unwrap(), 5);

        store.clear(Partition::SyncQueue).await.unwrap();
        assert_eq!(store.count(Partition::SyncQueue).await.unwrap(), 0);
        assert_eq!(store.count(Partition::Meta).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        use std::sync::Arc;

        let store = Arc::new(MemoryStore::new());
        let mut handles = vec![];

        for batch in 0..10 {
            let store_clone = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..10 {
                    let key = format!("batch-{}-item-{}", batch, i);
                    store_clone.put(Partition::Records, &key, "{}".into()).await.unwrap();
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.len(), 100);
    }
}
