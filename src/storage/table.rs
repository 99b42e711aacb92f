//! Typed view over one partition of a [`PersistentStore`].
//!
//! A value that no longer deserializes is treated as corrupted: it is
//! logged, counted, deleted from the store and reported as absent. Callers
//! never see a corruption error on read.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use super::traits::{Partition, PersistentStore, StorageError};

pub struct Table<T> {
    store: Arc<dyn PersistentStore>,
    partition: Partition,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Table<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            partition: self.partition,
            _marker: PhantomData,
        }
    }
}

impl<T> Table<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(store: Arc<dyn PersistentStore>, partition: Partition) -> Self {
        Self {
            store,
            partition,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn partition(&self) -> Partition {
        self.partition
    }

    /// Serialize and store; returns the serialized size in bytes.
    pub async fn put(&self, key: &str, value: &T) -> Result<usize, StorageError> {
        let json = serde_json::to_string(value)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let size = json.len();
        let _timer = crate::metrics::LatencyTimer::new(self.partition.as_str(), "put");
        self.store.put(self.partition, key, json).await?;
        Ok(size)
    }

    pub async fn get(&self, key: &str) -> Result<Option<T>, StorageError> {
        let _timer = crate::metrics::LatencyTimer::new(self.partition.as_str(), "get");
        match self.store.get(self.partition, key).await? {
            Some(raw) => self.decode(key, &raw).await,
            None => Ok(None),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.store.delete(self.partition, key).await
    }

    /// All decodable entries; corrupted ones are dropped along the way.
    pub async fn entries(&self) -> Result<Vec<(String, T)>, StorageError> {
        let raw = self.store.enumerate(self.partition).await?;
        let mut out = Vec::with_capacity(raw.len());
        for (key, value) in raw {
            if let Some(decoded) = self.decode(&key, &value).await? {
                out.push((key, decoded));
            }
        }
        Ok(out)
    }

    pub async fn values(&self) -> Result<Vec<T>, StorageError> {
        Ok(self.entries().await?.into_iter().map(|(_, v)| v).collect())
    }

    pub async fn count(&self) -> Result<usize, StorageError> {
        self.store.count(self.partition).await
    }

    pub async fn clear(&self) -> Result<(), StorageError> {
        self.store.clear(self.partition).await
    }

    async fn decode(&self, key: &str, raw: &str) -> Result<Option<T>, StorageError> {
        match serde_json::from_str::<T>(raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(
                    partition = %self.partition,
                    key = %key,
                    error = %e,
                    "Dropping corrupted entry"
                );
                crate::metrics::record_corruption(self.partition.as_str());
                self.store.delete(self.partition, key).await?;
                Ok(None)
            }
        }
    }
}
