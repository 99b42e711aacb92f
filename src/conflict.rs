//! Conflict Store: divergent local/server versions awaiting a decision.
//!
//! One unresolved conflict per item id; recording again replaces it. Nothing
//! here merges automatically. Callers pick a [`ResolutionStrategy`] and apply
//! [`Conflict::resolved_data`] themselves, then call [`ConflictStore::resolve`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::clock::SharedClock;
use crate::storage::table::Table;
use crate::storage::traits::{Partition, PersistentStore, StorageError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub item_id: String,
    pub item_type: String,
    pub local_data: Value,
    pub server_data: Value,
    pub local_timestamp: DateTime<Utc>,
    pub server_timestamp: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Local,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStrategy {
    PreferServer,
    PreferLocal,
    /// Whichever side [`Conflict::preferred_side`] picks
    LatestWins,
    /// Server object with local fields laid over it
    Merge,
}

impl Conflict {
    /// Local wins only when strictly newer; ties go to the server.
    #[must_use]
    pub fn preferred_side(&self) -> Side {
        if self.local_timestamp > self.server_timestamp {
            Side::Local
        } else {
            Side::Server
        }
    }

    #[must_use]
    pub fn resolved_data(&self, strategy: ResolutionStrategy) -> Value {
        match strategy {
            ResolutionStrategy::PreferServer => self.server_data.clone(),
            ResolutionStrategy::PreferLocal => self.local_data.clone(),
            ResolutionStrategy::LatestWins => match self.preferred_side() {
                Side::Local => self.local_data.clone(),
                Side::Server => self.server_data.clone(),
            },
            ResolutionStrategy::Merge => match (&self.server_data, &self.local_data) {
                (Value::Object(server), Value::Object(local)) => {
                    let mut merged = server.clone();
                    for (k, v) in local {
                        merged.insert(k.clone(), v.clone());
                    }
                    Value::Object(merged)
                }
                // Not both objects: nothing to merge field-wise
                _ => self.resolved_data(ResolutionStrategy::LatestWins),
            },
        }
    }
}

pub struct ConflictStore {
    table: Table<Conflict>,
    clock: SharedClock,
}

impl ConflictStore {
    pub fn new(store: Arc<dyn PersistentStore>, clock: SharedClock) -> Self {
        Self {
            table: Table::new(store, Partition::Conflicts),
            clock,
        }
    }

    /// Record a conflict for `item_id`, replacing any previous one.
    pub async fn record(
        &self,
        item_id: &str,
        item_type: &str,
        local_data: Value,
        server_data: Value,
        local_timestamp: DateTime<Utc>,
        server_timestamp: DateTime<Utc>,
    ) -> Result<Conflict, StorageError> {
        let conflict = Conflict {
            item_id: item_id.to_string(),
            item_type: item_type.to_string(),
            local_data,
            server_data,
            local_timestamp,
            server_timestamp,
            detected_at: self.clock.now(),
        };
        self.table.put(item_id, &conflict).await?;
        info!(item_id = %item_id, item_type = %item_type, "Recorded sync conflict");
        Ok(conflict)
    }

    pub async fn get(&self, item_id: &str) -> Result<Option<Conflict>, StorageError> {
        self.table.get(item_id).await
    }

    /// Oldest detection first.
    pub async fn list(&self) -> Result<Vec<Conflict>, StorageError> {
        let mut conflicts = self.table.values().await?;
        conflicts.sort_by(|a, b| {
            a.detected_at
                .cmp(&b.detected_at)
                .then_with(|| a.item_id.cmp(&b.item_id))
        });
        Ok(conflicts)
    }

    /// Remove the conflict; false when none was recorded.
    pub async fn resolve(&self, item_id: &str) -> Result<bool, StorageError> {
        if self.table.get(item_id).await?.is_none() {
            return Ok(false);
        }
        self.table.delete(item_id).await?;
        debug!(item_id = %item_id, "Resolved conflict");
        Ok(true)
    }

    pub async fn count(&self) -> Result<usize, StorageError> {
        self.table.count().await
    }
}
