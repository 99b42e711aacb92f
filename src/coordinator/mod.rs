// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Offline engine coordinator.
//!
//! The [`OfflineEngine`] is the single handle callers hold. It owns:
//! - the persistent store (SQLite or in-memory)
//! - the cache engine with priority eviction
//! - the sync queue, its drain loop and the conflict store
//! - the bulk operation orchestrator
//!
//! # Lifecycle
//!
//! ```text
//! Created → Starting → Ready → ShuttingDown → Stopped
//! ```
//!
//! Every operation except state and health queries fails with
//! [`OperationError::NotReady`](crate::error::OperationError::NotReady) outside `Ready`.
//!
//! # Example
//!
//! ```rust,no_run
//! use offline_engine::{OfflineEngine, OfflineEngineConfig, EngineState, CacheCategory};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = OfflineEngineConfig::default();
//! let engine = OfflineEngine::open(config).await.expect("open failed");
//! assert_eq!(engine.state(), EngineState::Created);
//!
//! engine.start().await.expect("start failed");
//! engine
//!     .cache_put("profile", &json!({"name": "Asha"}), CacheCategory::UserProfile, None)
//!     .await
//!     .expect("cache write failed");
//! engine.shutdown().await;
//! # }
//! ```

mod api;
mod lifecycle;
mod types;

pub use types::{EngineHealth, EngineState};

use std::sync::Arc;

use tokio::sync::watch;

use crate::bulk::{BulkOrchestrator, BulkSettings};
use crate::cache::{CacheEngine, CacheLimits};
use crate::clock::{SharedClock, SystemClock};
use crate::config::OfflineEngineConfig;
use crate::conflict::ConflictStore;
use crate::error::OperationError;
use crate::queue::{SyncDrainer, SyncQueue};
use crate::storage::memory::MemoryStore;
use crate::storage::sql::SqlStore;
use crate::storage::traits::{PersistentStore, StorageError};

/// Offline-first persistence, sync queue and bulk operation engine.
///
/// # Thread Safety
///
/// The engine is `Send + Sync`; share it behind an `Arc`. Each component
/// serializes its own mutations.
pub struct OfflineEngine {
    pub(super) config: OfflineEngineConfig,

    /// Engine state (broadcast to watchers)
    pub(super) state: watch::Sender<EngineState>,
    pub(super) state_rx: watch::Receiver<EngineState>,

    pub(super) store: Arc<dyn PersistentStore>,
    /// Direct SqlStore reference so shutdown can close the pool
    pub(super) sql_store: Option<Arc<SqlStore>>,

    pub(super) cache: CacheEngine,
    pub(super) queue: Arc<SyncQueue>,
    pub(super) conflicts: Arc<ConflictStore>,
    pub(super) drainer: SyncDrainer,
    pub(super) bulk: BulkOrchestrator,
}

impl OfflineEngine {
    /// Wire every component over `store`.
    ///
    /// The engine starts in `Created`; call [`start()`](Self::start) before use.
    pub fn new(config: OfflineEngineConfig, store: Arc<dyn PersistentStore>, clock: SharedClock) -> Self {
        let (state_tx, state_rx) = watch::channel(EngineState::Created);

        let cache = CacheEngine::new(store.clone(), clock.clone(), CacheLimits::from(&config));
        let queue = Arc::new(SyncQueue::new(store.clone(), clock.clone(), config.sync_retry()));
        let conflicts = Arc::new(ConflictStore::new(store.clone(), clock.clone()));
        let drainer = SyncDrainer::new(queue.clone(), conflicts.clone(), config.sync_drain_batch_size);
        let bulk = BulkOrchestrator::new(store.clone(), clock, BulkSettings::from(&config))
            .with_sync_queue(queue.clone());

        Self {
            config,
            state: state_tx,
            state_rx,
            store,
            sql_store: None,
            cache,
            queue,
            conflicts,
            drainer,
            bulk,
        }
    }

    /// Build the store from `database_url` (in-memory when unset) with the wall clock.
    pub async fn open(config: OfflineEngineConfig) -> Result<Self, StorageError> {
        let clock: SharedClock = Arc::new(SystemClock);
        match config.database_url.clone() {
            Some(url) => {
                let sql = Arc::new(SqlStore::new(&url).await?);
                let mut engine = Self::new(config, sql.clone(), clock);
                engine.sql_store = Some(sql);
                Ok(engine)
            }
            None => Ok(Self::new(config, Arc::new(MemoryStore::new()), clock)),
        }
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == EngineState::Ready
    }

    #[must_use]
    pub fn config(&self) -> &OfflineEngineConfig {
        &self.config
    }

    pub(super) fn ensure_ready(&self) -> Result<(), OperationError> {
        match self.state() {
            EngineState::Ready => Ok(()),
            state => Err(OperationError::NotReady {
                state: state.to_string(),
            }),
        }
    }

    pub(super) fn set_state(&self, state: EngineState) {
        let _ = self.state.send(state);
        crate::metrics::set_engine_state(&state.to_string());
    }
}
