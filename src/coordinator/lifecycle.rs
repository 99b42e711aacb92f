//! Engine lifecycle management: start and shutdown.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::EngineError;
use crate::storage::ensure_schema;

use super::{EngineState, OfflineEngine};

/// How long shutdown waits for a cancelled bulk run to finish its current item.
const BULK_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

impl OfflineEngine {
    /// Start the engine.
    ///
    /// Startup flow:
    /// 1. Check the stored schema version (newer than supported fails the start)
    /// 2. Rebuild the cache index and drop expired entries
    /// 3. Return queue items stuck `in_progress` by a crash to `pending`
    /// 4. Ready
    ///
    /// On failure the engine goes back to `Created` and may be started again.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<(), EngineError> {
        match self.state() {
            EngineState::Created => {}
            EngineState::Ready => return Ok(()),
            state => {
                return Err(crate::error::OperationError::NotReady {
                    state: state.to_string(),
                }
                .into())
            }
        }

        let startup_start = Instant::now();
        info!("Starting offline engine...");
        self.set_state(EngineState::Starting);

        match self.run_startup().await {
            Ok(()) => {
                self.set_state(EngineState::Ready);
                crate::metrics::record_startup_total(startup_start.elapsed());
                info!(
                    elapsed_ms = startup_start.elapsed().as_millis() as u64,
                    "Offline engine ready"
                );
                Ok(())
            }
            Err(e) => {
                crate::metrics::record_error("engine", "start", e.code());
                warn!(error = %e, "Offline engine failed to start");
                self.set_state(EngineState::Created);
                Err(e)
            }
        }
    }

    async fn run_startup(&self) -> Result<(), EngineError> {
        // ========== PHASE 1: Schema ==========
        let phase_start = Instant::now();
        let version = ensure_schema(&self.store).await?;
        crate::metrics::record_startup_phase("schema", phase_start.elapsed());
        info!(schema_version = version, "Schema verified");

        // ========== PHASE 2: Cache index ==========
        let phase_start = Instant::now();
        let loaded = self.cache.load().await?;
        let expired = self.cache.cleanup_expired().await?;
        crate::metrics::record_startup_phase("cache_load", phase_start.elapsed());
        info!(loaded, expired, "Cache index rebuilt");

        // ========== PHASE 3: Sync queue ==========
        let phase_start = Instant::now();
        let queued = self.queue.load().await?;
        let recovered = self.queue.recover_in_flight().await?;
        crate::metrics::record_startup_phase("queue_recovery", phase_start.elapsed());
        if recovered > 0 {
            warn!(recovered, "Returned interrupted sync items to pending");
        }
        info!(queued, "Sync queue loaded");

        Ok(())
    }

    /// Stop accepting calls.
    ///
    /// An active bulk run is cancelled and allowed to finish its current item.
    /// The SQLite pool, if any, is closed last.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        if matches!(self.state(), EngineState::ShuttingDown | EngineState::Stopped) {
            return;
        }

        let shutdown_start = Instant::now();
        info!("Initiating offline engine shutdown...");
        self.set_state(EngineState::ShuttingDown);

        if let Some(operation_id) = self.bulk.cancel_active() {
            info!(operation_id = %operation_id, "Cancelling active bulk operation");
            let mut bulk_state = self.bulk.state_receiver();
            let wait = bulk_state.wait_for(|state| !state.is_running());
            if tokio::time::timeout(BULK_DRAIN_TIMEOUT, wait).await.is_err() {
                warn!(operation_id = %operation_id, "Bulk operation did not stop before shutdown timeout");
            }
        }

        if let Some(ref sql) = self.sql_store {
            sql.close().await;
        }

        self.set_state(EngineState::Stopped);
        crate::metrics::record_startup_phase("shutdown", shutdown_start.elapsed());
        info!("Offline engine shutdown complete");
    }
}
