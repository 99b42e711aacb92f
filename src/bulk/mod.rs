// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bulk Operation Orchestrator: approve, reject or export a set of OD requests.
//!
//! # Run lifecycle
//!
//! ```text
//!   Idle ──► Validating ──(bad input)──► Idle            ValidationError, nothing touched
//!                │
//!                ▼
//!            Executing ── per id, strictly in order:
//!                │          cancel flag set? ── stop
//!                │          load ─► check pending ─► mutate ─► enqueue follow-up sync
//!                │          item error ─► errors[] (batch continues)
//!                │          fatal store error ─► Failed (call errors)
//!                │          progress event ─► yield
//!                ▼
//!        Completed | Cancelled ── history entry + undo snapshot (approval/rejection)
//! ```
//!
//! Only one run is active at a time. The undo slot holds the snapshot of the
//! most recent undoable run; any later run supersedes it.

pub mod export;
pub mod types;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::{to_chrono, SharedClock};
use crate::config::OfflineEngineConfig;
use crate::error::{EngineError, OperationError, ValidationError};
use crate::queue::{SyncOperation, SyncQueue};
use crate::record::{OdRequest, RecordStore, OD_REQUEST_TYPE};
use crate::storage::table::Table;
use crate::storage::traits::{Partition, PersistentStore, StorageError};

pub use types::{
    BulkOperationProgress, BulkOperationResult, BulkOperationStatus, BulkOperationType, BulkState,
    ExportDocument, ExportFormat, UndoSnapshot,
};

const UNDO_SLOT: &str = "last";

/// Tunables of the orchestrator.
#[derive(Debug, Clone)]
pub struct BulkSettings {
    pub max_batch_size: usize,
    pub history_limit: usize,
    /// Queue priority of follow-up sync items
    pub sync_priority: i32,
    pub undo_window: Duration,
    pub reviewer_id: Option<String>,
    pub progress_capacity: usize,
}

impl Default for BulkSettings {
    fn default() -> Self {
        Self::from(&OfflineEngineConfig::default())
    }
}

impl From<&OfflineEngineConfig> for BulkSettings {
    fn from(config: &OfflineEngineConfig) -> Self {
        Self {
            max_batch_size: config.bulk_max_batch_size,
            history_limit: config.bulk_history_limit,
            sync_priority: config.bulk_sync_priority,
            undo_window: config.undo_window(),
            reviewer_id: config.reviewer_id.clone(),
            progress_capacity: config.progress_channel_capacity,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HistoryEntry {
    sequence: u64,
    result: BulkOperationResult,
}

struct ActiveRun {
    operation_id: String,
    cancel: Arc<AtomicBool>,
}

/// Clears the single-flight slot when the run ends, however it ends.
struct ActiveGuard<'a> {
    slot: &'a Mutex<Option<ActiveRun>>,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        *self.slot.lock() = None;
    }
}

/// Why a single item did not go through.
enum ItemFailure {
    Rejected(String),
    Store(StorageError),
}

impl From<StorageError> for ItemFailure {
    fn from(e: StorageError) -> Self {
        Self::Store(e)
    }
}

pub struct BulkOrchestrator {
    records: RecordStore,
    history: Table<HistoryEntry>,
    snapshots: Table<UndoSnapshot>,
    queue: Option<Arc<SyncQueue>>,
    clock: SharedClock,
    settings: BulkSettings,
    progress_tx: broadcast::Sender<BulkOperationProgress>,
    state_tx: watch::Sender<BulkState>,
    active: Mutex<Option<ActiveRun>>,
}

impl BulkOrchestrator {
    pub fn new(store: Arc<dyn PersistentStore>, clock: SharedClock, settings: BulkSettings) -> Self {
        let (progress_tx, _) = broadcast::channel(settings.progress_capacity.max(1));
        let (state_tx, _) = watch::channel(BulkState::Idle);
        Self {
            records: RecordStore::new(store.clone()),
            history: Table::new(store.clone(), Partition::BulkHistory),
            snapshots: Table::new(store, Partition::UndoSnapshots),
            queue: None,
            clock,
            settings,
            progress_tx,
            state_tx,
            active: Mutex::new(None),
        }
    }

    /// Enqueue follow-up sync mutations for every change a run or undo makes.
    #[must_use]
    pub fn with_sync_queue(mut self, queue: Arc<SyncQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    #[must_use]
    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    #[must_use]
    pub fn subscribe_progress(&self) -> broadcast::Receiver<BulkOperationProgress> {
        self.progress_tx.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> BulkState {
        *self.state_tx.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<BulkState> {
        self.state_tx.subscribe()
    }

    /// Id of the run in progress, if any.
    #[must_use]
    pub fn active_operation(&self) -> Option<String> {
        self.active.lock().as_ref().map(|run| run.operation_id.clone())
    }

    pub async fn perform_bulk_approval(
        &self,
        ids: &[String],
        reason: &str,
    ) -> Result<BulkOperationResult, EngineError> {
        self.run(BulkOperationType::Approval, ids, reason, None).await
    }

    pub async fn perform_bulk_rejection(
        &self,
        ids: &[String],
        reason: &str,
    ) -> Result<BulkOperationResult, EngineError> {
        self.run(BulkOperationType::Rejection, ids, reason, None).await
    }

    /// Export records as `csv` or `json`.
    pub async fn perform_bulk_export(
        &self,
        ids: &[String],
        format: &str,
    ) -> Result<BulkOperationResult, EngineError> {
        let format: ExportFormat = format.parse()?;
        self.run(BulkOperationType::Export, ids, "", Some(format)).await
    }

    /// Flag the running operation to stop before its next item.
    ///
    /// Returns false when `operation_id` is not the active run.
    pub fn cancel_bulk_operation(&self, operation_id: &str) -> bool {
        match self.active.lock().as_ref() {
            Some(run) if run.operation_id == operation_id => {
                run.cancel.store(true, Ordering::SeqCst);
                info!(operation_id = %operation_id, "Bulk operation cancellation requested");
                true
            }
            _ => false,
        }
    }

    /// Stop whatever is running. Used on shutdown.
    pub(crate) fn cancel_active(&self) -> Option<String> {
        let guard = self.active.lock();
        guard.as_ref().map(|run| {
            run.cancel.store(true, Ordering::SeqCst);
            run.operation_id.clone()
        })
    }

    /// Past runs, newest first.
    pub async fn bulk_operation_history(&self) -> Result<Vec<BulkOperationResult>, StorageError> {
        let mut entries = self.history.values().await?;
        entries.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        Ok(entries.into_iter().map(|e| e.result).collect())
    }

    /// Whether an undo would currently be applied.
    pub async fn can_undo(&self) -> Result<bool, StorageError> {
        Ok(match self.snapshots.get(UNDO_SLOT).await? {
            Some(snapshot) => !self.is_expired(&snapshot),
            None => false,
        })
    }

    /// Undo the most recent approval/rejection; false when nothing was undone.
    pub async fn undo_last_bulk_operation(&self) -> bool {
        match self.try_undo_last_bulk_operation().await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "Undo not applied");
                false
            }
        }
    }

    /// Undo the most recent approval/rejection, returning how many records
    /// were restored.
    #[tracing::instrument(skip(self))]
    pub async fn try_undo_last_bulk_operation(&self) -> Result<usize, EngineError> {
        let _guard = self.claim("undo".to_string(), Arc::new(AtomicBool::new(false)))?;

        let Some(snapshot) = self.snapshots.get(UNDO_SLOT).await? else {
            crate::metrics::record_undo("unavailable");
            return Err(OperationError::UndoUnavailable.into());
        };

        if self.is_expired(&snapshot) {
            self.snapshots.delete(UNDO_SLOT).await?;
            self.mark_not_undoable(&snapshot.operation_id).await?;
            crate::metrics::record_undo("expired");
            return Err(OperationError::UndoExpired {
                operation_id: snapshot.operation_id,
            }
            .into());
        }

        for prior in snapshot.prior.values() {
            self.records.put(prior).await?;
            self.enqueue_follow_up(prior, SyncOperation::Update).await?;
        }

        self.snapshots.delete(UNDO_SLOT).await?;
        self.mark_not_undoable(&snapshot.operation_id).await?;

        crate::metrics::record_undo("restored");
        info!(
            operation_id = %snapshot.operation_id,
            restored = snapshot.prior.len(),
            "Undid bulk operation"
        );
        Ok(snapshot.prior.len())
    }

    #[tracing::instrument(skip_all, fields(kind = %kind, items = ids.len()))]
    async fn run(
        &self,
        kind: BulkOperationType,
        ids: &[String],
        reason: &str,
        format: Option<ExportFormat>,
    ) -> Result<BulkOperationResult, EngineError> {
        let operation_id = Uuid::new_v4().to_string();
        let cancel = Arc::new(AtomicBool::new(false));
        let _guard = self.claim(operation_id.clone(), cancel.clone())?;

        self.set_state(BulkState::Validating);
        if let Err(e) = self.validate(kind, ids, reason) {
            self.set_state(BulkState::Idle);
            return Err(e.into());
        }

        self.set_state(BulkState::Executing);
        let started = Instant::now();
        match self.execute(&operation_id, kind, ids, reason, format, &cancel).await {
            Ok(result) => {
                self.set_state(match result.status {
                    BulkOperationStatus::Completed => BulkState::Completed,
                    BulkOperationStatus::Cancelled => BulkState::Cancelled,
                });
                crate::metrics::record_bulk_operation(kind.as_str(), result.status.as_str(), started.elapsed());
                crate::metrics::record_bulk_items(kind.as_str(), result.successful_items, result.failed_items);
                if result.has_failures() {
                    warn!(
                        operation_id = %operation_id,
                        status = result.status.as_str(),
                        succeeded = result.successful_items,
                        failed = result.failed_items,
                        errors = ?result.errors,
                        "Bulk operation finished with failures"
                    );
                } else {
                    info!(
                        operation_id = %operation_id,
                        status = result.status.as_str(),
                        succeeded = result.successful_items,
                        "Bulk operation finished"
                    );
                }
                Ok(result)
            }
            Err(e) => {
                self.set_state(BulkState::Failed);
                crate::metrics::record_bulk_operation(kind.as_str(), "failed", started.elapsed());
                error!(operation_id = %operation_id, error = %e, "Bulk operation aborted");
                Err(e.into())
            }
        }
    }

    fn validate(&self, kind: BulkOperationType, ids: &[String], reason: &str) -> Result<(), ValidationError> {
        if ids.is_empty() {
            return Err(ValidationError::EmptySelection);
        }
        if kind.requires_reason() && reason.trim().is_empty() {
            return Err(ValidationError::EmptyReason {
                operation: kind.as_str().to_string(),
            });
        }
        if ids.len() > self.settings.max_batch_size {
            return Err(ValidationError::BatchSizeExceeded {
                size: ids.len(),
                max: self.settings.max_batch_size,
            });
        }
        Ok(())
    }

    /// Process every id; only a fatal store error escapes.
    async fn execute(
        &self,
        operation_id: &str,
        kind: BulkOperationType,
        ids: &[String],
        reason: &str,
        format: Option<ExportFormat>,
        cancel: &AtomicBool,
    ) -> Result<BulkOperationResult, StorageError> {
        let start_time = self.clock.now();
        self.supersede_snapshot().await?;

        let total = ids.len();
        let mut successful = 0usize;
        let mut errors = Vec::new();
        let mut prior: BTreeMap<String, OdRequest> = BTreeMap::new();
        let mut exported = Vec::new();
        let mut status = BulkOperationStatus::Completed;

        for (index, id) in ids.iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                status = BulkOperationStatus::Cancelled;
                info!(operation_id = %operation_id, processed = index, total, "Bulk operation cancelled");
                let last = index.checked_sub(1).map_or("", |i| ids[i].as_str());
                let _ = self.progress_tx.send(
                    BulkOperationProgress::new(operation_id, index, total, last)
                        .with_message(format!("Cancelled after {} of {} items", index, total)),
                );
                break;
            }

            let outcome = match kind {
                BulkOperationType::Export => self.load_for_export(id).await.map(|r| exported.push(r)),
                _ => self.apply_review(kind, id, reason).await.map(|before| {
                    prior.entry(id.clone()).or_insert(before);
                }),
            };

            let failures_before = errors.len();
            match outcome {
                Ok(()) => successful += 1,
                Err(ItemFailure::Rejected(message)) => errors.push(format!("{}: {}", id, message)),
                Err(ItemFailure::Store(e)) if e.is_fatal() => {
                    error!(
                        operation_id = %operation_id,
                        item_id = %id,
                        mutated = ?prior.keys().collect::<Vec<_>>(),
                        error = %e,
                        "Store unusable during bulk operation"
                    );
                    return Err(e);
                }
                Err(ItemFailure::Store(e)) => {
                    warn!(operation_id = %operation_id, item_id = %id, error = %e, "Item failed on storage error");
                    errors.push(format!("{}: {}", id, e));
                }
            }

            let mut event = BulkOperationProgress::new(operation_id, index + 1, total, id);
            if errors.len() > failures_before {
                event = event.with_message(errors[errors.len() - 1].clone());
            }
            let _ = self.progress_tx.send(event);
            tokio::task::yield_now().await;
        }

        let export = match format {
            Some(format) if kind == BulkOperationType::Export => Some(export::render(format, &exported)?),
            _ => None,
        };

        let mut can_undo = kind.is_undoable() && !prior.is_empty();
        if can_undo {
            let snapshot = UndoSnapshot {
                operation_id: operation_id.to_string(),
                operation_type: kind,
                created_at: self.clock.now(),
                prior,
            };
            if let Err(e) = self.snapshots.put(UNDO_SLOT, &snapshot).await {
                if e.is_fatal() {
                    return Err(e);
                }
                warn!(operation_id = %operation_id, error = %e, "Undo snapshot not saved, run cannot be undone");
                can_undo = false;
            }
        }

        let result = BulkOperationResult {
            operation_id: operation_id.to_string(),
            operation_type: kind,
            status,
            total_items: total,
            successful_items: successful,
            failed_items: errors.len(),
            errors,
            start_time,
            end_time: Some(self.clock.now()),
            can_undo,
            export,
        };

        // The records already changed; only an unusable store fails the call now
        if let Err(e) = self.append_history(&result).await {
            if e.is_fatal() {
                return Err(e);
            }
            warn!(operation_id = %operation_id, error = %e, "Bulk result not added to history");
        }
        Ok(result)
    }

    /// Approve or reject one record; returns its state before the change.
    async fn apply_review(
        &self,
        kind: BulkOperationType,
        id: &str,
        reason: &str,
    ) -> Result<OdRequest, ItemFailure> {
        let Some(mut record) = self.records.get(id).await? else {
            return Err(ItemFailure::Rejected("record not found".to_string()));
        };
        if !record.is_pending() {
            let invalid = ValidationError::InvalidState {
                item_id: id.to_string(),
                status: record.status.as_str().to_string(),
                operation: kind.as_str().to_string(),
            };
            return Err(ItemFailure::Rejected(invalid.to_string()));
        }

        let before = record.clone();
        let now = self.clock.now();
        let reviewer = self.settings.reviewer_id.as_deref();
        let operation = match kind {
            BulkOperationType::Rejection => {
                record.reject(reviewer, reason, now);
                SyncOperation::Reject
            }
            _ => {
                record.approve(reviewer, reason, now);
                SyncOperation::Approve
            }
        };
        self.records.put(&record).await?;

        if let Err(e) = self.enqueue_follow_up(&record, operation).await {
            if e.is_fatal() {
                return Err(e.into());
            }
            warn!(item_id = %id, error = %e, "Could not queue follow-up sync");
        }
        Ok(before)
    }

    async fn load_for_export(&self, id: &str) -> Result<OdRequest, ItemFailure> {
        self.records
            .get(id)
            .await?
            .ok_or_else(|| ItemFailure::Rejected("record not found".to_string()))
    }

    async fn enqueue_follow_up(&self, record: &OdRequest, operation: SyncOperation) -> Result<(), StorageError> {
        let Some(queue) = &self.queue else {
            return Ok(());
        };
        let payload = serde_json::to_value(record).map_err(|e| StorageError::Serialization(e.to_string()))?;
        queue
            .enqueue(&record.id, OD_REQUEST_TYPE, operation, payload, self.settings.sync_priority)
            .await?;
        Ok(())
    }

    /// A new run takes over the undo slot.
    async fn supersede_snapshot(&self) -> Result<(), StorageError> {
        if let Some(previous) = self.snapshots.get(UNDO_SLOT).await? {
            self.snapshots.delete(UNDO_SLOT).await?;
            self.mark_not_undoable(&previous.operation_id).await?;
            debug!(operation_id = %previous.operation_id, "Undo snapshot superseded");
        }
        Ok(())
    }

    async fn append_history(&self, result: &BulkOperationResult) -> Result<(), StorageError> {
        let mut entries = self.history.entries().await?;
        let sequence = entries.iter().map(|(_, e)| e.sequence + 1).max().unwrap_or(0);
        self.history
            .put(
                &result.operation_id,
                &HistoryEntry {
                    sequence,
                    result: result.clone(),
                },
            )
            .await?;

        // Keep the newest `history_limit` entries, counting the one just added
        entries.sort_by(|a, b| b.1.sequence.cmp(&a.1.sequence));
        let keep = self.settings.history_limit.saturating_sub(1);
        for (key, _) in entries.iter().skip(keep) {
            self.history.delete(key).await?;
        }
        Ok(())
    }

    async fn mark_not_undoable(&self, operation_id: &str) -> Result<(), StorageError> {
        if let Some(mut entry) = self.history.get(operation_id).await? {
            if entry.result.can_undo {
                entry.result.can_undo = false;
                self.history.put(operation_id, &entry).await?;
            }
        }
        Ok(())
    }

    fn is_expired(&self, snapshot: &UndoSnapshot) -> bool {
        self.clock.now() - snapshot.created_at > to_chrono(self.settings.undo_window)
    }

    fn claim(&self, operation_id: String, cancel: Arc<AtomicBool>) -> Result<ActiveGuard<'_>, OperationError> {
        let mut slot = self.active.lock();
        if let Some(run) = slot.as_ref() {
            return Err(OperationError::AlreadyInProgress {
                operation_id: run.operation_id.clone(),
            });
        }
        *slot = Some(ActiveRun { operation_id, cancel });
        Ok(ActiveGuard { slot: &self.active })
    }

    fn set_state(&self, state: BulkState) {
        self.state_tx.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::queue::SyncStatus;
    use crate::record::OdStatus;
    use crate::resilience::retry::RetryConfig;
    use crate::storage::memory::MemoryStore;

    struct Fixture {
        orchestrator: BulkOrchestrator,
        clock: Arc<ManualClock>,
        queue: Arc<SyncQueue>,
    }

    async fn fixture_with(settings: BulkSettings, ids: &[&str]) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new());
        let queue = Arc::new(SyncQueue::new(store.clone(), clock.clone(), RetryConfig::sync_queue()));
        let orchestrator = BulkOrchestrator::new(store, clock.clone(), settings).with_sync_queue(queue.clone());
        for id in ids {
            let now = clock.now();
            let record = OdRequest::new(*id, "s1", "21CS001", "Asha", now, vec![1], "Hackathon", now);
            orchestrator.records().put(&record).await.unwrap();
        }
        Fixture { orchestrator, clock, queue }
    }

    async fn fixture(ids: &[&str]) -> Fixture {
        fixture_with(BulkSettings::default(), ids).await
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    async fn status_of(f: &Fixture, id: &str) -> OdStatus {
        f.orchestrator.records().get(id).await.unwrap().unwrap().status
    }

    #[tokio::test]
    async fn test_validation_rejects_before_mutation() {
        let f = fixture(&["a"]).await;

        let err = f.orchestrator.perform_bulk_approval(&[], "ok").await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(ValidationError::EmptySelection)));

        let err = f.orchestrator.perform_bulk_rejection(&ids(&["a"]), "  ").await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(ValidationError::EmptyReason { .. })));

        let too_many: Vec<String> = (0..101).map(|i| format!("id{}", i)).collect();
        let err = f.orchestrator.perform_bulk_approval(&too_many, "ok").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::BatchSizeExceeded { size: 101, max: 100 })
        ));

        let err = f.orchestrator.perform_bulk_export(&ids(&["a"]), "pdf").await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(ValidationError::UnsupportedFormat(_))));

        assert_eq!(status_of(&f, "a").await, OdStatus::Pending);
        assert!(f.orchestrator.bulk_operation_history().await.unwrap().is_empty());
        assert_eq!(f.orchestrator.state(), BulkState::Idle);
    }

    #[tokio::test]
    async fn test_partial_failure_and_undo() {
        let f = fixture(&["a", "c"]).await;

        let result = f.orchestrator.perform_bulk_approval(&ids(&["a", "b", "c"]), "ok").await.unwrap();
        assert_eq!(result.total_items, 3);
        assert_eq!(result.successful_items, 2);
        assert_eq!(result.failed_items, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("b:"));
        assert!(result.can_undo);
        assert_eq!(result.status, BulkOperationStatus::Completed);
        assert_eq!(f.orchestrator.state(), BulkState::Completed);
        assert_eq!(status_of(&f, "a").await, OdStatus::Approved);

        assert!(f.orchestrator.undo_last_bulk_operation().await);
        assert_eq!(status_of(&f, "a").await, OdStatus::Pending);
        assert_eq!(status_of(&f, "c").await, OdStatus::Pending);
        assert!(f.orchestrator.records().get("b").await.unwrap().is_none());

        // Consumed once
        assert!(!f.orchestrator.undo_last_bulk_operation().await);
        let history = f.orchestrator.bulk_operation_history().await.unwrap();
        assert!(!history[0].can_undo);
    }

    #[tokio::test]
    async fn test_only_pending_records_are_reviewed() {
        let f = fixture(&["a"]).await;
        f.orchestrator.perform_bulk_rejection(&ids(&["a"]), "no proof").await.unwrap();

        let result = f.orchestrator.perform_bulk_approval(&ids(&["a"]), "ok").await.unwrap();
        assert_eq!(result.failed_items, 1);
        assert!(result.errors[0].contains("rejected"));
        assert!(!result.can_undo);
        assert_eq!(status_of(&f, "a").await, OdStatus::Rejected);
    }

    #[tokio::test]
    async fn test_rejection_sets_reason_and_reviewer() {
        let settings = BulkSettings {
            reviewer_id: Some("staff-7".into()),
            ..BulkSettings::default()
        };
        let f = fixture_with(settings, &["a"]).await;
        f.orchestrator.perform_bulk_rejection(&ids(&["a"]), "missing letter").await.unwrap();

        let record = f.orchestrator.records().get("a").await.unwrap().unwrap();
        assert_eq!(record.rejection_reason.as_deref(), Some("missing letter"));
        assert_eq!(record.approved_by.as_deref(), Some("staff-7"));
        assert_eq!(record.approved_at, Some(f.clock.now()));
    }

    #[tokio::test]
    async fn test_follow_up_sync_items() {
        let f = fixture(&["a", "b"]).await;
        f.orchestrator.perform_bulk_approval(&ids(&["a", "b"]), "ok").await.unwrap();

        let queued = f.queue.items().await.unwrap();
        assert_eq!(queued.len(), 2);
        assert!(queued.iter().all(|i| i.operation == SyncOperation::Approve));
        assert!(queued.iter().all(|i| i.priority == 10 && i.status == SyncStatus::Pending));

        f.orchestrator.undo_last_bulk_operation().await;
        let updates = f
            .queue
            .items()
            .await
            .unwrap()
            .into_iter()
            .filter(|i| i.operation == SyncOperation::Update)
            .count();
        assert_eq!(updates, 2);
    }

    #[tokio::test]
    async fn test_export_renders_and_is_not_undoable() {
        let f = fixture(&["a", "b"]).await;
        let result = f.orchestrator.perform_bulk_export(&ids(&["a", "b", "zz"]), "csv").await.unwrap();

        assert_eq!(result.successful_items, 2);
        assert_eq!(result.failed_items, 1);
        assert!(!result.can_undo);
        let doc = result.export.unwrap();
        assert_eq!(doc.format, ExportFormat::Csv);
        assert_eq!(doc.record_count, 2);
        assert!(!f.orchestrator.undo_last_bulk_operation().await);
    }

    #[tokio::test]
    async fn test_export_supersedes_undo() {
        let f = fixture(&["a"]).await;
        f.orchestrator.perform_bulk_approval(&ids(&["a"]), "ok").await.unwrap();
        f.orchestrator.perform_bulk_export(&ids(&["a"]), "json").await.unwrap();

        let err = f.orchestrator.try_undo_last_bulk_operation().await.unwrap_err();
        assert!(matches!(err, EngineError::Operation(OperationError::UndoUnavailable)));
        assert_eq!(status_of(&f, "a").await, OdStatus::Approved);

        let history = f.orchestrator.bulk_operation_history().await.unwrap();
        assert_eq!(history[0].operation_type, BulkOperationType::Export);
        assert!(!history[1].can_undo);
    }

    #[tokio::test]
    async fn test_undo_window_expires() {
        let f = fixture(&["a"]).await;
        f.orchestrator.perform_bulk_approval(&ids(&["a"]), "ok").await.unwrap();
        assert!(f.orchestrator.can_undo().await.unwrap());

        f.clock.advance(Duration::from_secs(1801));
        assert!(!f.orchestrator.can_undo().await.unwrap());
        let err = f.orchestrator.try_undo_last_bulk_operation().await.unwrap_err();
        assert!(matches!(err, EngineError::Operation(OperationError::UndoExpired { .. })));
        assert_eq!(status_of(&f, "a").await, OdStatus::Approved);
    }

    #[tokio::test]
    async fn test_history_newest_first_and_pruned() {
        let settings = BulkSettings {
            history_limit: 3,
            ..BulkSettings::default()
        };
        let f = fixture_with(settings, &["a"]).await;
        for _ in 0..5 {
            f.orchestrator.perform_bulk_export(&ids(&["a"]), "json").await.unwrap();
        }
        let last = f.orchestrator.perform_bulk_approval(&ids(&["a"]), "ok").await.unwrap();

        let history = f.orchestrator.bulk_operation_history().await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].operation_id, last.operation_id);
    }

    #[tokio::test]
    async fn test_progress_events_per_item() {
        let f = fixture(&["a", "b", "c"]).await;
        let mut rx = f.orchestrator.subscribe_progress();

        f.orchestrator.perform_bulk_approval(&ids(&["a", "b", "c"]), "ok").await.unwrap();

        let mut processed = Vec::new();
        while let Ok(p) = rx.try_recv() {
            processed.push(p.processed_items);
        }
        assert_eq!(processed, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_cancel_unknown_operation_is_noop() {
        let f = fixture(&["a"]).await;
        assert!(!f.orchestrator.cancel_bulk_operation("nope"));
        assert!(f.orchestrator.active_operation().is_none());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_cancel_mid_batch() {
        let names: Vec<String> = (0..20).map(|i| format!("r{}", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let f = fixture(&refs).await;
        let orchestrator = Arc::new(f.orchestrator);
        let mut rx = orchestrator.subscribe_progress();

        let runner = orchestrator.clone();
        let targets = names.clone();
        let handle = tokio::spawn(async move { runner.perform_bulk_approval(&targets, "ok").await });

        let first = rx.recv().await.unwrap();
        assert!(orchestrator.cancel_bulk_operation(&first.operation_id));

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.status, BulkOperationStatus::Cancelled);
        assert_eq!(result.total_items, 20);
        assert!(result.processed_items() < 20);
        assert_eq!(orchestrator.state(), BulkState::Cancelled);
        assert!(orchestrator.active_operation().is_none());

        let mut last = None;
        while let Ok(p) = rx.try_recv() {
            last = Some(p);
        }
        let last = last.unwrap();
        assert_eq!(last.processed_items, result.processed_items());
        assert!(last.message.unwrap().starts_with("Cancelled after"));
    }

    #[tokio::test]
    async fn test_progress_message_names_failed_item() {
        let f = fixture(&["a"]).await;
        let mut rx = f.orchestrator.subscribe_progress();

        f.orchestrator.perform_bulk_approval(&ids(&["a", "ghost"]), "ok").await.unwrap();

        let ok = rx.try_recv().unwrap();
        assert!(ok.message.is_none());
        let failed = rx.try_recv().unwrap();
        assert_eq!(failed.current_item, "ghost");
        assert_eq!(failed.message.as_deref(), Some("ghost: record not found"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_second_run_while_one_is_active_fails_fast() {
        let names: Vec<String> = (0..20).map(|i| format!("r{}", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let f = fixture(&refs).await;
        let orchestrator = Arc::new(f.orchestrator);
        let mut rx = orchestrator.subscribe_progress();

        let runner = orchestrator.clone();
        let targets = names.clone();
        let handle = tokio::spawn(async move { runner.perform_bulk_approval(&targets, "ok").await });

        let first = rx.recv().await.unwrap();
        assert_eq!(orchestrator.active_operation().as_deref(), Some(first.operation_id.as_str()));

        let err = orchestrator.perform_bulk_export(&ids(&["r0"]), "json").await.unwrap_err();
        match err {
            EngineError::Operation(OperationError::AlreadyInProgress { operation_id }) => {
                assert_eq!(operation_id, first.operation_id);
            }
            other => panic!("expected AlreadyInProgress, got {:?}", other),
        }
        let err = orchestrator.try_undo_last_bulk_operation().await.unwrap_err();
        assert!(matches!(err, EngineError::Operation(OperationError::AlreadyInProgress { .. })));
        assert!(err.is_retryable());
        assert!(!orchestrator.undo_last_bulk_operation().await);

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.successful_items, 20);
        assert_eq!(orchestrator.bulk_operation_history().await.unwrap().len(), 1);

        // Slot is free again
        let export = orchestrator.perform_bulk_export(&ids(&["r0"]), "json").await.unwrap();
        assert_eq!(export.successful_items, 1);
    }

    #[tokio::test]
    async fn test_cancel_finished_operation_is_noop() {
        let f = fixture(&["a", "b"]).await;
        let result = f.orchestrator.perform_bulk_approval(&ids(&["a", "b"]), "ok").await.unwrap();

        assert!(!f.orchestrator.cancel_bulk_operation(&result.operation_id));

        let history = f.orchestrator.bulk_operation_history().await.unwrap();
        assert_eq!(history[0], result);
        assert_eq!(history[0].status, BulkOperationStatus::Completed);
        assert_eq!(f.orchestrator.state(), BulkState::Completed);
        assert!(f.orchestrator.can_undo().await.unwrap());
    }
}
