// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Caller-facing operations.
//!
//! Everything here checks readiness first and then delegates to one
//! component. Grouped as:
//! - sync queue (enqueue, batches, status transitions, drain)
//! - cache
//! - bulk operations and undo
//! - records and conflicts used by collaborating screens

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::bulk::{BulkOperationProgress, BulkOperationResult, BulkState};
use crate::cache::{CacheCategory, CacheStats};
use crate::conflict::Conflict;
use crate::error::EngineError;
use crate::queue::{DrainReport, QueueStats, RemoteSyncBackend, SyncOperation, SyncQueueItem};
use crate::record::{OdRequest, OdStatus, RecordStats, OD_REQUEST_TYPE};

use super::{EngineHealth, OfflineEngine};

/// Queue priority for newly submitted records.
pub const RECORD_SYNC_PRIORITY: i32 = 10;

/// Cache key of the last computed [`RecordStats`].
pub const RECORD_STATS_CACHE_KEY: &str = "od_request_stats";

impl OfflineEngine {
    // ═══════════════════════════════════════════════════════════════════════════
    // API: Sync queue
    // ═══════════════════════════════════════════════════════════════════════════

    /// Queue a local mutation for delivery. Never waits on connectivity.
    pub async fn enqueue(
        &self,
        item_id: &str,
        item_type: &str,
        operation: SyncOperation,
        payload: Value,
        priority: i32,
    ) -> Result<String, EngineError> {
        self.ensure_ready()?;
        Ok(self.queue.enqueue(item_id, item_type, operation, payload, priority).await?)
    }

    /// Items ready for delivery: highest priority first, then oldest.
    pub async fn next_sync_batch(&self, max_size: usize) -> Result<Vec<SyncQueueItem>, EngineError> {
        self.ensure_ready()?;
        Ok(self.queue.next_batch(max_size).await?)
    }

    pub async fn mark_in_progress(&self, queue_id: &str) -> Result<(), EngineError> {
        self.ensure_ready()?;
        Ok(self.queue.mark_in_progress(queue_id).await?)
    }

    pub async fn mark_completed(&self, queue_id: &str) -> Result<(), EngineError> {
        self.ensure_ready()?;
        Ok(self.queue.mark_completed(queue_id).await?)
    }

    pub async fn mark_failed(&self, queue_id: &str, message: &str) -> Result<(), EngineError> {
        self.ensure_ready()?;
        Ok(self.queue.mark_failed(queue_id, message).await?)
    }

    pub async fn mark_conflicted(&self, queue_id: &str, message: &str) -> Result<(), EngineError> {
        self.ensure_ready()?;
        Ok(self.queue.mark_conflicted(queue_id, message).await?)
    }

    /// Return every failed item to pending with a fresh retry budget.
    pub async fn reset_failed_sync(&self) -> Result<usize, EngineError> {
        self.ensure_ready()?;
        Ok(self.queue.reset_failed().await?)
    }

    pub async fn sync_stats(&self) -> Result<QueueStats, EngineError> {
        self.ensure_ready()?;
        Ok(self.queue.stats().await?)
    }

    /// Push one batch of eligible items to `backend`.
    pub async fn drain_sync(&self, backend: &dyn RemoteSyncBackend) -> Result<DrainReport, EngineError> {
        self.ensure_ready()?;
        Ok(self.drainer.drain_once(backend).await?)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // API: Cache
    // ═══════════════════════════════════════════════════════════════════════════

    /// Cache `payload`; `ttl` defaults to the category's TTL.
    pub async fn cache_put<T: Serialize + ?Sized>(
        &self,
        key: &str,
        payload: &T,
        category: CacheCategory,
        ttl: Option<Duration>,
    ) -> Result<(), EngineError> {
        self.ensure_ready()?;
        Ok(self.cache.put(key, payload, category, ttl).await?)
    }

    pub async fn cache_get<T: DeserializeOwned>(
        &self,
        key: &str,
        extend_ttl: bool,
    ) -> Result<Option<T>, EngineError> {
        self.ensure_ready()?;
        Ok(self.cache.get(key, extend_ttl).await?)
    }

    pub async fn cache_remove(&self, key: &str) -> Result<bool, EngineError> {
        self.ensure_ready()?;
        Ok(self.cache.remove(key).await?)
    }

    pub async fn cache_cleanup_expired(&self) -> Result<usize, EngineError> {
        self.ensure_ready()?;
        Ok(self.cache.cleanup_expired().await?)
    }

    /// Drop every entry of `category`, e.g. after the server pushes a new directory.
    pub async fn cache_invalidate_category(&self, category: CacheCategory) -> Result<usize, EngineError> {
        self.ensure_ready()?;
        Ok(self.cache.invalidate_category(category).await?)
    }

    pub fn cache_health_score(&self) -> Result<u8, EngineError> {
        self.ensure_ready()?;
        Ok(self.cache.health_score())
    }

    pub fn cache_stats(&self) -> Result<CacheStats, EngineError> {
        self.ensure_ready()?;
        Ok(self.cache.stats())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // API: Bulk operations
    // ═══════════════════════════════════════════════════════════════════════════

    pub async fn perform_bulk_approval(
        &self,
        ids: &[String],
        reason: &str,
    ) -> Result<BulkOperationResult, EngineError> {
        self.ensure_ready()?;
        let result = self.bulk.perform_bulk_approval(ids, reason).await?;
        if result.successful_items > 0 {
            self.invalidate_record_stats().await;
        }
        Ok(result)
    }

    pub async fn perform_bulk_rejection(
        &self,
        ids: &[String],
        reason: &str,
    ) -> Result<BulkOperationResult, EngineError> {
        self.ensure_ready()?;
        let result = self.bulk.perform_bulk_rejection(ids, reason).await?;
        if result.successful_items > 0 {
            self.invalidate_record_stats().await;
        }
        Ok(result)
    }

    /// Export records; `format` is `csv` or `json`.
    pub async fn perform_bulk_export(
        &self,
        ids: &[String],
        format: &str,
    ) -> Result<BulkOperationResult, EngineError> {
        self.ensure_ready()?;
        self.bulk.perform_bulk_export(ids, format).await
    }

    /// Flag a running operation to stop before its next item.
    ///
    /// Works in any state so a shutdown in progress can still be raced.
    pub fn cancel_bulk_operation(&self, operation_id: &str) -> bool {
        self.bulk.cancel_bulk_operation(operation_id)
    }

    /// False when not ready or nothing could be undone.
    pub async fn undo_last_bulk_operation(&self) -> bool {
        if self.ensure_ready().is_err() {
            return false;
        }
        let undone = self.bulk.undo_last_bulk_operation().await;
        if undone {
            self.invalidate_record_stats().await;
        }
        undone
    }

    /// Like [`undo_last_bulk_operation`](Self::undo_last_bulk_operation) but says why.
    pub async fn try_undo_last_bulk_operation(&self) -> Result<usize, EngineError> {
        self.ensure_ready()?;
        let restored = self.bulk.try_undo_last_bulk_operation().await?;
        self.invalidate_record_stats().await;
        Ok(restored)
    }

    /// Past bulk runs, newest first.
    pub async fn bulk_operation_history(&self) -> Result<Vec<BulkOperationResult>, EngineError> {
        self.ensure_ready()?;
        Ok(self.bulk.bulk_operation_history().await?)
    }

    /// Progress events. Delivery is best effort; a slow receiver lags.
    pub fn subscribe_progress(&self) -> broadcast::Receiver<BulkOperationProgress> {
        self.bulk.subscribe_progress()
    }

    pub fn bulk_state(&self) -> BulkState {
        self.bulk.state()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // API: Records & conflicts
    // ═══════════════════════════════════════════════════════════════════════════

    /// Store a new OD request locally and queue its creation upstream.
    ///
    /// Returns the queue id of the `create` mutation.
    pub async fn submit_record(&self, record: OdRequest) -> Result<String, EngineError> {
        self.ensure_ready()?;
        let records = self.bulk.records();
        records.put(&record).await?;

        let payload = serde_json::to_value(&record)
            .map_err(|e| crate::error::StorageError::Serialization(e.to_string()))?;
        let queue_id = self
            .queue
            .enqueue(&record.id, OD_REQUEST_TYPE, SyncOperation::Create, payload, RECORD_SYNC_PRIORITY)
            .await?;

        info!(record_id = %record.id, queue_id = %queue_id, "Submitted OD request");
        self.invalidate_record_stats().await;
        Ok(queue_id)
    }

    pub async fn get_record(&self, id: &str) -> Result<Option<OdRequest>, EngineError> {
        self.ensure_ready()?;
        Ok(self.bulk.records().get(id).await?)
    }

    /// Records, newest first, optionally filtered by status.
    pub async fn list_records(&self, status: Option<OdStatus>) -> Result<Vec<OdRequest>, EngineError> {
        self.ensure_ready()?;
        Ok(self.bulk.records().list(status).await?)
    }

    /// Request totals, status distribution and busiest students.
    ///
    /// Served from the analytics cache while fresh; any local change to the
    /// records drops the cached copy.
    pub async fn record_stats(&self) -> Result<RecordStats, EngineError> {
        self.ensure_ready()?;
        if let Some(stats) = self.cache.get::<RecordStats>(RECORD_STATS_CACHE_KEY, false).await? {
            return Ok(stats);
        }

        let stats = self.bulk.records().stats().await?;
        if let Err(e) = self
            .cache
            .put(RECORD_STATS_CACHE_KEY, &stats, CacheCategory::Analytics, None)
            .await
        {
            warn!(error = %e, "Could not cache record stats");
        }
        Ok(stats)
    }

    async fn invalidate_record_stats(&self) {
        match self.cache.remove(RECORD_STATS_CACHE_KEY).await {
            Ok(true) => debug!("Dropped cached record stats"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Could not drop cached record stats"),
        }
    }

    pub async fn list_conflicts(&self) -> Result<Vec<Conflict>, EngineError> {
        self.ensure_ready()?;
        Ok(self.conflicts.list().await?)
    }

    /// Drop the recorded conflict for `item_id`; false when there was none.
    pub async fn resolve_conflict(&self, item_id: &str) -> Result<bool, EngineError> {
        self.ensure_ready()?;
        Ok(self.conflicts.resolve(item_id).await?)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // API: Health
    // ═══════════════════════════════════════════════════════════════════════════

    /// Summary of every component. Works in any state.
    pub async fn health(&self) -> Result<EngineHealth, EngineError> {
        let state = self.state();
        let ready = state == super::EngineState::Ready;
        let queue = self.queue.stats().await?;
        let conflicts = self.conflicts.count().await?;
        let cache_score = self.cache.health_score();
        let remote_circuit = self.drainer.breaker().stats();

        Ok(EngineHealth {
            state,
            ready,
            cache_score,
            cache_items: self.cache.len(),
            cache_bytes: self.cache.total_bytes(),
            queue,
            conflicts,
            bulk_state: self.bulk.state(),
            remote_circuit,
            healthy: ready && conflicts == 0 && queue.exhausted == 0 && !remote_circuit.appears_open(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::config::OfflineEngineConfig;
    use crate::queue::SyncStatus;
    use crate::storage::memory::MemoryStore;

    async fn ready_engine() -> (OfflineEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let engine = OfflineEngine::new(
            OfflineEngineConfig::default(),
            Arc::new(MemoryStore::new()),
            clock.clone(),
        );
        engine.start().await.unwrap();
        (engine, clock)
    }

    fn od(id: &str, clock: &ManualClock) -> OdRequest {
        let now = clock.now();
        OdRequest::new(id, "s1", "21CS001", "Asha", now, vec![1, 2], "Symposium", now)
    }

    #[tokio::test]
    async fn test_submit_record_queues_create() {
        let (engine, clock) = ready_engine().await;

        let queue_id = engine.submit_record(od("od-1", &clock)).await.unwrap();
        let batch = engine.next_sync_batch(10).await.unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, queue_id);
        assert_eq!(batch[0].operation, SyncOperation::Create);
        assert_eq!(batch[0].priority, RECORD_SYNC_PRIORITY);
        assert!(engine.get_record("od-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_bulk_approval_through_facade() {
        let (engine, clock) = ready_engine().await;
        engine.submit_record(od("a", &clock)).await.unwrap();
        engine.submit_record(od("b", &clock)).await.unwrap();

        let ids = vec!["a".to_string(), "b".to_string()];
        let result = engine.perform_bulk_approval(&ids, "ok").await.unwrap();

        assert_eq!(result.successful_items, 2);
        assert_eq!(engine.list_records(Some(OdStatus::Approved)).await.unwrap().len(), 2);
        // two creates plus two approvals
        assert_eq!(engine.sync_stats().await.unwrap().pending, 4);

        assert!(engine.undo_last_bulk_operation().await);
        assert_eq!(engine.list_records(Some(OdStatus::Pending)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cache_round_trip_through_facade() {
        let (engine, _clock) = ready_engine().await;

        engine
            .cache_put("od_req_1", &json!({"id": "od_req_1"}), CacheCategory::OdRequests, None)
            .await
            .unwrap();
        let hit: Option<Value> = engine.cache_get("od_req_1", false).await.unwrap();

        assert_eq!(hit, Some(json!({"id": "od_req_1"})));
        assert_eq!(engine.cache_stats().unwrap().total_items, 1);
        assert!(engine.cache_remove("od_req_1").await.unwrap());
    }

    #[tokio::test]
    async fn test_record_stats_cached_until_records_change() {
        let (engine, clock) = ready_engine().await;
        for id in ["a", "b", "c"] {
            engine.submit_record(od(id, &clock)).await.unwrap();
        }

        let stats = engine.record_stats().await.unwrap();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.status_distribution.get("pending"), Some(&3));
        assert_eq!(stats.top_students[0].student_id, "s1");
        assert_eq!(stats.top_students[0].requests, 3);
        let cached = engine.cache_stats().unwrap();
        assert_eq!(cached.per_category.get(&CacheCategory::Analytics), Some(&1));

        let ids = vec!["a".to_string(), "b".to_string()];
        engine.perform_bulk_approval(&ids, "ok").await.unwrap();
        assert!(!engine.cache.contains(RECORD_STATS_CACHE_KEY));

        let stats = engine.record_stats().await.unwrap();
        assert_eq!(stats.status_distribution.get("approved"), Some(&2));
        assert_eq!(stats.status_distribution.get("pending"), Some(&1));

        assert!(engine.undo_last_bulk_operation().await);
        let stats = engine.record_stats().await.unwrap();
        assert_eq!(stats.status_distribution.get("pending"), Some(&3));
    }

    #[tokio::test]
    async fn test_record_stats_expire_with_analytics_ttl() {
        let (engine, clock) = ready_engine().await;
        engine.submit_record(od("a", &clock)).await.unwrap();
        engine.record_stats().await.unwrap();

        clock.advance(Duration::from_secs(15 * 60 + 1));
        assert!(!engine.cache.contains(RECORD_STATS_CACHE_KEY));
        assert_eq!(engine.record_stats().await.unwrap().total_requests, 1);
    }

    #[tokio::test]
    async fn test_health_reports_failures() {
        let (engine, _clock) = ready_engine().await;

        let id = engine
            .enqueue("x", "user_data", SyncOperation::Update, json!({}), 0)
            .await
            .unwrap();
        for _ in 0..3 {
            engine.mark_failed(&id, "offline").await.unwrap();
        }

        let health = engine.health().await.unwrap();
        assert!(health.ready);
        assert_eq!(health.queue.exhausted, 1);
        assert!(!health.healthy);

        assert_eq!(engine.reset_failed_sync().await.unwrap(), 1);
        let item = engine.next_sync_batch(1).await.unwrap();
        assert_eq!(item[0].status, SyncStatus::Pending);
        assert!(engine.health().await.unwrap().healthy);
    }

    #[tokio::test]
    async fn test_undo_is_false_when_not_ready() {
        let engine = OfflineEngine::new(
            OfflineEngineConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new()),
        );
        assert!(!engine.undo_last_bulk_operation().await);
        assert!(!engine.health().await.unwrap().ready);
    }
}
