// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync Queue: durable, append-only log of local mutations.
//!
//! ```text
//!   enqueue ──► pending ──► in_progress ──► completed   (cleanup_completed)
//!                  ▲            │
//!                  │            ├──► failed ──(cooldown)──► next_batch again
//!                  │            │       └── retry_count >= max ──► exhausted
//!                  │            │                                  (reset_failed / purge_exhausted)
//!                  └────────────┴──► conflict           (resolved externally)
//! ```
//!
//! Batches are ordered by `(priority desc, queued_at asc, sequence asc)`.
//! Failed items wait `base * multiplier^retry_count` before they are handed
//! out again.

pub mod drain;
pub mod item;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::resilience::retry::RetryConfig;
use crate::storage::table::Table;
use crate::storage::traits::{Partition, PersistentStore, StorageError};

pub use drain::{DrainReport, PushOutcome, RemoteError, RemoteSyncBackend, SyncDrainer};
pub use item::{SyncOperation, SyncQueueItem, SyncStatus};

/// Item counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub conflict: usize,
    /// Failed items out of retries (subset of `failed`)
    pub exhausted: usize,
}

impl QueueStats {
    #[must_use]
    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.completed + self.failed + self.conflict
    }

    /// Items still expected to reach the backend.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.pending + self.in_progress + self.failed - self.exhausted
    }
}

pub struct SyncQueue {
    table: Table<SyncQueueItem>,
    clock: SharedClock,
    retry: RetryConfig,
    sequence: AtomicU64,
    /// Serializes read-modify-write status transitions
    write_gate: Mutex<()>,
}

impl SyncQueue {
    pub fn new(store: Arc<dyn PersistentStore>, clock: SharedClock, retry: RetryConfig) -> Self {
        Self {
            table: Table::new(store, Partition::SyncQueue),
            clock,
            retry,
            sequence: AtomicU64::new(0),
            write_gate: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn retry_policy(&self) -> &RetryConfig {
        &self.retry
    }

    /// Resume the submission sequence after the highest persisted one.
    pub async fn load(&self) -> Result<usize, StorageError> {
        let items = self.table.values().await?;
        let next = items.iter().map(|i| i.sequence + 1).max().unwrap_or(0);
        self.sequence.fetch_max(next, Ordering::AcqRel);
        Ok(items.len())
    }

    /// Append a mutation; returns its queue id.
    pub async fn enqueue(
        &self,
        item_id: &str,
        item_type: &str,
        operation: SyncOperation,
        payload: Value,
        priority: i32,
    ) -> Result<String, StorageError> {
        let id = Uuid::new_v4().to_string();
        let item = SyncQueueItem::new(
            id.clone(),
            item_id.to_string(),
            item_type.to_string(),
            operation,
            payload,
            priority,
            self.clock.now(),
            self.sequence.fetch_add(1, Ordering::AcqRel),
        );
        self.table.put(&id, &item).await?;

        debug!(queue_id = %id, item_id = %item_id, operation = %operation, priority, "Enqueued sync item");
        crate::metrics::record_queue_transition(SyncStatus::Pending.as_str());
        Ok(id)
    }

    pub async fn get(&self, queue_id: &str) -> Result<Option<SyncQueueItem>, StorageError> {
        self.table.get(queue_id).await
    }

    /// Every item in batch order, whatever its status.
    pub async fn items(&self) -> Result<Vec<SyncQueueItem>, StorageError> {
        let mut items = self.table.values().await?;
        sort_for_delivery(&mut items);
        Ok(items)
    }

    /// Up to `max_size` items ready for delivery now.
    pub async fn next_batch(&self, max_size: usize) -> Result<Vec<SyncQueueItem>, StorageError> {
        let now = self.clock.now();
        let mut ready: Vec<SyncQueueItem> = self
            .table
            .values()
            .await?
            .into_iter()
            .filter(|item| item.is_eligible(now, &self.retry))
            .collect();

        sort_for_delivery(&mut ready);
        ready.truncate(max_size);
        Ok(ready)
    }

    pub async fn mark_in_progress(&self, queue_id: &str) -> Result<(), StorageError> {
        self.transition(queue_id, SyncStatus::InProgress, |_, _| {}).await
    }

    pub async fn mark_completed(&self, queue_id: &str) -> Result<(), StorageError> {
        self.transition(queue_id, SyncStatus::Completed, |item, _| {
            item.error_message = None;
        })
        .await
    }

    /// Count a failed attempt and start the cooldown.
    pub async fn mark_failed(&self, queue_id: &str, message: &str) -> Result<(), StorageError> {
        let retry = &self.retry;
        self.transition(queue_id, SyncStatus::Failed, |item, now| {
            item.retry_count = item.retry_count.saturating_add(1);
            item.last_retry_at = Some(now);
            item.error_message = Some(message.to_string());
            if item.is_exhausted(retry) {
                warn!(
                    queue_id = %item.id,
                    item_id = %item.item_id,
                    retries = item.retry_count,
                    "Sync item exhausted its retries"
                );
            }
        })
        .await
    }

    pub async fn mark_conflicted(&self, queue_id: &str, message: &str) -> Result<(), StorageError> {
        self.transition(queue_id, SyncStatus::Conflict, |item, _| {
            item.error_message = Some(message.to_string());
        })
        .await
    }

    /// Hand an item back without counting a retry.
    pub async fn mark_pending(&self, queue_id: &str) -> Result<(), StorageError> {
        self.transition(queue_id, SyncStatus::Pending, |_, _| {}).await
    }

    /// Manual recovery: every failed item goes back to pending with a clean slate.
    pub async fn reset_failed(&self) -> Result<usize, StorageError> {
        let _gate = self.write_gate.lock().await;
        let mut reset = 0;
        for (key, mut item) in self.table.entries().await? {
            if item.status != SyncStatus::Failed {
                continue;
            }
            item.status = SyncStatus::Pending;
            item.retry_count = 0;
            item.last_retry_at = None;
            item.error_message = None;
            self.table.put(&key, &item).await?;
            reset += 1;
        }
        if reset > 0 {
            info!(count = reset, "Reset failed sync items");
        }
        Ok(reset)
    }

    /// Delete completed items.
    pub async fn cleanup_completed(&self) -> Result<usize, StorageError> {
        self.remove_where(|item, _| item.status == SyncStatus::Completed).await
    }

    /// Delete failed items that ran out of retries.
    pub async fn purge_exhausted(&self) -> Result<usize, StorageError> {
        self.remove_where(|item, retry| item.status == SyncStatus::Failed && item.is_exhausted(retry))
            .await
    }

    /// Items left `in_progress` by an interrupted drain return to pending.
    pub async fn recover_in_flight(&self) -> Result<usize, StorageError> {
        let _gate = self.write_gate.lock().await;
        let mut recovered = 0;
        for (key, mut item) in self.table.entries().await? {
            if item.status == SyncStatus::InProgress {
                item.status = SyncStatus::Pending;
                self.table.put(&key, &item).await?;
                recovered += 1;
            }
        }
        if recovered > 0 {
            info!(count = recovered, "Recovered in-flight sync items");
        }
        Ok(recovered)
    }

    pub async fn stats(&self) -> Result<QueueStats, StorageError> {
        let mut stats = QueueStats::default();
        for item in self.table.values().await? {
            match item.status {
                SyncStatus::Pending => stats.pending += 1,
                SyncStatus::InProgress => stats.in_progress += 1,
                SyncStatus::Completed => stats.completed += 1,
                SyncStatus::Conflict => stats.conflict += 1,
                SyncStatus::Failed => {
                    stats.failed += 1;
                    if item.is_exhausted(&self.retry) {
                        stats.exhausted += 1;
                    }
                }
            }
        }
        crate::metrics::set_queue_depth(stats.outstanding());
        Ok(stats)
    }

    /// Completed and conflicted items are final; no transition leaves them.
    async fn transition<F>(&self, queue_id: &str, to: SyncStatus, apply: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut SyncQueueItem, chrono::DateTime<chrono::Utc>),
    {
        let _gate = self.write_gate.lock().await;
        let mut item = self
            .table
            .get(queue_id)
            .await?
            .ok_or_else(|| StorageError::not_found(Partition::SyncQueue, queue_id))?;

        let from = item.status;
        if from.is_terminal() {
            warn!(queue_id = %queue_id, from = %from, to = %to, "Rejected transition out of final state");
            return Err(StorageError::InvalidTransition {
                key: queue_id.to_string(),
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        item.status = to;
        apply(&mut item, self.clock.now());
        self.table.put(queue_id, &item).await?;

        debug!(queue_id = %queue_id, from = %from, to = %item.status, "Sync item transition");
        crate::metrics::record_queue_transition(item.status.as_str());
        Ok(())
    }

    async fn remove_where<F>(&self, predicate: F) -> Result<usize, StorageError>
    where
        F: Fn(&SyncQueueItem, &RetryConfig) -> bool,
    {
        let _gate = self.write_gate.lock().await;
        let mut removed = 0;
        for (key, item) in self.table.entries().await? {
            if predicate(&item, &self.retry) {
                self.table.delete(&key).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn sort_for_delivery(items: &mut [SyncQueueItem]) {
    items.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.queued_at.cmp(&b.queued_at))
            .then_with(|| a.sequence.cmp(&b.sequence))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::storage::memory::MemoryStore;
    use serde_json::json;
    use std::time::Duration;

    fn queue() -> (SyncQueue, Arc<ManualClock>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new());
        let queue = SyncQueue::new(store.clone(), clock.clone(), RetryConfig::sync_queue());
        (queue, clock, store)
    }

    async fn enqueue(queue: &SyncQueue, item_id: &str, priority: i32) -> String {
        queue
            .enqueue(item_id, "od_request", SyncOperation::Create, json!({"id": item_id}), priority)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_batch_order_priority_then_submission() {
        let (queue, clock, _) = queue();
        enqueue(&queue, "low-1", 1).await;
        enqueue(&queue, "high-1", 5).await;
        clock.advance(Duration::from_secs(1));
        enqueue(&queue, "high-2", 5).await;
        enqueue(&queue, "low-2", 1).await;

        let batch = queue.next_batch(10).await.unwrap();
        let ids: Vec<_> = batch.iter().map(|i| i.item_id.as_str()).collect();
        assert_eq!(ids, vec!["high-1", "high-2", "low-1", "low-2"]);
    }

    #[tokio::test]
    async fn test_batch_truncated() {
        let (queue, _, _) = queue();
        for i in 0..5 {
            enqueue(&queue, &format!("item-{}", i), 0).await;
        }
        assert_eq!(queue.next_batch(3).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_in_progress_and_completed_excluded() {
        let (queue, _, _) = queue();
        let a = enqueue(&queue, "a", 0).await;
        let b = enqueue(&queue, "b", 0).await;
        enqueue(&queue, "c", 0).await;

        queue.mark_in_progress(&a).await.unwrap();
        queue.mark_completed(&b).await.unwrap();

        let batch = queue.next_batch(10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].item_id, "c");
    }

    #[tokio::test]
    async fn test_failed_item_waits_for_cooldown() {
        let (queue, clock, _) = queue();
        let id = enqueue(&queue, "a", 0).await;

        queue.mark_failed(&id, "timeout").await.unwrap();
        let item = queue.get(&id).await.unwrap().unwrap();
        assert_eq!(item.retry_count, 1);
        assert_eq!(item.last_retry_at, Some(clock.now()));
        assert_eq!(item.error_message.as_deref(), Some("timeout"));

        // delay = 30s * 2^1
        clock.advance(Duration::from_secs(60));
        assert!(queue.next_batch(10).await.unwrap().is_empty());
        clock.advance(Duration::from_secs(1));
        assert_eq!(queue.next_batch(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_after_max_retries() {
        let (queue, clock, _) = queue();
        let id = enqueue(&queue, "a", 0).await;

        for _ in 0..3 {
            queue.mark_failed(&id, "down").await.unwrap();
            clock.advance(Duration::from_secs(3600));
        }

        assert!(queue.next_batch(10).await.unwrap().is_empty());
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.exhausted, 1);
        assert_eq!(stats.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_reset_failed_restores_pending() {
        let (queue, _, _) = queue();
        let id = enqueue(&queue, "a", 0).await;
        for _ in 0..3 {
            queue.mark_failed(&id, "down").await.unwrap();
        }

        assert_eq!(queue.reset_failed().await.unwrap(), 1);
        let item = queue.get(&id).await.unwrap().unwrap();
        assert_eq!(item.status, SyncStatus::Pending);
        assert_eq!(item.retry_count, 0);
        assert!(item.last_retry_at.is_none());
        assert!(item.error_message.is_none());
        assert_eq!(queue.next_batch(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_conflict_is_terminal() {
        let (queue, _, _) = queue();
        let id = enqueue(&queue, "a", 0).await;
        queue.mark_conflicted(&id, "server has newer version").await.unwrap();

        assert!(queue.next_batch(10).await.unwrap().is_empty());
        assert_eq!(queue.reset_failed().await.unwrap(), 0);
        assert_eq!(queue.stats().await.unwrap().conflict, 1);
    }

    #[tokio::test]
    async fn test_completed_item_cannot_fail_later() {
        let (queue, clock, _) = queue();
        let id = enqueue(&queue, "a", 0).await;
        queue.mark_completed(&id).await.unwrap();

        let err = queue.mark_failed(&id, "late failure").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidTransition { .. }));

        clock.advance(Duration::from_secs(120));
        let item = queue.get(&id).await.unwrap().unwrap();
        assert_eq!(item.status, SyncStatus::Completed);
        assert_eq!(item.retry_count, 0);
        assert!(queue.next_batch(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_completed_item_rejects_every_transition() {
        let (queue, _, _) = queue();
        let id = enqueue(&queue, "a", 0).await;
        queue.mark_completed(&id).await.unwrap();

        assert!(queue.mark_in_progress(&id).await.is_err());
        assert!(queue.mark_pending(&id).await.is_err());
        assert!(queue.mark_conflicted(&id, "late conflict").await.is_err());
        assert!(queue.mark_completed(&id).await.is_err());
        assert_eq!(queue.get(&id).await.unwrap().unwrap().status, SyncStatus::Completed);
    }

    #[tokio::test]
    async fn test_conflict_stays_until_resolved_elsewhere() {
        let (queue, _, _) = queue();
        let id = enqueue(&queue, "a", 0).await;
        queue.mark_conflicted(&id, "server has newer version").await.unwrap();

        let err = queue.mark_pending(&id).await.unwrap_err();
        assert_eq!(
            err,
            StorageError::InvalidTransition {
                key: id.clone(),
                from: "conflict".into(),
                to: "pending".into(),
            }
        );
        assert!(queue.mark_in_progress(&id).await.is_err());
        assert!(queue.mark_failed(&id, "down").await.is_err());
        assert!(queue.mark_completed(&id).await.is_err());

        let item = queue.get(&id).await.unwrap().unwrap();
        assert_eq!(item.status, SyncStatus::Conflict);
        assert_eq!(item.error_message.as_deref(), Some("server has newer version"));
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let (queue, _, _) = queue();
        let err = queue.mark_completed("missing").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_cleanup_and_purge() {
        let (queue, _, _) = queue();
        let done = enqueue(&queue, "done", 0).await;
        let dead = enqueue(&queue, "dead", 0).await;
        enqueue(&queue, "waiting", 0).await;

        queue.mark_completed(&done).await.unwrap();
        for _ in 0..3 {
            queue.mark_failed(&dead, "down").await.unwrap();
        }

        assert_eq!(queue.cleanup_completed().await.unwrap(), 1);
        assert_eq!(queue.purge_exhausted().await.unwrap(), 1);
        assert_eq!(queue.items().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_recover_in_flight() {
        let (queue, _, _) = queue();
        let id = enqueue(&queue, "a", 0).await;
        queue.mark_in_progress(&id).await.unwrap();

        assert_eq!(queue.recover_in_flight().await.unwrap(), 1);
        assert_eq!(queue.get(&id).await.unwrap().unwrap().status, SyncStatus::Pending);
    }

    #[tokio::test]
    async fn test_load_resumes_sequence() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new());
        {
            let first = SyncQueue::new(store.clone(), clock.clone(), RetryConfig::sync_queue());
            enqueue(&first, "a", 0).await;
            enqueue(&first, "b", 0).await;
        }

        let reopened = SyncQueue::new(store, clock, RetryConfig::sync_queue());
        assert_eq!(reopened.load().await.unwrap(), 2);
        enqueue(&reopened, "c", 0).await;

        let ids: Vec<_> = reopened
            .next_batch(10)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.item_id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_corrupted_entry_skipped() {
        let (queue, _, store) = queue();
        enqueue(&queue, "a", 0).await;
        store.put_raw(Partition::SyncQueue, "broken", "not json");

        assert_eq!(queue.next_batch(10).await.unwrap().len(), 1);
        assert!(store.get(Partition::SyncQueue, "broken").await.unwrap().is_none());
    }
}
