// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Drain loop: hands queued mutations to the remote backend.
//!
//! ```text
//!   next_batch(n) ──► for each item:
//!                        mark_in_progress
//!                        breaker.call(backend.push)
//!                          ├─ Accepted           ──► mark_completed
//!                          ├─ Conflict{server}   ──► ConflictStore::record + mark_conflicted
//!                          ├─ Err(remote)        ──► mark_failed (cooldown starts)
//!                          └─ Rejected (open)    ──► mark_pending, stop the pass
//! ```
//!
//! The transport itself lives outside this crate behind [`RemoteSyncBackend`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::item::SyncQueueItem;
use super::SyncQueue;
use crate::conflict::ConflictStore;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError};
use crate::storage::traits::StorageError;

/// What the backend said about one pushed mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    Accepted,
    /// The server holds a divergent version
    Conflict {
        server_data: Value,
        server_timestamp: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote unreachable: {0}")]
    Unreachable(String),
    #[error("remote rejected the mutation: {0}")]
    Rejected(String),
}

/// The remote end of synchronization.
#[async_trait]
pub trait RemoteSyncBackend: Send + Sync {
    async fn push(&self, item: &SyncQueueItem) -> Result<PushOutcome, RemoteError>;
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub attempted: usize,
    pub completed: usize,
    pub failed: usize,
    pub conflicted: usize,
    /// Returned to pending because the circuit was open
    pub deferred: usize,
    pub circuit_open: bool,
}

pub struct SyncDrainer {
    queue: Arc<SyncQueue>,
    conflicts: Arc<ConflictStore>,
    breaker: CircuitBreaker,
    batch_size: usize,
}

impl SyncDrainer {
    pub fn new(queue: Arc<SyncQueue>, conflicts: Arc<ConflictStore>, batch_size: usize) -> Self {
        Self::with_breaker(
            queue,
            conflicts,
            batch_size,
            CircuitBreaker::new("remote_sync", CircuitConfig::remote_sync()),
        )
    }

    pub fn with_breaker(
        queue: Arc<SyncQueue>,
        conflicts: Arc<ConflictStore>,
        batch_size: usize,
        breaker: CircuitBreaker,
    ) -> Self {
        Self {
            queue,
            conflicts,
            breaker,
            batch_size: batch_size.max(1),
        }
    }

    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Push one batch of eligible items.
    ///
    /// Remote failures are recorded on the items; only store errors escape.
    #[tracing::instrument(skip(self, backend), fields(batch_size = self.batch_size))]
    pub async fn drain_once(&self, backend: &dyn RemoteSyncBackend) -> Result<DrainReport, StorageError> {
        let batch = self.queue.next_batch(self.batch_size).await?;
        let mut report = DrainReport::default();

        for item in &batch {
            self.queue.mark_in_progress(&item.id).await?;
            report.attempted += 1;

            match self.breaker.call(|| backend.push(item)).await {
                Ok(PushOutcome::Accepted) => {
                    self.queue.mark_completed(&item.id).await?;
                    report.completed += 1;
                }
                Ok(PushOutcome::Conflict { server_data, server_timestamp }) => {
                    self.conflicts
                        .record(
                            &item.item_id,
                            &item.item_type,
                            item.payload.clone(),
                            server_data,
                            item.queued_at,
                            server_timestamp,
                        )
                        .await?;
                    self.queue
                        .mark_conflicted(&item.id, "server holds a divergent version")
                        .await?;
                    report.conflicted += 1;
                }
                Err(CircuitError::Inner(e)) => {
                    debug!(queue_id = %item.id, error = %e, "Push failed");
                    self.queue.mark_failed(&item.id, &e.to_string()).await?;
                    report.failed += 1;
                }
                Err(CircuitError::Rejected) => {
                    self.queue.mark_pending(&item.id).await?;
                    report.deferred += 1;
                    report.circuit_open = true;
                    warn!(remaining = batch.len() - report.attempted, "Remote circuit open, stopping drain");
                    break;
                }
            }
        }

        crate::metrics::record_drain(report.completed, report.failed, report.conflicted);
        if report.attempted > 0 {
            info!(
                completed = report.completed,
                failed = report.failed,
                conflicted = report.conflicted,
                deferred = report.deferred,
                "Drain pass finished"
            );
        }
        Ok(report)
    }
}
