// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the offline engine.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for installing a recorder.
//!
//! # Metric Naming Convention
//! - `offline_engine_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//! - `_bytes` suffix for sizes
//!
//! # Labels
//! - `partition`: store partition name
//! - `category`: cache category
//! - `status`: outcome / queue status

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

// ═══════════════════════════════════════════════════════════════════════════
// STORE
// ═══════════════════════════════════════════════════════════════════════════

/// Record store operation latency
pub fn record_latency(partition: &str, operation: &str, duration: Duration) {
    histogram!(
        "offline_engine_store_operation_seconds",
        "partition" => partition.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a corrupted entry dropped on read
pub fn record_corruption(partition: &str) {
    counter!(
        "offline_engine_corruption_dropped_total",
        "partition" => partition.to_string()
    )
    .increment(1);
}

/// Record an error with category for alerting
pub fn record_error(component: &str, operation: &str, error_type: &str) {
    counter!(
        "offline_engine_errors_total",
        "component" => component.to_string(),
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// CACHE
// ═══════════════════════════════════════════════════════════════════════════

/// Record a cache lookup outcome (hit, miss, expired, corrupted)
pub fn record_cache_access(category: &str, outcome: &str) {
    counter!(
        "offline_engine_cache_access_total",
        "category" => category.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record eviction event
pub fn record_eviction(count: usize, bytes: usize) {
    counter!("offline_engine_evictions_total").increment(count as u64);
    counter!("offline_engine_evicted_bytes_total").increment(bytes as u64);
}

/// Set current cache size in bytes
pub fn set_cache_bytes(bytes: usize) {
    gauge!("offline_engine_cache_bytes").set(bytes as f64);
}

/// Set current cache item count
pub fn set_cache_items(count: usize) {
    gauge!("offline_engine_cache_items").set(count as f64);
}

/// Set cache health score (0 - 100)
pub fn set_cache_health(score: u8) {
    gauge!("offline_engine_cache_health_score").set(score as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// SYNC QUEUE
// ═══════════════════════════════════════════════════════════════════════════

/// Record a queue item entering a status
pub fn record_queue_transition(status: &str) {
    counter!(
        "offline_engine_queue_transitions_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Set number of items waiting for delivery
pub fn set_queue_depth(count: usize) {
    gauge!("offline_engine_queue_depth").set(count as f64);
}

/// Record a drain pass
pub fn record_drain(completed: usize, failed: usize, conflicted: usize) {
    counter!("offline_engine_drain_passes_total").increment(1);
    counter!("offline_engine_drained_items_total", "status" => "completed").increment(completed as u64);
    counter!("offline_engine_drained_items_total", "status" => "failed").increment(failed as u64);
    counter!("offline_engine_drained_items_total", "status" => "conflict").increment(conflicted as u64);
}

/// Record circuit breaker call outcome
pub fn record_circuit_breaker_call(circuit: &str, outcome: &str) {
    counter!(
        "offline_engine_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// BULK OPERATIONS
// ═══════════════════════════════════════════════════════════════════════════

/// Record a finished bulk run
pub fn record_bulk_operation(kind: &str, status: &str, duration: Duration) {
    counter!(
        "offline_engine_bulk_operations_total",
        "type" => kind.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!(
        "offline_engine_bulk_operation_seconds",
        "type" => kind.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record per-item outcomes of a bulk run
pub fn record_bulk_items(kind: &str, succeeded: usize, failed: usize) {
    counter!("offline_engine_bulk_items_total", "type" => kind.to_string(), "outcome" => "success")
        .increment(succeeded as u64);
    counter!("offline_engine_bulk_items_total", "type" => kind.to_string(), "outcome" => "failure")
        .increment(failed as u64);
}

/// Record an undo attempt
pub fn record_undo(outcome: &str) {
    counter!("offline_engine_undo_total", "outcome" => outcome.to_string()).increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// LIFECYCLE
// ═══════════════════════════════════════════════════════════════════════════

/// Record engine state transition
pub fn set_engine_state(state: &str) {
    counter!(
        "offline_engine_state_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
}

/// Record a startup or shutdown phase
pub fn record_startup_phase(phase: &str, duration: Duration) {
    histogram!(
        "offline_engine_startup_phase_seconds",
        "phase" => phase.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record total startup time
pub fn record_startup_total(duration: Duration) {
    histogram!("offline_engine_startup_seconds").record(duration.as_secs_f64());
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    partition: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(partition: &'static str, operation: &'static str) -> Self {
        Self {
            partition,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.partition, self.operation, self.start.elapsed());
    }
}
