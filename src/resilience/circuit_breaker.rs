// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Circuit breaker for the remote sync backend, using the recloser crate.
//!
//! While the backend keeps failing, the drain loop stops hammering it: the
//! breaker opens and calls fail fast until the recovery timeout passes.
//!
//! States:
//! - Closed: calls pass through, outcomes fill a sliding window
//! - Open: failure rate over the window crossed the threshold, calls are rejected
//! - HalfOpen: a few probe calls decide whether to close again

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use recloser::{AsyncRecloser, Error as RecloserError, Recloser};
use tracing::{debug, warn};

/// Result of a call made through a [`CircuitBreaker`].
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    /// The circuit is open; the push was never attempted
    #[error("remote circuit open, call skipped")]
    Rejected,

    #[error(transparent)]
    Inner(E),
}

#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Calls in the closed-state sliding window
    pub window: usize,
    /// Failure rate over the window that opens the circuit (0.0 - 1.0)
    pub failure_rate: f32,
    /// Probe calls allowed while half-open
    pub half_open_probes: usize,
    /// How long the circuit stays open before probing
    pub recovery_timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self::remote_sync()
    }
}

impl CircuitConfig {
    /// Remote sync: a device on a flaky network trips quickly and waits a while.
    #[must_use]
    pub fn remote_sync() -> Self {
        Self {
            window: 5,
            failure_rate: 0.5,
            half_open_probes: 2,
            recovery_timeout: Duration::from_secs(60),
        }
    }

    /// Trips on the first failure and stays open for the whole test.
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            window: 1,
            failure_rate: 0.0,
            half_open_probes: 1,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

/// Call accounting since the breaker was built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CircuitStats {
    pub accepted: u64,
    pub failed: u64,
    pub rejected: u64,
    /// Rejections since the last call that reached the backend
    pub rejected_in_a_row: u64,
}

impl CircuitStats {
    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.accepted + self.failed + self.rejected
    }

    /// Whether the latest call was turned away.
    ///
    /// recloser does not expose its state, so this is inferred from outcomes.
    #[must_use]
    pub fn appears_open(&self) -> bool {
        self.rejected_in_a_row > 0
    }
}

/// A named circuit breaker with call accounting.
pub struct CircuitBreaker {
    name: String,
    inner: AsyncRecloser,
    stats: Mutex<CircuitStats>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        let recloser = Recloser::custom()
            .error_rate(config.failure_rate)
            .closed_len(config.window.max(1))
            .half_open_len(config.half_open_probes.max(1))
            .open_wait(config.recovery_timeout)
            .build();

        Self {
            name: name.into(),
            inner: recloser.into(),
            stats: Mutex::new(CircuitStats::default()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn stats(&self) -> CircuitStats {
        *self.stats.lock()
    }

    #[must_use]
    pub fn appears_open(&self) -> bool {
        self.stats().appears_open()
    }

    /// Run `f` through the breaker; `f`'s future is not polled when the circuit is open.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let outcome = self.inner.call(f()).await;

        let mut stats = self.stats.lock();
        match outcome {
            Ok(value) => {
                stats.accepted += 1;
                stats.rejected_in_a_row = 0;
                crate::metrics::record_circuit_breaker_call(&self.name, "success");
                Ok(value)
            }
            Err(RecloserError::Inner(e)) => {
                stats.failed += 1;
                stats.rejected_in_a_row = 0;
                debug!(circuit = %self.name, failed = stats.failed, "Call through circuit failed");
                crate::metrics::record_circuit_breaker_call(&self.name, "failure");
                Err(CircuitError::Inner(e))
            }
            Err(RecloserError::Rejected) => {
                stats.rejected += 1;
                stats.rejected_in_a_row += 1;
                if stats.rejected_in_a_row == 1 {
                    warn!(circuit = %self.name, "Circuit open, skipping remote calls");
                }
                crate::metrics::record_circuit_breaker_call(&self.name, "rejected");
                Err(CircuitError::Rejected)
            }
        }
    }
}
