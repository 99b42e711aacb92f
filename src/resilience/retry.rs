// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff.
//!
//! The same policy drives two things: in-process retries of a failing
//! operation ([`retry`]) and the sync queue cooldown between delivery
//! attempts ([`RetryConfig::delay_for`]).
//!
//! # Example
//!
//! ```
//! use offline_engine::RetryConfig;
//! use std::time::Duration;
//!
//! // Startup: fail fast on bad config
//! let startup = RetryConfig::startup();
//! assert_eq!(startup.max_retries, Some(5));
//!
//! // Sync queue cooldown: 30s, 60s, 120s ...
//! let queue = RetryConfig::sync_queue();
//! assert_eq!(queue.delay_for(0), Duration::from_secs(30));
//! assert_eq!(queue.delay_for(2), Duration::from_secs(120));
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{info, warn};

/// Configuration for operation retry behavior.
///
/// `max_retries` counts attempts: `Some(3)` means the operation runs at most
/// three times. `None` retries forever.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub max_retries: Option<usize>,
    /// Upper bound of the random delay added to each sleep
    pub jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::sync_queue()
    }
}

impl RetryConfig {
    /// Fast-fail retry for opening the local database.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: Some(5),
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
            jitter: Duration::ZERO,
        }
    }

    /// Quick retry for individual queries.
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
            jitter: Duration::from_millis(50),
        }
    }

    /// Sync queue cooldown: 30s base, doubling, 3 attempts.
    #[must_use]
    pub fn sync_queue() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(3600),
            factor: 2.0,
            jitter: Duration::ZERO,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
            jitter: Duration::ZERO,
        }
    }

    /// Delay after `n` previous failures: `initial * factor^n`, capped at `max_delay`.
    ///
    /// Non-decreasing in `n` as long as `factor >= 1.0`.
    #[must_use]
    pub fn delay_for(&self, n: u32) -> Duration {
        let exp = i32::try_from(n).unwrap_or(i32::MAX);
        let scaled = self.initial_delay.as_secs_f64() * self.factor.powi(exp);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled.max(0.0))
    }

    /// Whether `attempts` failures exhaust this policy.
    #[must_use]
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        match self.max_retries {
            Some(max) => attempts as usize >= max,
            None => false,
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter.is_zero() {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
        delay + Duration::from_millis(extra)
    }
}

/// Run `operation` until it succeeds or the policy is exhausted.
///
/// The sleep after failure `n` is [`RetryConfig::delay_for`]`(n - 1)` plus
/// jitter. On exhaustion the error of the final attempt is returned unchanged.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut failures: u32 = 0;

    loop {
        let err = match operation().await {
            Ok(val) => {
                if failures > 0 {
                    info!(operation = operation_name, failures, "Recovered after retrying");
                }
                return Ok(val);
            }
            Err(err) => err,
        };

        failures = failures.saturating_add(1);
        if config.is_exhausted(failures) {
            warn!(operation = operation_name, attempts = failures, error = %err, "Giving up");
            return Err(err);
        }

        let wait = config.jittered(config.delay_for(failures - 1));
        warn!(
            operation = operation_name,
            attempt = failures,
            max_attempts = ?config.max_retries,
            error = %err,
            wait_ms = wait.as_millis() as u64,
            "Attempt failed, backing off"
        );
        sleep(wait).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Fails its first `fail_first` calls with the attempt number.
    fn flaky(fail_first: u32) -> (Arc<AtomicU32>, impl FnMut() -> std::future::Ready<Result<&'static str, String>>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let op = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(if n <= fail_first {
                Err(format!("attempt {}", n))
            } else {
                Ok("synced")
            })
        };
        (calls, op)
    }

    #[tokio::test]
    async fn test_first_try_success_does_not_sleep() {
        let (calls, op) = flaky(0);
        assert_eq!(retry("push", &RetryConfig::test(), op).await, Ok("synced"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_within_budget() {
        let (calls, op) = flaky(2);
        assert_eq!(retry("push", &RetryConfig::test(), op).await, Ok("synced"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error_after_backoff() {
        let policy = RetryConfig {
            max_retries: Some(3),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            factor: 2.0,
            jitter: Duration::ZERO,
        };
        let (calls, op) = flaky(u32::MAX);

        let started = tokio::time::Instant::now();
        let outcome = retry("push", &policy, op).await;

        assert_eq!(outcome, Err("attempt 3".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s after the first failure, 2s after the second, none after the last
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(3) && waited < Duration::from_secs(4));
    }

    #[test]
    fn test_presets() {
        assert_eq!(RetryConfig::startup().max_retries, Some(5));
        assert_eq!(RetryConfig::query().jitter, Duration::from_millis(50));

        let queue = RetryConfig::default();
        assert_eq!(queue.initial_delay, Duration::from_secs(30));
        assert_eq!(queue.max_retries, Some(3));
    }

    #[test]
    fn test_cooldown_doubles_then_caps() {
        let queue = RetryConfig::sync_queue();
        let delays: Vec<u64> = (0..8).map(|n| queue.delay_for(n).as_secs()).collect();
        assert_eq!(delays, vec![30, 60, 120, 240, 480, 960, 1920, 3600]);
        assert_eq!(queue.delay_for(u32::MAX), Duration::from_secs(3600));
    }

    #[test]
    fn test_is_exhausted() {
        let queue = RetryConfig::sync_queue();
        assert!(!queue.is_exhausted(2));
        assert!(queue.is_exhausted(3));

        let forever = RetryConfig { max_retries: None, ..RetryConfig::sync_queue() };
        assert!(!forever.is_exhausted(u32::MAX));
    }

    #[test]
    fn test_jitter_stays_within_bound() {
        let policy = RetryConfig {
            jitter: Duration::from_millis(20),
            ..RetryConfig::test()
        };
        for _ in 0..50 {
            let wait = policy.jittered(Duration::from_millis(100));
            assert!((Duration::from_millis(100)..=Duration::from_millis(120)).contains(&wait));
        }
    }
}
