//! Configuration for the offline engine.
//!
//! # Example
//!
//! ```
//! use offline_engine::OfflineEngineConfig;
//!
//! // Minimal config (uses defaults)
//! let config = OfflineEngineConfig::default();
//! assert_eq!(config.cache_max_items, 1000);
//! assert_eq!(config.cache_max_bytes, 50 * 1024 * 1024); // 50 MB
//!
//! // Full config
//! let config = OfflineEngineConfig {
//!     database_url: Some("sqlite:offline.db".into()),
//!     bulk_max_batch_size: 50,
//!     sync_max_retries: 5,
//!     ..Default::default()
//! };
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::resilience::retry::RetryConfig;

/// Configuration for the offline engine.
///
/// All fields have defaults, so any partial document deserializes.
/// Without `database_url` the engine keeps its state in memory only.
#[derive(Debug, Clone, Deserialize)]
pub struct OfflineEngineConfig {
    /// SQLite connection string (e.g., "sqlite:offline.db")
    #[serde(default)]
    pub database_url: Option<String>,

    /// Cache capacity: item count (default: 1000)
    #[serde(default = "default_cache_max_items")]
    pub cache_max_items: usize,

    /// Cache capacity: bytes (default: 50 MB)
    #[serde(default = "default_cache_max_bytes")]
    pub cache_max_bytes: usize,

    /// Size above which the health score starts dropping (default: 40 MB)
    #[serde(default = "default_cache_soft_limit_bytes")]
    pub cache_soft_limit_bytes: usize,

    /// Minimum entries removed per capacity cleanup
    #[serde(default = "default_cache_min_eviction_batch")]
    pub cache_min_eviction_batch: usize,

    /// Sync queue retry cooldown
    #[serde(default = "default_sync_base_delay_ms")]
    pub sync_base_delay_ms: u64,
    #[serde(default = "default_sync_backoff_multiplier")]
    pub sync_backoff_multiplier: f64,
    #[serde(default = "default_sync_max_retries")]
    pub sync_max_retries: u32,
    #[serde(default = "default_sync_max_delay_secs")]
    pub sync_max_delay_secs: u64,

    /// Items handed to the remote backend per drain pass
    #[serde(default = "default_sync_drain_batch_size")]
    pub sync_drain_batch_size: usize,

    /// Bulk operation limits
    #[serde(default = "default_bulk_max_batch_size")]
    pub bulk_max_batch_size: usize,
    #[serde(default = "default_bulk_history_limit")]
    pub bulk_history_limit: usize,

    /// Queue priority of follow-up mutations produced by bulk runs
    #[serde(default = "default_bulk_sync_priority")]
    pub bulk_sync_priority: i32,

    /// How long a bulk operation stays undoable
    #[serde(default = "default_undo_window_secs")]
    pub undo_window_secs: u64,

    /// Progress events buffered per subscriber before it lags
    #[serde(default = "default_progress_channel_capacity")]
    pub progress_channel_capacity: usize,

    /// Identity stamped on approved/rejected records
    #[serde(default)]
    pub reviewer_id: Option<String>,
}

fn default_cache_max_items() -> usize { 1000 }
fn default_cache_max_bytes() -> usize { 50 * 1024 * 1024 } // 50 MB
fn default_cache_soft_limit_bytes() -> usize { 40 * 1024 * 1024 } // 40 MB
fn default_cache_min_eviction_batch() -> usize { 10 }
fn default_sync_base_delay_ms() -> u64 { 30_000 }
fn default_sync_backoff_multiplier() -> f64 { 2.0 }
fn default_sync_max_retries() -> u32 { 3 }
fn default_sync_max_delay_secs() -> u64 { 3600 }
fn default_sync_drain_batch_size() -> usize { 20 }
fn default_bulk_max_batch_size() -> usize { 100 }
fn default_bulk_history_limit() -> usize { 50 }
fn default_bulk_sync_priority() -> i32 { 10 }
fn default_undo_window_secs() -> u64 { 1800 }
fn default_progress_channel_capacity() -> usize { 256 }

impl Default for OfflineEngineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            cache_max_items: default_cache_max_items(),
            cache_max_bytes: default_cache_max_bytes(),
            cache_soft_limit_bytes: default_cache_soft_limit_bytes(),
            cache_min_eviction_batch: default_cache_min_eviction_batch(),
            sync_base_delay_ms: default_sync_base_delay_ms(),
            sync_backoff_multiplier: default_sync_backoff_multiplier(),
            sync_max_retries: default_sync_max_retries(),
            sync_max_delay_secs: default_sync_max_delay_secs(),
            sync_drain_batch_size: default_sync_drain_batch_size(),
            bulk_max_batch_size: default_bulk_max_batch_size(),
            bulk_history_limit: default_bulk_history_limit(),
            bulk_sync_priority: default_bulk_sync_priority(),
            undo_window_secs: default_undo_window_secs(),
            progress_channel_capacity: default_progress_channel_capacity(),
            reviewer_id: None,
        }
    }
}

impl OfflineEngineConfig {
    /// Cooldown policy for the sync queue.
    #[must_use]
    pub fn sync_retry(&self) -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(self.sync_base_delay_ms),
            max_delay: Duration::from_secs(self.sync_max_delay_secs),
            factor: self.sync_backoff_multiplier,
            max_retries: Some(self.sync_max_retries as usize),
            jitter: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn undo_window(&self) -> Duration {
        Duration::from_secs(self.undo_window_secs)
    }
}
