use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::category::CacheCategory;

/// Metadata of one cached payload.
///
/// Stored in the cache-metadata partition; the payload itself lives in the
/// cache-data partition under the same key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub category: CacheCategory,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub access_count: u64,
    /// Serialized payload size
    pub size_bytes: usize,
}

impl CacheEntry {
    pub fn new(
        key: String,
        category: CacheCategory,
        size_bytes: usize,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            category,
            created_at: now,
            last_accessed_at: now,
            expires_at,
            access_count: 0,
            size_bytes,
        }
    }

    /// Logically absent once `now` is past `expires_at`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn record_access(&mut self, now: DateTime<Utc>) {
        self.last_accessed_at = now;
        self.access_count = self.access_count.saturating_add(1);
    }

    /// Seconds since last access.
    #[must_use]
    pub fn idle_secs(&self, now: DateTime<Utc>) -> f64 {
        ((now - self.last_accessed_at).num_milliseconds().max(0)) as f64 / 1000.0
    }

    /// Seconds since creation.
    #[must_use]
    pub fn age_secs(&self, now: DateTime<Utc>) -> f64 {
        ((now - self.created_at).num_milliseconds().max(0)) as f64 / 1000.0
    }
}
