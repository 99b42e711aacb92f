// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache Engine: category-based TTL cache over the persistent store.
//!
//! ```text
//!   put(key, payload, category, ttl?)
//!        │
//!        ├─ size = serialized JSON length
//!        ├─ capacity check ── over limit? ──► PriorityPolicy::select_victims
//!        │                                     (min batch + byte target)
//!        ├─ cache_data[key]     = payload
//!        └─ cache_metadata[key] = CacheEntry
//!
//!   get(key, extend_ttl)
//!        ├─ missing / expired / corrupted ──► None (expired + corrupted are purged)
//!        └─ record access, optionally push expires_at by ttl/2
//! ```
//!
//! Metadata is mirrored in an in-memory index so capacity checks and health
//! scoring never scan the store. Mutations are serialized behind one async
//! write gate.

pub mod category;
pub mod entry;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clock::{to_chrono, SharedClock};
use crate::config::OfflineEngineConfig;
use crate::eviction::PriorityPolicy;
use crate::storage::table::Table;
use crate::storage::traits::{Partition, PersistentStore, StorageError};

pub use category::CacheCategory;
pub use entry::CacheEntry;

const MIB: f64 = 1024.0 * 1024.0;

/// Capacity limits of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    pub max_items: usize,
    pub max_bytes: usize,
    /// Size above which health starts dropping
    pub soft_limit_bytes: usize,
    /// Minimum entries removed per cleanup pass
    pub min_eviction_batch: usize,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self::from(&OfflineEngineConfig::default())
    }
}

impl From<&OfflineEngineConfig> for CacheLimits {
    fn from(config: &OfflineEngineConfig) -> Self {
        Self {
            max_items: config.cache_max_items,
            max_bytes: config.cache_max_bytes,
            soft_limit_bytes: config.cache_soft_limit_bytes,
            min_eviction_batch: config.cache_min_eviction_batch,
        }
    }
}

/// Point-in-time cache summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub total_items: usize,
    pub expired_items: usize,
    pub total_bytes: usize,
    pub per_category: BTreeMap<CacheCategory, usize>,
    pub health_score: u8,
}

pub struct CacheEngine {
    data: Table<Value>,
    meta: Table<CacheEntry>,
    index: DashMap<String, CacheEntry>,
    total_bytes: AtomicUsize,
    limits: CacheLimits,
    policy: PriorityPolicy,
    clock: SharedClock,
    write_gate: Mutex<()>,
}

impl CacheEngine {
    pub fn new(store: Arc<dyn PersistentStore>, clock: SharedClock, limits: CacheLimits) -> Self {
        Self {
            data: Table::new(store.clone(), Partition::CacheData),
            meta: Table::new(store, Partition::CacheMetadata),
            index: DashMap::new(),
            total_bytes: AtomicUsize::new(0),
            limits,
            policy: PriorityPolicy::default(),
            clock,
            write_gate: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn limits(&self) -> CacheLimits {
        self.limits
    }

    /// Number of indexed entries (expired ones included until purged).
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.total_bytes.load(Ordering::Acquire)
    }

    /// Rebuild the in-memory index from the store.
    ///
    /// Metadata without a payload and payloads without metadata are deleted.
    pub async fn load(&self) -> Result<usize, StorageError> {
        let _gate = self.write_gate.lock().await;
        self.index.clear();
        self.total_bytes.store(0, Ordering::Release);

        let payloads = self.data.entries().await?;
        let payload_keys: std::collections::HashSet<&str> =
            payloads.iter().map(|(k, _)| k.as_str()).collect();

        let mut orphans = 0usize;
        for (key, entry) in self.meta.entries().await? {
            if !payload_keys.contains(key.as_str()) {
                self.meta.delete(&key).await?;
                orphans += 1;
                continue;
            }
            self.total_bytes.fetch_add(entry.size_bytes, Ordering::AcqRel);
            self.index.insert(key, entry);
        }
        for (key, _) in &payloads {
            if !self.index.contains_key(key) {
                self.data.delete(key).await?;
                orphans += 1;
            }
        }

        if orphans > 0 {
            warn!(orphans, "Dropped orphaned cache entries during load");
        }
        self.publish_gauges();
        info!(items = self.index.len(), bytes = self.total_bytes(), "Cache index loaded");
        Ok(self.index.len())
    }

    /// Store `payload` under `key`.
    ///
    /// `ttl` defaults to the category's TTL. Capacity is enforced before the
    /// insert, so limits hold once this returns.
    pub async fn put<T: Serialize + ?Sized>(
        &self,
        key: &str,
        payload: &T,
        category: CacheCategory,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let value = serde_json::to_value(payload)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let size = value.to_string().len();

        if size > self.limits.max_bytes {
            crate::metrics::record_error("cache", "put", "insufficient_space");
            return Err(StorageError::InsufficientSpace {
                required: size,
                available: self.limits.max_bytes,
            });
        }

        let _gate = self.write_gate.lock().await;

        // The entry being overwritten neither counts against the limits nor gets evicted
        let replaced = self.index.get(key).map(|e| e.size_bytes);
        self.enforce_capacity(size, key, replaced).await?;

        let now = self.clock.now();
        let ttl = ttl.unwrap_or_else(|| category.ttl());
        let entry = CacheEntry::new(key.to_string(), category, size, now, now + to_chrono(ttl));

        self.data.put(key, &value).await?;
        self.meta.put(key, &entry).await?;

        // Index follows the store only once both writes landed
        if let Some(old) = self.index.insert(key.to_string(), entry) {
            self.total_bytes.fetch_sub(old.size_bytes, Ordering::AcqRel);
        }
        self.total_bytes.fetch_add(size, Ordering::AcqRel);

        debug!(key = %key, category = %category, size, "Cached entry");
        self.publish_gauges();
        Ok(())
    }

    /// Fetch a payload; `None` for missing, expired or undecodable entries.
    ///
    /// With `extend_ttl`, an entry still inside its category's nominal window
    /// gets `expires_at` pushed out by half that window.
    pub async fn get<T: DeserializeOwned>(
        &self,
        key: &str,
        extend_ttl: bool,
    ) -> Result<Option<T>, StorageError> {
        let _gate = self.write_gate.lock().await;

        let Some(mut entry) = self.index.get(key).map(|e| e.value().clone()) else {
            crate::metrics::record_cache_access("unknown", "miss");
            return Ok(None);
        };
        let category = entry.category.as_str();
        let now = self.clock.now();

        if entry.is_expired(now) {
            self.remove_entry(key).await?;
            crate::metrics::record_cache_access(category, "expired");
            debug!(key = %key, "Purged expired entry on read");
            return Ok(None);
        }

        let Some(value) = self.data.get(key).await? else {
            self.remove_entry(key).await?;
            crate::metrics::record_cache_access(category, "corrupted");
            return Ok(None);
        };

        let payload = match serde_json::from_value::<T>(value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key = %key, error = %e, "Dropping cache payload that no longer decodes");
                crate::metrics::record_corruption(Partition::CacheData.as_str());
                crate::metrics::record_cache_access(category, "corrupted");
                self.remove_entry(key).await?;
                return Ok(None);
            }
        };

        entry.record_access(now);
        if extend_ttl {
            let nominal = to_chrono(entry.category.ttl());
            if now - entry.created_at < nominal {
                entry.expires_at += nominal / 2;
                debug!(key = %key, expires_at = %entry.expires_at, "Extended TTL");
            }
        }
        self.meta.put(key, &entry).await?;
        self.index.insert(key.to_string(), entry);

        crate::metrics::record_cache_access(category, "hit");
        Ok(Some(payload))
    }

    /// Remove an entry; returns whether it existed.
    pub async fn remove(&self, key: &str) -> Result<bool, StorageError> {
        let _gate = self.write_gate.lock().await;
        let existed = self.remove_entry(key).await?;
        self.publish_gauges();
        Ok(existed)
    }

    /// True when a non-expired entry exists.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.index.get(key).is_some_and(|e| !e.is_expired(now))
    }

    /// Purge every expired entry.
    pub async fn cleanup_expired(&self) -> Result<usize, StorageError> {
        let _gate = self.write_gate.lock().await;
        let now = self.clock.now();
        let expired: Vec<String> = self
            .index
            .iter()
            .filter(|e| e.is_expired(now))
            .map(|e| e.key().clone())
            .collect();

        for key in &expired {
            self.remove_entry(key).await?;
        }
        if !expired.is_empty() {
            info!(removed = expired.len(), "Expired cache entries cleaned up");
        }
        self.publish_gauges();
        Ok(expired.len())
    }

    /// Drop every entry of one category.
    pub async fn invalidate_category(&self, category: CacheCategory) -> Result<usize, StorageError> {
        let _gate = self.write_gate.lock().await;
        let keys: Vec<String> = self
            .index
            .iter()
            .filter(|e| e.category == category)
            .map(|e| e.key().clone())
            .collect();

        for key in &keys {
            self.remove_entry(key).await?;
        }
        self.publish_gauges();
        Ok(keys.len())
    }

    pub async fn clear(&self) -> Result<(), StorageError> {
        let _gate = self.write_gate.lock().await;
        self.data.clear().await?;
        self.meta.clear().await?;
        self.index.clear();
        self.total_bytes.store(0, Ordering::Release);
        self.publish_gauges();
        Ok(())
    }

    /// Health in `[0, 100]`.
    ///
    /// Starts at 100; loses `30 * expired/total`, 2 per MB above the soft
    /// limit, and 20 when fewer than 5 entries are cached.
    #[must_use]
    pub fn health_score(&self) -> u8 {
        let now = self.clock.now();
        let total = self.index.len();
        let expired = self.index.iter().filter(|e| e.is_expired(now)).count();
        let score = self.score_for(total, expired, self.total_bytes());
        crate::metrics::set_cache_health(score);
        score
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let mut per_category = BTreeMap::new();
        let mut expired_items = 0;
        for item in self.index.iter() {
            *per_category.entry(item.category).or_insert(0) += 1;
            if item.is_expired(now) {
                expired_items += 1;
            }
        }
        let total_items = self.index.len();
        let total_bytes = self.total_bytes();
        CacheStats {
            total_items,
            expired_items,
            total_bytes,
            per_category,
            health_score: self.score_for(total_items, expired_items, total_bytes),
        }
    }

    fn score_for(&self, total: usize, expired: usize, bytes: usize) -> u8 {
        let mut score = 100.0;
        if total > 0 {
            score -= 30.0 * (expired as f64 / total as f64);
        }
        if bytes > self.limits.soft_limit_bytes {
            let over_mb = (bytes - self.limits.soft_limit_bytes) as f64 / MIB;
            score -= 2.0 * over_mb;
        }
        if total < 5 {
            score -= 20.0;
        }
        score.clamp(0.0, 100.0).round() as u8
    }

    /// Evict until the incoming `new_bytes` fits both limits.
    ///
    /// `replaced` is the size of the entry `key` currently holds, if any.
    /// Caller holds the write gate.
    async fn enforce_capacity(
        &self,
        new_bytes: usize,
        key: &str,
        replaced: Option<usize>,
    ) -> Result<(), StorageError> {
        let count = self.index.len() - usize::from(replaced.is_some());
        let bytes = self.total_bytes().saturating_sub(replaced.unwrap_or(0));
        if count < self.limits.max_items && bytes + new_bytes <= self.limits.max_bytes {
            return Ok(());
        }

        let required = (bytes + new_bytes).saturating_sub(self.limits.max_bytes);
        let over_count = (count + 1).saturating_sub(self.limits.max_items);
        let min_count = self.limits.min_eviction_batch.max(over_count);

        let now = self.clock.now();
        let entries: Vec<CacheEntry> = self
            .index
            .iter()
            .filter(|e| e.key() != key)
            .map(|e| e.value().clone())
            .collect();
        let plan = self.policy.select_victims(&entries, required, min_count, now);

        for key in &plan.keys {
            self.remove_entry(key).await?;
        }

        crate::metrics::record_eviction(plan.keys.len(), plan.freed_bytes);
        info!(
            evicted = plan.keys.len(),
            freed_bytes = plan.freed_bytes,
            required_bytes = required,
            "Capacity cleanup"
        );
        Ok(())
    }

    /// Caller holds the write gate.
    async fn remove_entry(&self, key: &str) -> Result<bool, StorageError> {
        let existed = match self.index.remove(key) {
            Some((_, entry)) => {
                self.total_bytes.fetch_sub(entry.size_bytes, Ordering::AcqRel);
                true
            }
            None => false,
        };
        self.data.delete(key).await?;
        self.meta.delete(key).await?;
        Ok(existed)
    }

    fn publish_gauges(&self) {
        crate::metrics::set_cache_items(self.index.len());
        crate::metrics::set_cache_bytes(self.total_bytes());
    }
}
