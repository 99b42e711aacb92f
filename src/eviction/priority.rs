// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::cache::entry::CacheEntry;

/// Eviction priority combining access recency, access frequency and freshness.
///
/// Score range is `0.0` (evict first) to `1.0` (keep). Expired entries score 0.
pub struct PriorityPolicy {
    /// Half-life for recency decay (seconds)
    pub recency_half_life: f64,
    /// Half-life for freshness decay, measured from creation (seconds)
    pub age_half_life: f64,
    /// Max access count for normalization
    pub max_access_count: u64,
    /// Weights for each component (recency, frequency, freshness)
    pub weights: (f64, f64, f64),
}

impl Default for PriorityPolicy {
    fn default() -> Self {
        Self {
            recency_half_life: 3600.0,    // 1 hour
            age_half_life: 6.0 * 3600.0,  // 6 hours
            max_access_count: 100,
            weights: (0.4, 0.3, 0.3),
        }
    }
}

/// Entries chosen for removal by one cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionPlan {
    pub keys: Vec<String>,
    pub freed_bytes: usize,
}

impl PriorityPolicy {
    /// Calculate eviction score (0.0 = evict first, 1.0 = keep)
    #[must_use]
    pub fn calculate_score(&self, entry: &CacheEntry, now: DateTime<Utc>) -> f64 {
        if entry.is_expired(now) {
            return 0.0;
        }

        let recency = (-entry.idle_secs(now) / self.recency_half_life).exp();

        let frequency = if entry.access_count == 0 {
            0.0
        } else {
            let count = entry.access_count.min(self.max_access_count) as f64;
            (1.0 + count).ln() / (1.0 + self.max_access_count as f64).ln()
        };

        let freshness = (-entry.age_secs(now) / self.age_half_life).exp();

        recency * self.weights.0 + frequency * self.weights.1 + freshness * self.weights.2
    }

    /// Pick victims ordered by `(score asc, created_at asc)`.
    ///
    /// Stops once `freed_bytes >= required_bytes` and at least `min_count`
    /// entries are selected, or when the entries run out.
    #[must_use]
    pub fn select_victims(
        &self,
        entries: &[CacheEntry],
        required_bytes: usize,
        min_count: usize,
        now: DateTime<Utc>,
    ) -> EvictionPlan {
        let mut scored: Vec<(&CacheEntry, f64)> = entries
            .iter()
            .map(|e| (e, self.calculate_score(e, now)))
            .collect();

        scored.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.created_at.cmp(&b.0.created_at))
        });

        let mut plan = EvictionPlan::default();
        for (entry, _) in scored {
            if plan.freed_bytes >= required_bytes && plan.keys.len() >= min_count {
                break;
            }
            plan.freed_bytes += entry.size_bytes;
            plan.keys.push(entry.key.clone());
        }
        plan
    }
}
