//! Time-boxed, size-bounded cache of comparison results.
//!
//! Eviction is insertion-order, not least-recently-used: beyond the
//! capacity the single oldest-inserted entry is dropped. A read past the
//! TTL counts as a miss and removes the stale entry. Results are shared
//! as `Arc`s, so a hit hands back the identical object.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::compare::ComparisonResult;
use crate::ingredient::IngredientId;
use crate::population::Population;

/// Maximum retained entries.
pub const CACHE_CAPACITY: usize = 50;

/// Entry lifetime in minutes.
pub const CACHE_TTL_MINUTES: i64 = 30;

/// Cache key: what was compared, in which mode, against what.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// A cross-population comparison.
    Populations {
        /// The compared ingredient.
        ingredient: IngredientId,
        /// The population set, sorted and deduplicated.
        populations: Vec<Population>,
    },
    /// A version-pair comparison within one population.
    Versions {
        /// The compared ingredient.
        ingredient: IngredientId,
        /// The population the versions belong to.
        population: Population,
        /// Older version label.
        left: String,
        /// Newer version label.
        right: String,
    },
}

impl CacheKey {
    /// Builds a population-mode key. The population set is sorted and
    /// deduplicated so argument order does not split cache entries.
    #[must_use]
    pub fn populations(ingredient: &IngredientId, populations: &[Population]) -> Self {
        let mut populations = populations.to_vec();
        populations.sort_unstable();
        populations.dedup();
        Self::Populations {
            ingredient: ingredient.clone(),
            populations,
        }
    }

    /// Builds a version-mode key.
    #[must_use]
    pub fn versions(
        ingredient: &IngredientId,
        population: Population,
        left: &str,
        right: &str,
    ) -> Self {
        Self::Versions {
            ingredient: ingredient.clone(),
            population,
            left: left.to_string(),
            right: right.to_string(),
        }
    }
}

#[derive(Debug)]
struct CacheSlot {
    key: CacheKey,
    result: Arc<ComparisonResult>,
    inserted_at: DateTime<Utc>,
}

/// Insertion-ordered comparison cache with TTL.
///
/// The cache has its own lock: it has no ordering dependency on the
/// linking history, so contention there never blocks a cached read.
/// A poisoned lock degrades to cache-miss behavior.
#[derive(Debug)]
pub struct ComparisonCache {
    slots: Mutex<VecDeque<CacheSlot>>,
    ttl: Duration,
    capacity: usize,
}

impl Default for ComparisonCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ComparisonCache {
    /// Creates a cache with the standard TTL and capacity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(VecDeque::new()),
            ttl: Duration::minutes(CACHE_TTL_MINUTES),
            capacity: CACHE_CAPACITY,
        }
    }

    /// Creates a cache with a custom TTL (tests use zero to force
    /// immediate expiry).
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            slots: Mutex::new(VecDeque::new()),
            ttl,
            capacity: CACHE_CAPACITY,
        }
    }

    /// Looks up a result, evicting any expired entries first.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<Arc<ComparisonResult>> {
        let mut slots = self.slots.lock().ok()?;
        let now = Utc::now();
        slots.retain(|slot| now - slot.inserted_at < self.ttl);
        slots
            .iter()
            .find(|slot| slot.key == *key)
            .map(|slot| Arc::clone(&slot.result))
    }

    /// Inserts a result, replacing any entry under the same key and
    /// evicting the oldest entry beyond capacity.
    pub fn insert(&self, key: CacheKey, result: Arc<ComparisonResult>) {
        let Ok(mut slots) = self.slots.lock() else {
            return;
        };
        slots.retain(|slot| slot.key != key);
        slots.push_back(CacheSlot {
            key,
            result,
            inserted_at: Utc::now(),
        });
        while slots.len() > self.capacity {
            if let Some(evicted) = slots.pop_front() {
                debug!(ingredient = %evicted.result.ingredient_id, "evicted comparison cache entry");
            }
        }
    }

    /// Number of retained entries, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().map(|slots| slots.len()).unwrap_or(0)
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry.
    pub fn clear(&self) {
        if let Ok(mut slots) = self.slots.lock() {
            slots.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::{ComparisonId, ComparisonMode, ComparisonSummary};

    fn result(id: &str) -> Arc<ComparisonResult> {
        Arc::new(ComparisonResult {
            id: ComparisonId::new(),
            ingredient_id: IngredientId::new(id),
            mode: ComparisonMode::Populations,
            timestamp: Utc::now(),
            comparisons: Vec::new(),
            summary: ComparisonSummary::default(),
        })
    }

    fn key(id: &str) -> CacheKey {
        CacheKey::populations(
            &IngredientId::new(id),
            &[Population::Neonatal, Population::Child],
        )
    }

    #[test]
    fn test_hit_returns_identical_object() {
        let cache = ComparisonCache::new();
        let stored = result("ing-1");
        cache.insert(key("ing-1"), Arc::clone(&stored));

        let hit = cache.get(&key("ing-1")).unwrap();
        assert!(Arc::ptr_eq(&hit, &stored));
    }

    #[test]
    fn test_key_normalizes_population_order() {
        let a = CacheKey::populations(
            &IngredientId::new("x"),
            &[Population::Adult, Population::Neonatal],
        );
        let b = CacheKey::populations(
            &IngredientId::new("x"),
            &[Population::Neonatal, Population::Adult, Population::Adult],
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_zero_ttl_expires_immediately() {
        let cache = ComparisonCache::with_ttl(Duration::zero());
        cache.insert(key("ing-1"), result("ing-1"));

        assert!(cache.get(&key("ing-1")).is_none());
        // The stale slot was evicted by the read.
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest_inserted() {
        let cache = ComparisonCache::new();
        for i in 0..=CACHE_CAPACITY {
            cache.insert(key(&format!("ing-{i}")), result(&format!("ing-{i}")));
        }

        assert_eq!(cache.len(), CACHE_CAPACITY);
        assert!(cache.get(&key("ing-0")).is_none());
        assert!(cache.get(&key(&format!("ing-{CACHE_CAPACITY}"))).is_some());
    }

    #[test]
    fn test_reinsert_replaces_same_key() {
        let cache = ComparisonCache::new();
        let first = result("ing-1");
        let second = result("ing-1");
        cache.insert(key("ing-1"), first);
        cache.insert(key("ing-1"), Arc::clone(&second));

        assert_eq!(cache.len(), 1);
        assert!(Arc::ptr_eq(&cache.get(&key("ing-1")).unwrap(), &second));
    }

    #[test]
    fn test_clear() {
        let cache = ComparisonCache::new();
        cache.insert(key("ing-1"), result("ing-1"));
        cache.clear();
        assert!(cache.is_empty());
    }
}
