// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Short-lived in-memory response caches
//!
//! Provider façades memoise successful results for a few seconds so that bursts of
//! identical HTTP requests are answered without touching the dispatcher at all. Block
//! timestamps, which never change, use the same structure with a long TTL.

use std::{hash::Hash, time::Duration};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, trace};

/// Cached value with access tracking
#[derive(Debug, Clone)]
struct CachedEntry<V> {
    value: V,
    cached_at: Instant,
    last_access: Instant,
    access_count: u64,
}

impl<V> CachedEntry<V> {
    fn new(value: V) -> Self {
        let now = Instant::now();
        Self {
            value,
            cached_at: now,
            last_access: now,
            access_count: 0,
        }
    }

    fn is_valid(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() < ttl
    }
}

/// TTL cache with least-recently-used eviction at capacity
#[derive(Debug)]
pub struct ResponseCache<K: Eq + Hash, V> {
    name: &'static str,
    entries: DashMap<K, CachedEntry<V>>,
    ttl: Duration,
    max_entries: usize,
    stats: DashMap<&'static str, u64>,
}

impl<K, V> ResponseCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    /// Create a cache; `name` labels its log lines and statistics
    pub fn new(name: &'static str, ttl: Duration, max_entries: usize) -> Self {
        Self {
            name,
            entries: DashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
            stats: DashMap::new(),
        }
    }

    /// Cache name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Fresh value for `key`, if any
    pub fn get(&self, key: &K) -> Option<V> {
        if let Some(mut cached) = self.entries.get_mut(key) {
            if cached.is_valid(self.ttl) {
                cached.access_count += 1;
                cached.last_access = Instant::now();
                self.increment_stat("hits");
                trace!(cache = self.name, ?key, "cache hit");
                return Some(cached.value.clone());
            }
            drop(cached);
            self.entries.remove(key);
            self.increment_stat("expired");
        }

        self.increment_stat("misses");
        None
    }

    /// Store `value` under `key`, evicting the least recently used entry at capacity
    pub fn insert(&self, key: K, value: V) {
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            if self.cleanup_expired() == 0 {
                self.evict_least_recently_used();
            }
        }
        self.entries.insert(key, CachedEntry::new(value));
        self.increment_stat("stores");
    }

    /// Remove every entry
    pub fn clear(&self) {
        self.entries.clear();
        debug!(cache = self.name, "cache cleared");
    }

    /// Number of entries, including expired ones not yet removed
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove expired entries; returns how many were removed
    pub fn cleanup_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_valid(self.ttl));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            self.add_stat("expired", removed as u64);
            debug!(cache = self.name, removed, "removed expired cache entries");
        }
        removed
    }

    fn evict_least_recently_used(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|item| (item.value().last_access, item.value().access_count))
            .map(|item| item.key().clone());

        if let Some(key) = oldest
            && let Some((_, entry)) = self.entries.remove(&key)
        {
            self.increment_stat("evictions");
            debug!(
                cache = self.name,
                ?key,
                access_count = entry.access_count,
                age_ms = entry.cached_at.elapsed().as_millis(),
                "evicted least recently used cache entry"
            );
        }
    }

    /// Counters and utilisation
    pub fn stats(&self) -> CacheStats {
        let hits = self.stat("hits");
        let misses = self.stat("misses");
        #[allow(clippy::cast_precision_loss)]
        let hit_rate = if hits + misses > 0 {
            hits as f64 / (hits + misses) as f64
        } else {
            0.0
        };

        CacheStats {
            name: self.name.to_string(),
            entry_count: self.entries.len(),
            max_capacity: self.max_entries,
            ttl_seconds: self.ttl.as_secs(),
            hits,
            misses,
            stores: self.stat("stores"),
            evictions: self.stat("evictions"),
            expired: self.stat("expired"),
            hit_rate,
        }
    }

    fn increment_stat(&self, key: &'static str) {
        self.add_stat(key, 1);
    }

    fn add_stat(&self, key: &'static str, amount: u64) {
        *self.stats.entry(key).or_insert(0) += amount;
    }

    fn stat(&self, key: &'static str) -> u64 {
        self.stats.get(key).map_or(0, |value| *value)
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    /// Cache name
    pub name: String,
    /// Entries currently stored
    pub entry_count: usize,
    /// Maximum number of entries
    pub max_capacity: usize,
    /// Entry lifetime in seconds
    pub ttl_seconds: u64,
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that found nothing fresh
    pub misses: u64,
    /// Values stored
    pub stores: u64,
    /// Entries evicted at capacity
    pub evictions: u64,
    /// Entries dropped after their TTL
    pub expired: u64,
    /// `hits / (hits + misses)`
    pub hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn values_expire_after_ttl() {
        let cache = ResponseCache::new("test", Duration::from_secs(20), 10);
        cache.insert("balances:0xabc:1".to_string(), 7);
        assert_eq!(cache.get(&"balances:0xabc:1".to_string()), Some(7));

        tokio::time::advance(Duration::from_secs(21)).await;
        assert_eq!(cache.get(&"balances:0xabc:1".to_string()), None);
        assert!(cache.is_empty());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expired, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn least_recently_used_entry_is_evicted() {
        let cache = ResponseCache::new("test", Duration::from_secs(3600), 2);
        cache.insert(1, "one");
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.insert(2, "two");
        tokio::time::advance(Duration::from_millis(10)).await;
        assert_eq!(cache.get(&1), Some("one"));

        cache.insert(3, "three");
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&2), None);
        assert_eq!(cache.get(&1), Some("one"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_make_room_before_eviction() {
        let cache = ResponseCache::new("test", Duration::from_secs(1), 1);
        cache.insert(1, 1);
        tokio::time::advance(Duration::from_secs(2)).await;
        cache.insert(2, 2);

        let stats = cache.stats();
        assert_eq!(stats.evictions, 0);
        assert_eq!(stats.expired, 1);
        assert_eq!(cache.get(&2), Some(2));
    }

    #[test]
    fn overwriting_does_not_evict() {
        let cache = ResponseCache::new("test", Duration::from_secs(60), 1);
        cache.insert("k", 1);
        cache.insert("k", 2);
        assert_eq!(cache.get(&"k"), Some(2));
        assert_eq!(cache.stats().evictions, 0);
        cache.clear();
        assert!(cache.is_empty());
    }
}
