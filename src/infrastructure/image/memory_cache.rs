//! In-memory, cost-accounted LRU image cache.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::{CacheKey, decoded_cost};

/// Default maximum number of images kept in memory.
pub const DEFAULT_COUNT_LIMIT: usize = 150;

/// Default total decoded-byte budget (150 MiB).
pub const DEFAULT_COST_LIMIT: u64 = 150 * 1024 * 1024;

struct MemoryEntry {
    image: Arc<image::DynamicImage>,
    cost: u64,
}

struct Inner {
    entries: LruCache<CacheKey, MemoryEntry>,
    total_cost: u64,
}

impl Inner {
    fn remove(&mut self, key: &CacheKey) -> bool {
        if let Some(entry) = self.entries.pop(key) {
            self.total_cost -= entry.cost;
            true
        } else {
            false
        }
    }

    fn evict_lru(&mut self) -> Option<(CacheKey, u64)> {
        let (key, entry) = self.entries.pop_lru()?;
        self.total_cost -= entry.cost;
        Some((key, entry.cost))
    }
}

/// Bounded cache of decoded images.
///
/// Every entry carries a cost (decoded width × height × 4). Inserting
/// evicts least-recently-used entries until both the cost budget and the
/// count budget hold again. All operations are synchronous and never
/// suspend; the lock is held only for map bookkeeping.
pub struct MemoryImageCache {
    inner: Mutex<Inner>,
    count_limit: usize,
    cost_limit: u64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryImageCache {
    /// Creates a cache with the given count and cost budgets.
    #[must_use]
    pub fn new(count_limit: usize, cost_limit: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                total_cost: 0,
            }),
            count_limit: count_limit.max(1),
            cost_limit,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Creates a cache with the default budgets.
    #[must_use]
    pub fn with_default_limits() -> Self {
        Self::new(DEFAULT_COUNT_LIMIT, DEFAULT_COST_LIMIT)
    }

    /// Looks up an image and marks it recently used.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<image::DynamicImage>> {
        let found = self.inner.lock().entries.get(key).map(|e| e.image.clone());
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache miss");
        }
        found
    }

    /// Peeks at an image without promoting it in the LRU or counting a hit.
    pub fn peek(&self, key: &CacheKey) -> Option<Arc<image::DynamicImage>> {
        self.inner.lock().entries.peek(key).map(|e| e.image.clone())
    }

    /// Checks presence without touching recency or hit counters.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner.lock().entries.contains(key)
    }

    /// Inserts an image, evicting older entries if a budget is exceeded.
    ///
    /// Returns false if the image alone is over the cost budget and was
    /// not stored.
    pub fn put(&self, key: CacheKey, image: Arc<image::DynamicImage>) -> bool {
        let cost = decoded_cost(&image);
        if cost > self.cost_limit {
            debug!(
                key = %key,
                cost = cost,
                cost_limit = self.cost_limit,
                "Image exceeds memory budget, not caching"
            );
            return false;
        }

        let mut evicted = 0u64;
        {
            let mut inner = self.inner.lock();
            inner.remove(&key);

            while inner.total_cost + cost > self.cost_limit
                || inner.entries.len() >= self.count_limit
            {
                match inner.evict_lru() {
                    Some((old, old_cost)) => {
                        trace!(key = %old, cost = old_cost, "Evicted from memory cache");
                        evicted += 1;
                    }
                    None => break,
                }
            }

            inner.total_cost += cost;
            inner.entries.put(key.clone(), MemoryEntry { image, cost });
        }

        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
        debug!(key = %key, cost = cost, evicted = evicted, "Stored image in memory cache");
        true
    }

    /// Removes a single entry.
    pub fn evict(&self, key: &CacheKey) {
        if self.inner.lock().remove(key) {
            debug!(key = %key, "Evicted image from memory cache");
        }
    }

    /// Drops every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.total_cost = 0;
        debug!("Cleared memory image cache");
    }

    /// Returns the number of cached images.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the summed cost of live entries.
    pub fn total_cost(&self) -> u64 {
        self.inner.lock().total_cost
    }

    /// Returns the configured cost budget.
    #[must_use]
    pub const fn cost_limit(&self) -> u64 {
        self.cost_limit
    }

    /// Returns the configured count budget.
    #[must_use]
    pub const fn count_limit(&self) -> usize {
        self.count_limit
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let (size, cost) = {
            let inner = self.inner.lock();
            (inner.entries.len(), inner.total_cost)
        };
        CacheStats {
            hits,
            misses,
            hit_rate,
            evictions: self.evictions.load(Ordering::Relaxed),
            size,
            cost,
        }
    }
}

impl Default for MemoryImageCache {
    fn default() -> Self {
        Self::with_default_limits()
    }
}

/// Statistics about memory cache performance.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Entries evicted under budget pressure.
    pub evictions: u64,
    /// Current number of cached images.
    pub size: usize,
    /// Current summed cost in bytes.
    pub cost: u64,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} images ({} bytes), {:.1}% hit rate ({} hits, {} misses, {} evictions)",
            self.size, self.cost, self.hit_rate, self.hits, self.misses, self.evictions
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn img(side: u32) -> Arc<image::DynamicImage> {
        Arc::new(image::DynamicImage::new_rgb8(side, side))
    }

    #[test]
    fn test_cache_put_and_get() {
        let cache = MemoryImageCache::new(10, 1024 * 1024);
        let key = CacheKey::derive("test1");

        cache.put(key.clone(), img(100));
        let retrieved = cache.get(&key);

        assert!(retrieved.is_some());
        assert_eq!(retrieved.unwrap().width(), 100);
        assert_eq!(cache.total_cost(), 100 * 100 * 4);
    }

    #[test]
    fn test_cache_miss() {
        let cache = MemoryImageCache::with_default_limits();
        assert!(cache.get(&CacheKey::derive("nonexistent")).is_none());
    }

    #[test]
    fn test_count_eviction() {
        let cache = MemoryImageCache::new(2, u64::MAX);

        let k1 = CacheKey::derive("test1");
        let k2 = CacheKey::derive("test2");
        let k3 = CacheKey::derive("test3");

        cache.put(k1.clone(), img(10));
        cache.put(k2.clone(), img(10));
        cache.put(k3.clone(), img(10));

        // k1 is least recently used
        assert!(cache.get(&k1).is_none());
        assert!(cache.get(&k2).is_some());
        assert!(cache.get(&k3).is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_cost_budget_never_exceeded() {
        // each 10x10 image costs 400; budget fits two
        let cache = MemoryImageCache::new(100, 1000);
        for i in 0..20 {
            cache.put(CacheKey::derive(&format!("img{i}")), img(10));
            assert!(cache.total_cost() <= cache.cost_limit());
        }
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.total_cost(), 800);
        assert_eq!(cache.stats().evictions, 18);
    }

    #[test]
    fn test_recent_get_survives_eviction() {
        let cache = MemoryImageCache::new(2, u64::MAX);
        let k1 = CacheKey::derive("a");
        let k2 = CacheKey::derive("b");
        cache.put(k1.clone(), img(4));
        cache.put(k2.clone(), img(4));

        let _ = cache.get(&k1);
        cache.put(CacheKey::derive("c"), img(4));

        assert!(cache.contains(&k1));
        assert!(!cache.contains(&k2));
    }

    #[test]
    fn test_oversized_entry_rejected() {
        let cache = MemoryImageCache::new(10, 100);
        let key = CacheKey::derive("huge");
        assert!(!cache.put(key.clone(), img(50)));
        assert!(!cache.contains(&key));
        assert_eq!(cache.total_cost(), 0);
    }

    #[test]
    fn test_replace_same_key_updates_cost() {
        let cache = MemoryImageCache::new(10, u64::MAX);
        let key = CacheKey::derive("same");
        cache.put(key.clone(), img(10));
        cache.put(key.clone(), img(20));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_cost(), 20 * 20 * 4);
    }

    #[test]
    fn test_evict_and_clear_reset_accounting() {
        let cache = MemoryImageCache::new(10, u64::MAX);
        let key = CacheKey::derive("x");
        cache.put(key.clone(), img(10));
        cache.put(CacheKey::derive("y"), img(10));

        cache.evict(&key);
        assert_eq!(cache.total_cost(), 400);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.total_cost(), 0);
    }

    #[test]
    fn test_cache_stats() {
        let cache = MemoryImageCache::new(10, u64::MAX);
        let key = CacheKey::derive("test1");
        cache.put(key.clone(), img(10));

        let _ = cache.get(&key);
        let _ = cache.get(&CacheKey::derive("missing"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
        assert!((stats.hit_rate - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_concurrent_puts_keep_accounting_consistent() {
        let cache = Arc::new(MemoryImageCache::new(16, 40 * 400));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let key = CacheKey::derive(&format!("{t}-{}", i % 30));
                        cache.put(key.clone(), img(10));
                        let _ = cache.get(&key);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert!(cache.len() <= 16);
        assert_eq!(cache.total_cost(), cache.len() as u64 * 400);
    }
}
