//! Bounded cache map shared by the three aggregators (spec.md §5).
//!
//! Ground truth: `google/scc/caches.py`'s `DequeOutTTLCache`/`DequeOutLRUCache`,
//! which extend `cachetools`' `TTLCache`/`LRUCache` so that entries evicted
//! for size land in an `out_deque` rather than being silently dropped. The
//! teacher carries `moka` (`Cargo.toml`, `cco/src/cache.rs`) for exactly
//! this concern; this crate builds on `moka::sync::Cache` the same way,
//! swapping the teacher's `future::Cache` for `sync::Cache` since this
//! crate's aggregators run behind a plain `parking_lot::Mutex` on ordinary
//! threads, not an async runtime. `moka`'s `eviction_listener` is the size-
//! bound half of "no aggregated data is silently lost": it fires
//! synchronously (once `run_pending_tasks` forces its housekeeping) and
//! feeds straight into [`Cache::insert`]'s return value, so a capacity-
//! driven eviction is salvageable exactly like the original's `out_deque`.
//!
//! "LRU eviction applies when TTL is unused, TTL+LRU when TTL is set"
//! (spec.md §5) splits into two independent mechanisms here: `moka` owns
//! the size bound (an approximate, frequency-aware policy, not a literal
//! LRU -- callers needing "which exact entry was evicted" shouldn't assume
//! one), while [`Cache::evict_expired`] stays a manual sweep driven by each
//! aggregator's injected [`crate::clock::Clock`]. `moka`'s own
//! `time_to_live`/`time_to_idle` are driven by the wall clock and can't be
//! rewound by a test's `FixedClock`, so they're not used here; TTL
//! expiration is still entirely explicit and deterministic.

use moka::notification::RemovalCause;
use moka::sync::Cache as MokaCache;
use std::hash::Hash;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

pub struct Cache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: MokaCache<K, V>,
    /// Entries the eviction listener salvaged off a capacity-driven
    /// eviction, pending pickup by [`Cache::insert`].
    evicted: Arc<Mutex<Vec<(K, V)>>>,
}

/// A borrowed, mutate-in-place view onto a cached value, obtained from
/// [`Cache::get_mut`]. Writes back into the cache when dropped -- `moka`
/// has no native mutable-reference access (its entries are shared behind
/// `Arc`), so this reproduces the call sites' "fetch, mutate in place,
/// let it go" pattern with a fetch-mutate-reinsert cycle instead.
pub struct EntryGuard<'a, K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    cache: &'a MokaCache<K, V>,
    key: K,
    value: V,
}

impl<K, V> Deref for EntryGuard<'_, K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    type Target = V;
    fn deref(&self) -> &V {
        &self.value
    }
}

impl<K, V> DerefMut for EntryGuard<'_, K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn deref_mut(&mut self) -> &mut V {
        &mut self.value
    }
}

impl<K, V> Drop for EntryGuard<'_, K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.cache.insert(self.key.clone(), self.value.clone());
    }
}

impl<K, V> Cache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(max_entries: usize) -> Self {
        let evicted: Arc<Mutex<Vec<(K, V)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = evicted.clone();
        let inner = MokaCache::builder()
            .max_capacity(max_entries as u64)
            .eviction_listener(move |key: Arc<K>, value: V, cause| {
                if cause == RemovalCause::Size {
                    sink.lock().unwrap().push(((*key).clone(), value));
                }
            })
            .build();
        Self { inner, evicted }
    }

    pub fn len(&self) -> usize {
        self.inner.run_pending_tasks();
        self.inner.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.get(key)
    }

    pub fn get_mut(&self, key: &K) -> Option<EntryGuard<'_, K, V>> {
        self.inner.get(key).map(|value| EntryGuard {
            cache: &self.inner,
            key: key.clone(),
            value,
        })
    }

    /// Inserts `value`, returning the entry `moka` salvaged off a
    /// capacity-driven eviction, if any, so the caller can fold its
    /// pending aggregated content onto its own outbound queue (spec.md §5:
    /// "no aggregated data is silently lost").
    pub fn insert(&self, key: K, value: V) -> Option<(K, V)> {
        self.inner.insert(key, value);
        self.inner.run_pending_tasks();
        self.evicted.lock().unwrap().pop()
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.remove(key)
    }

    pub fn clear(&self) {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks();
        self.evicted.lock().unwrap().clear();
    }

    /// Removes every entry for which `is_expired` returns true, returning
    /// the evicted `(key, value)` pairs. Driven entirely by the caller's
    /// own clock, independent of `moka`'s size-based eviction above.
    pub fn evict_expired<F: Fn(&V) -> bool>(&self, is_expired: F) -> Vec<(K, V)> {
        let expired_keys: Vec<K> = self
            .inner
            .iter()
            .filter(|(_, v)| is_expired(v))
            .map(|(k, _)| (*k).clone())
            .collect();

        let mut evicted = Vec::with_capacity(expired_keys.len());
        for key in expired_keys {
            if let Some(v) = self.inner.remove(&key) {
                evicted.push((key, v));
            }
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_salvages_an_evicted_entry_without_exceeding_capacity() {
        let cache: Cache<i32, &str> = Cache::new(2);
        assert!(cache.insert(1, "a").is_none());
        assert!(cache.insert(2, "b").is_none());
        cache.get(&1);
        let evicted = cache.insert(3, "c");
        assert!(evicted.is_some(), "inserting past capacity must salvage the victim, not drop it");
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&3).is_some());
    }

    #[test]
    fn evict_expired_removes_matching_entries() {
        let cache: Cache<i32, i32> = Cache::new(10);
        cache.insert(1, 100);
        cache.insert(2, 5);
        let evicted = cache.evict_expired(|v| *v > 50);
        assert_eq!(evicted, vec![(1, 100)]);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn get_mut_writes_back_on_drop() {
        let cache: Cache<i32, i32> = Cache::new(10);
        cache.insert(1, 1);
        {
            let mut guard = cache.get_mut(&1).unwrap();
            *guard += 41;
        }
        assert_eq!(cache.get(&1), Some(42));
    }
}
