//! Bounded, thread-safe LRU cache.
//!
//! Lookups happen on the render thread while reload/test-mode commands may
//! arrive from the command thread, so every operation goes through one
//! coarse mutex. Values leaving the cache (eviction, removal, or a lookup
//! while caching is disabled) are dropped after the lock is released; a
//! value's `Drop` is its disposal and runs exactly once.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};

pub struct LruCache<K, V> {
    inner: Mutex<Inner<K, V>>,
}

struct Inner<K, V> {
    capacity: usize,
    entries: HashMap<K, V>,
    /// Recency order: head is least recently used, tail most recently used.
    order: VecDeque<K>,
    caching_disabled: bool,
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone,
{
    fn touch(&mut self, key: &K) {
        if let Some(pos) = self.order.iter().position(|existing| existing == key) {
            if let Some(key) = self.order.remove(pos) {
                self.order.push_back(key);
            }
        }
    }

    fn take(&mut self, key: &K) -> Option<V> {
        let value = self.entries.remove(key)?;
        if let Some(pos) = self.order.iter().position(|existing| existing == key) {
            self.order.remove(pos);
        }
        Some(value)
    }
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Panics when `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "LRU cache capacity must be at least 1");
        Self {
            inner: Mutex::new(Inner {
                capacity,
                entries: HashMap::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
                caching_disabled: false,
            }),
        }
    }

    /// Panics if a previous operation panicked mid-update; the bookkeeping
    /// can no longer be trusted.
    fn lock(&self) -> MutexGuard<'_, Inner<K, V>> {
        self.inner.lock().expect("LRU cache mutex poisoned")
    }

    /// Returns a clone of the cached value and marks it most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.lock();
        if inner.caching_disabled {
            let stale = inner.take(key);
            drop(inner);
            drop(stale);
            return None;
        }
        let value = inner.entries.get(key).cloned()?;
        inner.touch(key);
        Some(value)
    }

    /// Inserts `value` unless the key is present or caching is disabled.
    ///
    /// Inserting past capacity evicts the least recently used entry.
    pub fn try_add(&self, key: K, value: V) -> bool {
        let mut inner = self.lock();
        if inner.caching_disabled || inner.entries.contains_key(&key) {
            return false;
        }
        inner.order.push_back(key.clone());
        inner.entries.insert(key, value);

        let mut evicted = Vec::new();
        while inner.entries.len() > inner.capacity {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            if let Some(value) = inner.entries.remove(&oldest) {
                evicted.push(value);
            }
        }
        assert!(
            inner.entries.len() == inner.order.len(),
            "LRU cache bookkeeping diverged"
        );
        drop(inner);
        if !evicted.is_empty() {
            tracing::debug!(evicted = evicted.len(), "LRU cache evicted entries");
        }
        true
    }

    /// Reports membership without changing recency.
    pub fn contains_key(&self, key: &K) -> bool {
        let mut inner = self.lock();
        if inner.caching_disabled {
            let stale = inner.take(key);
            drop(inner);
            drop(stale);
            return false;
        }
        inner.entries.contains_key(key)
    }

    pub fn remove(&self, key: &K) -> bool {
        let removed = self.lock().take(key);
        removed.is_some()
    }

    /// Removes every entry whose key matches; returns how many went.
    pub fn remove_where(&self, mut predicate: impl FnMut(&K) -> bool) -> usize {
        let mut inner = self.lock();
        let doomed: Vec<K> = inner
            .order
            .iter()
            .filter(|key| predicate(key))
            .cloned()
            .collect();
        let removed: Vec<V> = doomed.iter().filter_map(|key| inner.take(key)).collect();
        drop(inner);
        removed.len()
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.order.clear();
        let entries = std::mem::take(&mut inner.entries);
        drop(inner);
        drop(entries);
    }

    /// While disabled the cache behaves as empty and refuses inserts.
    pub fn set_caching_disabled(&self, disabled: bool) {
        self.lock().caching_disabled = disabled;
    }

    pub fn caching_disabled(&self) -> bool {
        self.lock().caching_disabled
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    /// Keys from least to most recently used.
    pub fn keys(&self) -> Vec<K> {
        self.lock().order.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    use super::*;

    /// Counts how many times the last clone of a value is dropped.
    #[derive(Clone)]
    struct Tracked {
        _token: Arc<DropToken>,
    }

    struct DropToken {
        drops: Arc<AtomicUsize>,
    }

    impl Drop for DropToken {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn tracked(drops: &Arc<AtomicUsize>) -> Tracked {
        Tracked {
            _token: Arc::new(DropToken {
                drops: drops.clone(),
            }),
        }
    }

    #[test]
    fn evicts_least_recently_used_past_capacity() {
        let cache = LruCache::new(3);
        for key in ["a", "b", "c"] {
            assert!(cache.try_add(key, key.len()));
        }
        assert!(cache.try_add("d", 1));
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains_key(&"a"));
        assert_eq!(cache.keys(), vec!["b", "c", "d"]);
    }

    #[test]
    fn get_promotes_out_of_eviction_priority() {
        let cache = LruCache::new(3);
        cache.try_add(1, "one");
        cache.try_add(2, "two");
        cache.try_add(3, "three");
        assert_eq!(cache.get(&1), Some("one"));
        cache.try_add(4, "four");
        assert!(cache.contains_key(&1));
        assert!(!cache.contains_key(&2));
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let cache = LruCache::new(2);
        assert!(cache.try_add("k", 1));
        assert!(!cache.try_add("k", 2));
        assert_eq!(cache.get(&"k"), Some(1));
    }

    #[test]
    fn evicted_value_is_disposed_exactly_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        let cache = LruCache::new(1);
        cache.try_add("first", tracked(&drops));
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        cache.try_add("second", tracked(&drops));
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        drop(cache);
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn removal_disposes_once_and_reports_absence() {
        let drops = Arc::new(AtomicUsize::new(0));
        let cache = LruCache::new(4);
        cache.try_add("x", tracked(&drops));
        assert!(cache.remove(&"x"));
        assert!(!cache.remove(&"x"));
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn outstanding_clone_delays_disposal() {
        let drops = Arc::new(AtomicUsize::new(0));
        let cache = LruCache::new(1);
        cache.try_add("held", tracked(&drops));
        let held = cache.get(&"held").unwrap();
        cache.try_add("other", tracked(&drops));
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        drop(held);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disabled_cache_acts_empty_and_evicts_matches() {
        let drops = Arc::new(AtomicUsize::new(0));
        let cache = LruCache::new(4);
        cache.try_add("kept", tracked(&drops));
        cache.set_caching_disabled(true);
        assert!(cache.get(&"kept").is_none());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert!(!cache.try_add("new", tracked(&drops)));
        assert!(cache.is_empty());

        cache.set_caching_disabled(false);
        assert!(cache.try_add("new", tracked(&drops)));
        assert!(cache.contains_key(&"new"));
    }

    #[test]
    fn remove_where_filters_keys() {
        let cache = LruCache::new(8);
        for key in ["viz/a.frag", "viz/b.frag", "fx/c.frag"] {
            cache.try_add(key.to_string(), ());
        }
        let removed = cache.remove_where(|key| key.starts_with("viz/"));
        assert_eq!(removed, 2);
        assert_eq!(cache.keys(), vec!["fx/c.frag".to_string()]);
    }

    /// Key whose hashing panics, to fail an operation while the lock is held.
    #[derive(Clone, PartialEq, Eq)]
    struct FragileKey(u32);

    impl Hash for FragileKey {
        fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
            assert!(self.0 != u32::MAX, "unhashable key");
            self.0.hash(state);
        }
    }

    #[test]
    #[should_panic(expected = "LRU cache mutex poisoned")]
    fn poisoned_cache_fails_fast() {
        let cache = Arc::new(LruCache::new(4));
        cache.try_add(FragileKey(1), 1);
        let worker = {
            let cache = cache.clone();
            thread::spawn(move || {
                cache.try_add(FragileKey(u32::MAX), 2);
            })
        };
        assert!(worker.join().is_err());
        cache.len();
    }

    #[test]
    fn concurrent_access_keeps_capacity() {
        let cache = Arc::new(LruCache::new(16));
        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for index in 0..200 {
                        let key = (worker * 1000) + index;
                        cache.try_add(key, index);
                        cache.get(&key);
                        if index % 7 == 0 {
                            cache.remove(&key);
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert!(cache.len() <= 16);
        assert_eq!(cache.keys().len(), cache.len());
    }
}
