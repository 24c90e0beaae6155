//! Evaluation cache.
//!
//! A bounded map from position fingerprints to network evaluations.
//! Eviction is approximate LRU: entries leave in insertion order, lookups
//! do not refresh them. The cache also tracks keys whose evaluation is
//! currently in flight in some worker's batch, so that the prefetcher
//! does not schedule duplicate network work; in-flight marks count as
//! present for `contains` but produce no value until the real entry is
//! inserted.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A cached network result: value plus sparse policy.
#[derive(Debug, Clone)]
pub struct CachedEvaluation {
    q: f32,
    /// (policy index, prior), one per legal move at the position.
    policy: Vec<(u16, f32)>,
}

impl CachedEvaluation {
    pub fn new(q: f32, policy: Vec<(u16, f32)>) -> Self {
        Self { q, policy }
    }

    #[inline]
    pub fn q(&self) -> f32 {
        self.q
    }

    /// Prior for a policy index; zero when the move is not listed.
    pub fn p(&self, move_index: u16) -> f32 {
        self.policy
            .iter()
            .find(|(idx, _)| *idx == move_index)
            .map_or(0.0, |(_, p)| *p)
    }
}

#[derive(Debug)]
enum Slot {
    InFlight,
    Ready(Arc<CachedEvaluation>),
}

#[derive(Debug, Default)]
struct Inner {
    map: HashMap<u64, Slot>,
    /// Keys in insertion order; the eviction queue.
    order: VecDeque<u64>,
    /// Number of `Ready` entries in `map`.
    ready: usize,
}

/// Thread-safe fingerprint-keyed evaluation cache.
#[derive(Debug)]
pub struct EvalCache {
    inner: Mutex<Inner>,
    capacity: AtomicUsize,
}

impl EvalCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: AtomicUsize::new(capacity),
        }
    }

    pub fn get(&self, key: u64) -> Option<Arc<CachedEvaluation>> {
        let inner = self.inner.lock().expect("cache lock poisoned");
        match inner.map.get(&key) {
            Some(Slot::Ready(eval)) => Some(Arc::clone(eval)),
            _ => None,
        }
    }

    /// Whether the key is present, including in-flight marks.
    pub fn contains(&self, key: u64) -> bool {
        let inner = self.inner.lock().expect("cache lock poisoned");
        inner.map.contains_key(&key)
    }

    pub fn insert(&self, key: u64, eval: CachedEvaluation) {
        let capacity = self.capacity();
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        if capacity == 0 {
            // Disabled cache: drop the value but release any mark.
            if matches!(inner.map.get(&key), Some(Slot::InFlight)) {
                inner.map.remove(&key);
            }
            return;
        }
        match inner.map.insert(key, Slot::Ready(Arc::new(eval))) {
            Some(Slot::Ready(_)) => {}
            Some(Slot::InFlight) => inner.ready += 1,
            None => {
                inner.ready += 1;
                inner.order.push_back(key);
            }
        }
        Self::evict_to(&mut inner, capacity);
    }

    /// Mark a key as being computed. Returns false when the key is
    /// already present (ready or in flight) or the cache is disabled.
    pub fn mark_in_flight(&self, key: u64) -> bool {
        if self.capacity() == 0 {
            return false;
        }
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        if inner.map.contains_key(&key) {
            return false;
        }
        inner.map.insert(key, Slot::InFlight);
        inner.order.push_back(key);
        true
    }

    /// Release an in-flight mark without supplying a value (the batch
    /// that owned it failed).
    pub fn clear_in_flight(&self, key: u64) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        if matches!(inner.map.get(&key), Some(Slot::InFlight)) {
            inner.map.remove(&key);
        }
    }

    pub fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity, Ordering::Relaxed);
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        if capacity == 0 {
            inner.map.clear();
            inner.order.clear();
            inner.ready = 0;
        } else {
            Self::evict_to(&mut inner, capacity);
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.map.clear();
        inner.order.clear();
        inner.ready = 0;
    }

    /// Number of live (ready) entries.
    pub fn size(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").ready
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Cache fullness on the permille scale used by `info hashfull`.
    pub fn hashfull(&self) -> u32 {
        (self.size() * 1000 / self.capacity().max(1)) as u32
    }

    fn evict_to(inner: &mut Inner, capacity: usize) {
        while inner.ready > capacity {
            let Some(key) = inner.order.pop_front() else {
                break;
            };
            match inner.map.remove(&key) {
                Some(Slot::Ready(_)) => inner.ready -= 1,
                // Stale queue slot for a re-inserted or in-flight key.
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(q: f32) -> CachedEvaluation {
        CachedEvaluation::new(q, vec![(100, 0.6), (200, 0.4)])
    }

    #[test]
    fn insert_and_get() {
        let cache = EvalCache::new(8);
        cache.insert(1, entry(0.5));
        let eval = cache.get(1).unwrap();
        assert!((eval.q() - 0.5).abs() < 1e-6);
        assert!((eval.p(100) - 0.6).abs() < 1e-6);
        assert_eq!(eval.p(999), 0.0);
        assert!(cache.get(2).is_none());
    }

    #[test]
    fn size_never_exceeds_capacity() {
        let cache = EvalCache::new(4);
        for key in 0..100u64 {
            cache.insert(key, entry(0.0));
            assert!(cache.size() <= 4);
        }
        assert_eq!(cache.size(), 4);
    }

    #[test]
    fn eviction_removes_oldest_first() {
        let cache = EvalCache::new(2);
        cache.insert(1, entry(0.1));
        cache.insert(2, entry(0.2));
        cache.insert(3, entry(0.3));
        assert!(cache.get(1).is_none());
        assert!(cache.get(2).is_some());
        assert!(cache.get(3).is_some());
    }

    #[test]
    fn in_flight_counts_for_contains_only() {
        let cache = EvalCache::new(8);
        assert!(cache.mark_in_flight(7));
        assert!(!cache.mark_in_flight(7));
        assert!(cache.contains(7));
        assert!(cache.get(7).is_none());
        assert_eq!(cache.size(), 0);

        cache.insert(7, entry(0.9));
        assert_eq!(cache.size(), 1);
        assert!(cache.get(7).is_some());
    }

    #[test]
    fn clear_in_flight_releases_the_mark() {
        let cache = EvalCache::new(8);
        cache.mark_in_flight(5);
        cache.clear_in_flight(5);
        assert!(!cache.contains(5));
        assert!(cache.mark_in_flight(5));

        // A ready entry is not touched by clear_in_flight.
        cache.insert(6, entry(0.0));
        cache.clear_in_flight(6);
        assert!(cache.get(6).is_some());
    }

    #[test]
    fn shrinking_capacity_evicts() {
        let cache = EvalCache::new(8);
        for key in 0..8u64 {
            cache.insert(key, entry(0.0));
        }
        cache.set_capacity(3);
        assert_eq!(cache.size(), 3);
        assert_eq!(cache.capacity(), 3);
        assert!(cache.get(7).is_some());
    }

    #[test]
    fn hashfull_is_permille() {
        let cache = EvalCache::new(10);
        assert_eq!(cache.hashfull(), 0);
        for key in 0..5u64 {
            cache.insert(key, entry(0.0));
        }
        assert_eq!(cache.hashfull(), 500);
    }

    #[test]
    fn zero_capacity_disables_the_cache() {
        let cache = EvalCache::new(0);
        cache.insert(1, entry(0.0));
        assert_eq!(cache.size(), 0);
        assert!(cache.get(1).is_none());
        assert!(!cache.mark_in_flight(2));
    }
}
