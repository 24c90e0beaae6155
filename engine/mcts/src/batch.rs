//! Batch builder bridging workers, the cache and the network.
//!
//! Each worker creates one `CachingComputation` per iteration. Requests
//! hit the cache first; misses are queued for the network, deduplicated
//! by fingerprint both against the cache and within the batch, and the
//! results of the single blocking network call are written back into the
//! cache under each miss's key. Results keep submission order so the
//! worker can index them by minibatch position.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::{CachedEvaluation, EvalCache};
use crate::encoder::InputPlane;
use crate::network::{NetworkComputation, NetworkError};

enum BatchEntry {
    /// Served from the cache (or an earlier miss in this same batch
    /// would be a `Miss` pointing at the shared computation slot).
    Hit(Arc<CachedEvaluation>),
    /// Backed by computation input `usize`.
    Miss(usize),
}

struct MissEntry {
    key: u64,
    moves: Vec<u16>,
}

pub struct CachingComputation {
    computation: Box<dyn NetworkComputation>,
    cache: Arc<EvalCache>,
    entries: Vec<BatchEntry>,
    /// Unique misses, parallel to the computation's inputs.
    misses: Vec<MissEntry>,
    miss_index: HashMap<u64, usize>,
    computed: bool,
}

impl CachingComputation {
    pub fn new(computation: Box<dyn NetworkComputation>, cache: Arc<EvalCache>) -> Self {
        Self {
            computation,
            cache,
            entries: Vec::new(),
            misses: Vec::new(),
            miss_index: HashMap::new(),
            computed: false,
        }
    }

    /// Attach the cached entry for `key` if there is one. On a miss the
    /// caller must follow up with [`CachingComputation::add_input`].
    pub fn add_by_hash(&mut self, key: u64) -> bool {
        match self.cache.get(key) {
            Some(eval) => {
                self.entries.push(BatchEntry::Hit(eval));
                true
            }
            None => false,
        }
    }

    /// Queue an uncached request. A fingerprint already queued in this
    /// batch shares its computation slot instead of paying for a second
    /// network evaluation.
    pub fn add_input(&mut self, key: u64, planes: Vec<InputPlane>, moves: Vec<u16>) {
        if let Some(&index) = self.miss_index.get(&key) {
            self.entries.push(BatchEntry::Miss(index));
            return;
        }
        let index = self.misses.len();
        self.computation.add_input(planes, moves.clone());
        self.misses.push(MissEntry { key, moves });
        self.miss_index.insert(key, index);
        self.cache.mark_in_flight(key);
        self.entries.push(BatchEntry::Miss(index));
    }

    /// Run the network once for all misses and publish the results into
    /// the cache. On failure the in-flight marks are released and the
    /// error is propagated; nothing is retried here.
    pub fn compute_blocking(&mut self) -> Result<(), NetworkError> {
        if let Err(err) = self.computation.compute_blocking() {
            for miss in &self.misses {
                self.cache.clear_in_flight(miss.key);
            }
            return Err(err);
        }
        self.computed = true;
        for (index, miss) in self.misses.iter().enumerate() {
            let policy = miss
                .moves
                .iter()
                .map(|&m| (m, self.computation.p(index, m)))
                .collect();
            self.cache.insert(
                miss.key,
                CachedEvaluation::new(self.computation.q(index), policy),
            );
        }
        Ok(())
    }

    /// Value for minibatch entry `index`.
    pub fn q(&self, index: usize) -> f32 {
        match &self.entries[index] {
            BatchEntry::Hit(eval) => eval.q(),
            BatchEntry::Miss(slot) => {
                debug_assert!(self.computed);
                self.computation.q(*slot)
            }
        }
    }

    /// Prior for minibatch entry `index` and policy slot `move_index`.
    pub fn p(&self, index: usize, move_index: u16) -> f32 {
        match &self.entries[index] {
            BatchEntry::Hit(eval) => eval.p(move_index),
            BatchEntry::Miss(slot) => {
                debug_assert!(self.computed);
                self.computation.p(*slot, move_index)
            }
        }
    }

    /// Number of requests that will actually reach the network.
    pub fn cache_misses(&self) -> usize {
        self.misses.len()
    }

    /// Number of minibatch entries, hits included.
    pub fn batch_size(&self) -> usize {
        self.entries.len()
    }

    /// Remove the last entry after it has been processed out of order.
    /// Only cache hits are ever popped.
    pub fn pop_cache_hit(&mut self) {
        match self.entries.pop() {
            Some(BatchEntry::Hit(_)) => {}
            _ => unreachable!("pop_cache_hit on a non-hit entry"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Network, UniformNetwork};

    fn builder(cache: &Arc<EvalCache>) -> CachingComputation {
        CachingComputation::new(UniformNetwork::new().new_computation(), Arc::clone(cache))
    }

    #[test]
    fn miss_then_hit_via_cache() {
        let cache = Arc::new(EvalCache::new(16));
        let mut first = builder(&cache);
        assert!(!first.add_by_hash(42));
        first.add_input(42, Vec::new(), vec![1, 2]);
        assert_eq!(first.cache_misses(), 1);
        assert_eq!(first.batch_size(), 1);
        first.compute_blocking().unwrap();
        assert!((first.p(0, 1) - 0.5).abs() < 1e-6);

        // Same fingerprint from another iteration is now a pure hit.
        let mut second = builder(&cache);
        assert!(second.add_by_hash(42));
        assert_eq!(second.cache_misses(), 0);
        assert!((second.q(0) - 0.0).abs() < 1e-6);
        assert!((second.p(0, 2) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn duplicate_fingerprints_share_one_network_slot() {
        let cache = Arc::new(EvalCache::new(16));
        let mut batch = builder(&cache);
        batch.add_input(7, Vec::new(), vec![3, 4]);
        batch.add_input(7, Vec::new(), vec![3, 4]);
        assert_eq!(batch.batch_size(), 2);
        assert_eq!(batch.cache_misses(), 1);
        batch.compute_blocking().unwrap();
        assert_eq!(batch.q(0), batch.q(1));
        assert!((batch.p(1, 4) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn misses_are_marked_in_flight_until_computed() {
        let cache = Arc::new(EvalCache::new(16));
        let mut batch = builder(&cache);
        batch.add_input(9, Vec::new(), vec![1]);
        assert!(cache.contains(9));
        assert!(cache.get(9).is_none());
        batch.compute_blocking().unwrap();
        assert!(cache.get(9).is_some());
    }

    #[test]
    fn results_keep_submission_order() {
        let cache = Arc::new(EvalCache::new(16));
        let mut batch = builder(&cache);
        batch.add_input(1, Vec::new(), vec![10]);
        batch.add_input(2, Vec::new(), vec![20, 21]);
        batch.compute_blocking().unwrap();
        assert!((batch.p(0, 10) - 1.0).abs() < 1e-6);
        assert!((batch.p(1, 20) - 0.5).abs() < 1e-6);
        assert_eq!(batch.p(1, 10), 0.0);
    }

    #[test]
    fn pop_cache_hit_removes_the_tail_entry() {
        let cache = Arc::new(EvalCache::new(16));
        cache.insert(5, CachedEvaluation::new(0.25, vec![(1, 1.0)]));
        let mut batch = builder(&cache);
        batch.add_input(4, Vec::new(), vec![1]);
        assert!(batch.add_by_hash(5));
        assert_eq!(batch.batch_size(), 2);
        batch.pop_cache_hit();
        assert_eq!(batch.batch_size(), 1);
        assert_eq!(batch.cache_misses(), 1);
    }

    #[test]
    fn failed_compute_releases_in_flight_marks() {
        struct FailingComputation;
        impl NetworkComputation for FailingComputation {
            fn add_input(&mut self, _planes: Vec<InputPlane>, _moves: Vec<u16>) {}
            fn batch_size(&self) -> usize {
                1
            }
            fn compute_blocking(&mut self) -> Result<(), NetworkError> {
                Err(NetworkError::EvaluationFailed("backend died".into()))
            }
            fn q(&self, _index: usize) -> f32 {
                0.0
            }
            fn p(&self, _index: usize, _move_index: u16) -> f32 {
                0.0
            }
        }

        let cache = Arc::new(EvalCache::new(16));
        let mut batch = CachingComputation::new(Box::new(FailingComputation), Arc::clone(&cache));
        batch.add_input(11, Vec::new(), vec![1]);
        assert!(batch.compute_blocking().is_err());
        assert!(!cache.contains(11));
    }
}
