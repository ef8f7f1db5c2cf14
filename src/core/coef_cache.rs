//! # Coefficient Cache
//!
//! Bounded LRU cache of generated coefficient matrices keyed by
//! [`CoefKey`]. All [`CACHE_CAPACITY`] entries are allocated up front and
//! linked into one recency list by index; an insert always reuses the tail
//! entry and overwrites its matrix in place, so the cache never allocates
//! after construction.
//!
//! ## Performance Characteristics
//!
//! - Lookup: O(1) hash probe plus an O(1) relink on hit
//! - Insert: O(1), evicts the tail when it holds a key
//! - Memory: fixed, `CACHE_CAPACITY` matrices plus the index

use std::collections::HashMap;

use gspn_coef::{CoefError, CoefKey, CoefMatrix, coef::generate_into};
use serde::Serialize;

/// Number of cached matrices.
pub const CACHE_CAPACITY: usize = 32;

const NIL: usize = usize::MAX;

#[derive(Debug)]
struct Entry {
    key: Option<CoefKey>,
    matrix: CoefMatrix,
    prev: usize,
    next: usize,
}

/// Counters exposed through the status snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub generated: u64,
    pub invalidations: u64,
    pub len: usize,
}

#[derive(Debug)]
pub struct CoefCache {
    entries: Box<[Entry]>,
    index: HashMap<CoefKey, usize>,
    head: usize,
    tail: usize,
    stats: CacheStats,
}

impl Default for CoefCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CoefCache {
    pub fn new() -> Self {
        let entries = (0..CACHE_CAPACITY)
            .map(|i| Entry {
                key: None,
                matrix: CoefMatrix::empty(),
                prev: if i == 0 { NIL } else { i - 1 },
                next: if i + 1 == CACHE_CAPACITY { NIL } else { i + 1 },
            })
            .collect();
        Self {
            entries,
            index: HashMap::with_capacity(CACHE_CAPACITY),
            head: 0,
            tail: CACHE_CAPACITY - 1,
            stats: CacheStats::default(),
        }
    }

    /// Look a key up, promoting it to most-recently-used on hit.
    pub fn lookup(&mut self, key: &CoefKey) -> Option<&CoefMatrix> {
        match self.index.get(key).copied() {
            Some(i) => {
                self.stats.hits += 1;
                self.move_to_front(i);
                Some(&self.entries[i].matrix)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Insert a matrix. An already present key is only promoted.
    pub fn insert(&mut self, key: CoefKey, matrix: &CoefMatrix) {
        if let Some(&i) = self.index.get(&key) {
            self.move_to_front(i);
            return;
        }
        let i = self.claim_tail();
        self.entries[i].matrix = *matrix;
        self.install(i, key);
    }

    /// Return the cached matrix for `key`, generating it into the tail entry
    /// on a miss. A generation failure leaves the cache untouched.
    pub fn get_or_generate(&mut self, key: &CoefKey) -> Result<&CoefMatrix, CoefError> {
        if let Some(&i) = self.index.get(key) {
            self.stats.hits += 1;
            self.move_to_front(i);
            return Ok(&self.entries[i].matrix);
        }
        self.stats.misses += 1;

        let i = self.tail;
        generate_into(key, &mut self.entries[i].matrix)?;
        self.stats.generated += 1;
        let i = self.claim_tail();
        self.install(i, *key);
        Ok(&self.entries[i].matrix)
    }

    /// Forget every key. Storage and recency links are kept.
    pub fn invalidate(&mut self) {
        for entry in self.entries.iter_mut() {
            entry.key = None;
        }
        self.index.clear();
        self.stats.invalidations += 1;
    }

    /// Membership test without touching recency or counters.
    pub fn contains(&self, key: &CoefKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            len: self.index.len(),
            ..self.stats
        }
    }

    /// Cached keys, most recent first.
    pub fn keys_by_recency(&self) -> Vec<CoefKey> {
        let mut keys = Vec::with_capacity(self.index.len());
        let mut i = self.head;
        while i != NIL {
            if let Some(key) = self.entries[i].key {
                keys.push(key);
            }
            i = self.entries[i].next;
        }
        keys
    }

    /// Detach the tail entry's key (evicting it) and return its index.
    fn claim_tail(&mut self) -> usize {
        let i = self.tail;
        if let Some(old) = self.entries[i].key.take() {
            self.index.remove(&old);
            self.stats.evictions += 1;
        }
        i
    }

    fn install(&mut self, i: usize, key: CoefKey) {
        self.entries[i].key = Some(key);
        self.index.insert(key, i);
        self.move_to_front(i);
    }

    fn move_to_front(&mut self, i: usize) {
        if self.head == i {
            return;
        }
        let (prev, next) = (self.entries[i].prev, self.entries[i].next);
        // unlink; i is not head so prev is valid
        self.entries[prev].next = next;
        if next == NIL {
            self.tail = prev;
        } else {
            self.entries[next].prev = prev;
        }
        self.entries[i].prev = NIL;
        self.entries[i].next = self.head;
        self.entries[self.head].prev = i;
        self.head = i;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u32) -> CoefKey {
        CoefKey::new(100 + n, 100, 50, 50, 4, 4)
    }

    #[test]
    fn test_miss_then_hit() {
        let mut cache = CoefCache::new();
        let k = CoefKey::new(100, 100, 50, 50, 8, 4);
        let first = *cache.get_or_generate(&k).unwrap();
        let second = *cache.get_or_generate(&k).unwrap();
        assert_eq!(first, second);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.generated), (1, 1, 1));
    }

    #[test]
    fn test_evicts_coldest_key() {
        let mut cache = CoefCache::new();
        for n in 0..CACHE_CAPACITY as u32 {
            cache.get_or_generate(&key(n)).unwrap();
        }
        // touch everything but key(0)
        for n in 1..CACHE_CAPACITY as u32 {
            assert!(cache.lookup(&key(n)).is_some());
        }
        cache.get_or_generate(&key(100)).unwrap();
        assert!(!cache.contains(&key(0)));
        assert!(cache.contains(&key(1)));
        assert_eq!(cache.len(), CACHE_CAPACITY);
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.keys_by_recency()[0], key(100));
    }

    #[test]
    fn test_thirty_one_then_two_more() {
        let mut cache = CoefCache::new();
        for n in 0..31 {
            cache.get_or_generate(&key(n)).unwrap();
        }
        assert_eq!(cache.stats().evictions, 0);
        cache.get_or_generate(&key(31)).unwrap();
        cache.get_or_generate(&key(32)).unwrap();

        assert_eq!(cache.stats().evictions, 1);
        assert!(!cache.contains(&key(0)));
        assert!((1..33).all(|n| cache.contains(&key(n))));
    }

    #[test]
    fn test_insert_existing_only_promotes() {
        let mut cache = CoefCache::new();
        let a = key(1);
        let b = key(2);
        cache.get_or_generate(&a).unwrap();
        cache.get_or_generate(&b).unwrap();
        let stored = *cache.lookup(&a).unwrap();
        cache.insert(b, &CoefMatrix::empty());
        assert_eq!(cache.keys_by_recency(), vec![b, a]);
        assert_ne!(*cache.lookup(&b).unwrap(), CoefMatrix::empty());
        assert_eq!(*cache.lookup(&a).unwrap(), stored);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_generation_failure_leaves_cache() {
        let mut cache = CoefCache::new();
        cache.get_or_generate(&key(1)).unwrap();
        let bad = CoefKey::new(100, 100, 50, 50, 5, 4);
        assert!(cache.get_or_generate(&bad).is_err());
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&key(1)));
        assert_eq!(cache.stats().generated, 1);
    }

    #[test]
    fn test_invalidate() {
        let mut cache = CoefCache::new();
        cache.get_or_generate(&key(1)).unwrap();
        cache.invalidate();
        assert!(cache.is_empty());
        assert!(cache.lookup(&key(1)).is_none());
        cache.get_or_generate(&key(1)).unwrap();
        let stats = cache.stats();
        assert_eq!((stats.generated, stats.invalidations, stats.evictions), (2, 1, 0));
    }
}
