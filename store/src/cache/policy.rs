//! Bounded in-process cache policies.
//!
//! The three eviction disciplines the tier caches need (least-frequently-used,
//! random-replacement, time-to-live) are small enough to carry here; none of
//! them ever grows past its configured capacity.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use rand::Rng;

/// Least-frequently-used cache. Lookup bumps a use counter; insertion into a
/// full cache evicts the entry with the lowest counter.
pub struct LfuCache<K: Eq + Hash + Clone, V> {
    map: HashMap<K, (V, u64)>,
    capacity: usize,
}

impl<K: Eq + Hash + Clone, V> LfuCache<K, V> {
    pub fn new(capacity: usize) -> LfuCache<K, V> {
        assert!(capacity > 0);
        LfuCache {
            map: HashMap::with_capacity(capacity),
            capacity,
        }
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.map.get_mut(key).map(|(value, uses)| {
            *uses += 1;
            &*value
        })
    }

    pub fn insert(&mut self, key: K, value: V) {
        if self.map.contains_key(&key) {
            if let Some(entry) = self.map.get_mut(&key) {
                entry.0 = value;
            }
            return;
        }
        if self.map.len() >= self.capacity {
            if let Some(victim) = self
                .map
                .iter()
                .min_by_key(|(_, (_, uses))| *uses)
                .map(|(k, _)| k.clone())
            {
                self.map.remove(&victim);
            }
        }
        self.map.insert(key, (value, 1));
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Random-replacement cache: insertion into a full cache evicts a uniformly
/// random entry. Supports explicit removal, which the UTXO tier relies on to
/// drop entries the moment they are consumed.
pub struct RandomEvictCache<K: Eq + Hash + Clone, V> {
    map: HashMap<K, (V, usize)>,
    keys: Vec<K>,
    capacity: usize,
}

impl<K: Eq + Hash + Clone, V> RandomEvictCache<K, V> {
    pub fn new(capacity: usize) -> RandomEvictCache<K, V> {
        assert!(capacity > 0);
        RandomEvictCache {
            map: HashMap::with_capacity(capacity),
            keys: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.map.get(key).map(|(value, _)| value)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    pub fn insert(&mut self, key: K, value: V) {
        if let Some(entry) = self.map.get_mut(&key) {
            entry.0 = value;
            return;
        }
        if self.map.len() >= self.capacity {
            let victim = rand::thread_rng().gen_range(0..self.keys.len());
            let victim_key = self.keys[victim].clone();
            self.remove_slot(&victim_key);
        }
        self.keys.push(key.clone());
        self.map.insert(key, (value, self.keys.len() - 1));
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.remove_slot(key)
    }

    fn remove_slot(&mut self, key: &K) -> Option<V> {
        let (value, slot) = self.map.remove(key)?;
        self.keys.swap_remove(slot);
        if slot < self.keys.len() {
            let moved = self.keys[slot].clone();
            if let Some(entry) = self.map.get_mut(&moved) {
                entry.1 = slot;
            }
        }
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Time-bounded membership set with a capacity ceiling; used to remember
/// which mempool txids were already inspected this run.
pub struct TtlCache<K: Eq + Hash + Clone> {
    map: HashMap<K, Instant>,
    ttl: Duration,
    capacity: usize,
}

impl<K: Eq + Hash + Clone> TtlCache<K> {
    pub fn new(ttl: Duration, capacity: usize) -> TtlCache<K> {
        assert!(capacity > 0);
        TtlCache {
            map: HashMap::new(),
            ttl,
            capacity,
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.map
            .get(key)
            .map(|inserted| inserted.elapsed() < self.ttl)
            .unwrap_or(false)
    }

    pub fn insert(&mut self, key: K) {
        let now = Instant::now();
        if self.map.len() >= self.capacity {
            let ttl = self.ttl;
            self.map.retain(|_, inserted| now.duration_since(*inserted) < ttl);
        }
        if self.map.len() >= self.capacity {
            // still full of live entries; drop the oldest one
            if let Some(victim) = self
                .map
                .iter()
                .min_by_key(|(_, inserted)| *inserted)
                .map(|(k, _)| k.clone())
            {
                self.map.remove(&victim);
            }
        }
        self.map.insert(key, now);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lfu_evicts_the_coldest_entry() {
        let mut cache = LfuCache::new(2);
        cache.insert("hot", 1);
        cache.insert("cold", 2);
        cache.get(&"hot");
        cache.get(&"hot");
        cache.insert("new", 3);
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&"hot").is_some());
        assert!(cache.get(&"cold").is_none());
        assert!(cache.get(&"new").is_some());
    }

    #[test]
    fn random_cache_respects_capacity() {
        let mut cache = RandomEvictCache::new(8);
        for i in 0..100 {
            cache.insert(i, i * 10);
        }
        assert_eq!(cache.len(), 8);
    }

    #[test]
    fn random_cache_removal_keeps_bookkeeping_consistent() {
        let mut cache = RandomEvictCache::new(4);
        for i in 0..4 {
            cache.insert(i, i);
        }
        assert_eq!(cache.remove(&1), Some(1));
        assert_eq!(cache.remove(&1), None);
        assert_eq!(cache.len(), 3);
        cache.insert(10, 10);
        cache.insert(11, 11);
        assert_eq!(cache.len(), 4);
        for key in [0, 2, 3, 10, 11] {
            if cache.contains_key(&key) {
                cache.remove(&key);
            }
        }
        assert!(cache.is_empty());
    }

    #[test]
    fn ttl_cache_expires_entries() {
        let mut cache = TtlCache::new(Duration::from_secs(0), 4);
        cache.insert("seen");
        assert!(!cache.contains(&"seen"));

        let mut cache = TtlCache::new(Duration::from_secs(600), 2);
        cache.insert("a");
        cache.insert("b");
        cache.insert("c");
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&"c"));
    }
}
