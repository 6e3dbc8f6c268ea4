//! # Cache LRU limitado
//!
//! Usado pela ponte de análise em lote ([`crate::bridge`]) e pelo serviço de
//! embeddings ([`crate::embeddings`]). Cada entrada carrega um "carimbo" de
//! uso; o `BTreeMap` ordenado por carimbo dá a entrada menos recente em
//! `O(log n)` na hora de despejar.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

#[derive(Debug, Clone)]
pub struct LruCache<K, V> {
    capacity: usize,
    entries: HashMap<K, (V, u64)>,
    recency: BTreeMap<u64, K>,
    clock: u64,
}

impl<K: Hash + Eq + Clone, V: Clone> LruCache<K, V> {
    /// Capacidade zero é tratada como 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            clock: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Retorna uma cópia do valor e marca a entrada como usada agora.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let stamp = self.tick();
        let (value, old_stamp) = self.entries.get_mut(key)?;
        let previous = std::mem::replace(old_stamp, stamp);
        let value = value.clone();
        self.recency.remove(&previous);
        self.recency.insert(stamp, key.clone());
        Some(value)
    }

    /// Insere (ou substitui) e despeja a entrada menos recente se passar da capacidade.
    pub fn insert(&mut self, key: K, value: V) {
        let stamp = self.tick();
        if let Some((_, previous)) = self.entries.insert(key.clone(), (value, stamp)) {
            self.recency.remove(&previous);
        }
        self.recency.insert(stamp, key);

        while self.entries.len() > self.capacity {
            let Some((_, oldest)) = self.recency.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        // "a" passa a ser a mais recente
        assert_eq!(cache.get(&"a"), Some(1));
        cache.insert("c", 3);

        assert!(cache.contains(&"a"));
        assert!(!cache.contains(&"b"));
        assert!(cache.contains(&"c"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_replace_keeps_single_entry() {
        let mut cache = LruCache::new(4);
        cache.insert("k", 1);
        cache.insert("k", 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"k"), Some(2));
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let mut cache = LruCache::new(0);
        cache.insert(1, "x");
        cache.insert(2, "y");
        assert_eq!(cache.capacity(), 1);
        assert_eq!(cache.get(&2), Some("y"));
        assert_eq!(cache.get(&1), None);
    }
}
