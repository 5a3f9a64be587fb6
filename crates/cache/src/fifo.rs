//! Count-bounded insertion-order cache
//!
//! Used for thumbnails and in-memory upscale results, where entries are small
//! and the oldest insert is always the first to go.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Cache that keeps at most `capacity` entries, dropping the oldest insert.
///
/// Reads do not change the eviction order. Not synchronized; wrap it in a
/// `Mutex` when shared.
#[derive(Debug, Clone)]
pub struct FifoCache<K, V> {
    entries: HashMap<K, V>,
    order: VecDeque<K>,
    capacity: usize,
}

impl<K, V> FifoCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a cache holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Insert a value and return the entries pushed out to make room.
    ///
    /// Replacing an existing key keeps its original position.
    pub fn insert(&mut self, key: K, value: V) -> Vec<(K, V)> {
        if self.entries.insert(key.clone(), value).is_none() {
            self.order.push_back(key);
        }
        self.shrink_to_capacity()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let value = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        Some(value)
    }

    /// Remove everything, returning the dropped values in insertion order.
    pub fn drain(&mut self) -> Vec<(K, V)> {
        let mut drained = Vec::with_capacity(self.order.len());
        while let Some(key) = self.order.pop_front() {
            if let Some(value) = self.entries.remove(&key) {
                drained.push((key, value));
            }
        }
        drained
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the capacity, returning entries evicted by a shrink.
    pub fn set_capacity(&mut self, capacity: usize) -> Vec<(K, V)> {
        self.capacity = capacity.max(1);
        self.shrink_to_capacity()
    }

    fn shrink_to_capacity(&mut self) -> Vec<(K, V)> {
        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if let Some(value) = self.entries.remove(&oldest) {
                evicted.push((oldest, value));
            }
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut cache = FifoCache::new(3);
        assert!(cache.insert(1, "one").is_empty());
        assert_eq!(cache.get(&1), Some(&"one"));
        assert!(cache.contains(&1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_oldest_insert_is_evicted() {
        let mut cache = FifoCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        // Reads do not protect an entry.
        cache.get(&"a");

        let evicted = cache.insert("c", 3);
        assert_eq!(evicted, vec![("a", 1)]);
        assert!(!cache.contains(&"a"));
        assert!(cache.contains(&"b"));
        assert!(cache.contains(&"c"));
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut cache = FifoCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("a", 10);
        assert_eq!(cache.len(), 2);

        let evicted = cache.insert("c", 3);
        assert_eq!(evicted, vec![("a", 10)]);
    }

    #[test]
    fn test_shrinking_capacity_evicts() {
        let mut cache = FifoCache::new(5);
        for i in 0..5 {
            cache.insert(i, i * 10);
        }
        let evicted = cache.set_capacity(2);
        assert_eq!(evicted.len(), 3);
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&3));
        assert!(cache.contains(&4));
    }

    #[test]
    fn test_remove_and_drain() {
        let mut cache = FifoCache::new(4);
        cache.insert(1, 'x');
        cache.insert(2, 'y');
        cache.insert(3, 'z');
        assert_eq!(cache.remove(&2), Some('y'));
        assert_eq!(cache.drain(), vec![(1, 'x'), (3, 'z')]);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut cache = FifoCache::new(0);
        assert_eq!(cache.capacity(), 1);
        cache.insert(1, 1);
        cache.insert(2, 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&2));
    }
}
