use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Bounded map that evicts in insertion order. Reads never change the
/// eviction order, and replacing an existing key keeps its original slot.
#[derive(Debug)]
pub(crate) struct FifoStore<K, V> {
    capacity: usize,
    entries: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K: Eq + Hash + Clone, V> FifoStore<K, V> {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        FifoStore {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    pub(crate) fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Inserts or replaces. Returns the key evicted to make room, if any.
    pub(crate) fn insert(&mut self, key: K, value: V) -> Option<K> {
        if let Some(existing) = self.entries.get_mut(&key) {
            *existing = value;
            return None;
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, value);

        if self.order.len() > self.capacity {
            let oldest = self.order.pop_front()?;
            self.entries.remove(&oldest);
            return Some(oldest);
        }
        None
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_first_inserted_past_capacity() {
        let mut store = FifoStore::new(3);
        assert_eq!(store.insert("a", 1), None);
        assert_eq!(store.insert("b", 2), None);
        assert_eq!(store.insert("c", 3), None);
        assert_eq!(store.insert("d", 4), Some("a"));
        assert_eq!(store.get(&"a"), None);
        assert_eq!(store.get(&"b"), Some(&2));
        assert_eq!(store.get(&"d"), Some(&4));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn replacing_keeps_original_slot() {
        let mut store = FifoStore::new(2);
        store.insert("a", 1);
        store.insert("b", 2);
        assert_eq!(store.insert("a", 10), None);
        assert_eq!(store.insert("c", 3), Some("a"));
        assert_eq!(store.get(&"b"), Some(&2));
    }

    #[test]
    fn zero_capacity_is_treated_as_one() {
        let mut store = FifoStore::new(0);
        assert_eq!(store.capacity(), 1);
        store.insert(1, "x");
        assert_eq!(store.insert(2, "y"), Some(1));
    }
}
