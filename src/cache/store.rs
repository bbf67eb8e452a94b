//! Sharded Store Module
//!
//! Concurrent associative index from key to slot. Keys are routed to one of a
//! fixed number of independently locked shards by xxHash64, so readers of
//! different keys rarely meet on the same lock. The store knows nothing about
//! ordering or eviction.

use std::collections::HashMap;

use parking_lot::RwLock;
use twox_hash::XxHash64;

/// Default number of shards (power of two).
pub const DEFAULT_SHARDS: usize = 256;

const HASH_SEED: u64 = 0;

// == Sharded Store ==
/// Fixed-width array of `RwLock<HashMap>` shards.
#[derive(Debug)]
pub struct ShardedStore<T> {
    shards: Box<[RwLock<HashMap<String, T>>]>,
    mask: usize,
}

impl<T> Default for ShardedStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ShardedStore<T> {
    // == Constructor ==
    /// Creates a store with [`DEFAULT_SHARDS`] shards.
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    /// Creates a store with `shards` rounded up to the next power of two.
    pub fn with_shards(shards: usize) -> Self {
        let count = shards.max(1).next_power_of_two();
        let shards = (0..count)
            .map(|_| RwLock::new(HashMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            shards,
            mask: count - 1,
        }
    }

    fn shard(&self, key: &str) -> &RwLock<HashMap<String, T>> {
        let hash = XxHash64::oneshot(HASH_SEED, key.as_bytes());
        &self.shards[(hash as usize) & self.mask]
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Inserts or replaces the slot for `key`.
    pub fn set(&self, key: String, slot: T) {
        self.shard(&key).write().insert(key, slot);
    }

    pub fn del(&self, key: &str) -> Option<T> {
        self.shard(key).write().remove(key)
    }

    /// Removes the slot only when `pred` accepts the current occupant.
    pub fn remove_if(&self, key: &str, pred: impl FnOnce(&T) -> bool) -> Option<T> {
        let mut shard = self.shard(key).write();
        match shard.get(key) {
            Some(slot) if pred(slot) => shard.remove(key),
            _ => None,
        }
    }

    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.write().clear();
        }
    }

    // == Length ==
    /// Sums shard sizes; an approximation while writers are active.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.read().is_empty())
    }
}

impl<T: Clone> ShardedStore<T> {
    pub fn get(&self, key: &str) -> Option<T> {
        self.shard(key).read().get(key).cloned()
    }

    // == Get Or Insert ==
    /// Returns the existing slot, or inserts `make()` atomically under the
    /// shard lock. The flag is true when a new slot was inserted.
    pub fn get_or_insert_with(&self, key: &str, make: impl FnOnce() -> T) -> (T, bool) {
        let shard = self.shard(key);
        if let Some(slot) = shard.read().get(key) {
            return (slot.clone(), false);
        }

        let mut guard = shard.write();
        if let Some(slot) = guard.get(key) {
            return (slot.clone(), false);
        }
        let slot = make();
        guard.insert(key.to_string(), slot.clone());
        (slot, true)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_store_new() {
        let store: ShardedStore<u32> = ShardedStore::new();
        assert_eq!(store.len(), 0);
        assert!(store.is_empty());
        assert_eq!(store.shard_count(), DEFAULT_SHARDS);
    }

    #[test]
    fn test_shard_count_rounds_to_power_of_two() {
        let store: ShardedStore<u32> = ShardedStore::with_shards(100);
        assert_eq!(store.shard_count(), 128);

        let store: ShardedStore<u32> = ShardedStore::with_shards(0);
        assert_eq!(store.shard_count(), 1);
    }

    #[test]
    fn test_store_set_get_del() {
        let store = ShardedStore::new();
        store.set("key1".to_string(), 1);
        store.set("key2".to_string(), 2);

        assert_eq!(store.get("key1"), Some(1));
        assert_eq!(store.len(), 2);

        assert_eq!(store.del("key1"), Some(1));
        assert_eq!(store.get("key1"), None);
        assert_eq!(store.del("key1"), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_overwrite() {
        let store = ShardedStore::new();
        store.set("key1".to_string(), 1);
        store.set("key1".to_string(), 2);

        assert_eq!(store.get("key1"), Some(2));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_or_insert_with() {
        let store = ShardedStore::new();

        let (slot, inserted) = store.get_or_insert_with("a", || 10);
        assert_eq!((slot, inserted), (10, true));

        let (slot, inserted) = store.get_or_insert_with("a", || 20);
        assert_eq!((slot, inserted), (10, false));
    }

    #[test]
    fn test_remove_if() {
        let store = ShardedStore::new();
        store.set("a".to_string(), 1);

        assert_eq!(store.remove_if("a", |v| *v == 2), None);
        assert_eq!(store.get("a"), Some(1));
        assert_eq!(store.remove_if("a", |v| *v == 1), Some(1));
        assert!(store.is_empty());
    }

    #[test]
    fn test_store_clear() {
        let store = ShardedStore::new();
        for i in 0..100 {
            store.set(format!("key{}", i), i);
        }
        assert_eq!(store.len(), 100);

        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_concurrent_get_or_insert_single_winner() {
        let store = Arc::new(ShardedStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.get_or_insert_with("shared", || i).1)
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|inserted| *inserted)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(store.len(), 1);
    }
}
