//! Adapters over third-party concurrent tables.
//!
//! Both wrappers just delegate; they exist so external baselines can run
//! through the same [`ConcurrentMap`] contract as the bucket-chain map.

use std::hash::Hash;

use chashmap::CHashMap;
use dashmap::DashMap;

use crate::ConcurrentMap;

/// Sharded-lock table from the `dashmap` crate.
pub struct DashMapTable<K: Eq + Hash, V> {
    table: DashMap<K, V>,
}

impl<K: Eq + Hash, V: Default + Clone> ConcurrentMap<K, V> for DashMapTable<K, V> {
    fn with_buckets(buckets: usize) -> Self {
        DashMapTable {
            table: DashMap::with_capacity(buckets),
        }
    }

    fn insert(&self, key: K, value: V) -> bool {
        match self.table.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    fn remove(&self, key: &K) -> bool {
        self.table.remove(key).is_some()
    }

    fn has(&self, key: &K) -> bool {
        self.table.contains_key(key)
    }

    fn get(&self, key: K) -> V {
        self.table.entry(key).or_default().value().clone()
    }

    fn len(&self) -> usize {
        self.table.len()
    }
}

/// Bucket-locked table from the `chashmap` crate.
pub struct CHashMapTable<K, V> {
    table: CHashMap<K, V>,
}

impl<K: Hash + PartialEq, V: Default + Clone> ConcurrentMap<K, V> for CHashMapTable<K, V> {
    fn with_buckets(buckets: usize) -> Self {
        CHashMapTable {
            table: CHashMap::with_capacity(buckets),
        }
    }

    fn insert(&self, key: K, value: V) -> bool {
        // chashmap has no vacant-entry API; the check-then-insert window
        // keeps "was new" reporting accurate but a racing insert on the
        // same key may replace the value.
        if self.table.contains_key(&key) {
            return false;
        }
        self.table.insert(key, value).is_none()
    }

    fn remove(&self, key: &K) -> bool {
        self.table.remove(key).is_some()
    }

    fn has(&self, key: &K) -> bool {
        self.table.contains_key(key)
    }

    fn get(&self, key: K) -> V {
        if let Some(found) = self.table.get(&key) {
            return found.clone();
        }
        let value = V::default();
        self.table.insert(key, value.clone());
        value
    }

    fn len(&self) -> usize {
        self.table.len()
    }
}
