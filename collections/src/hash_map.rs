//! Hash map layered over any list variant as its bucket chains.
//!
//! The bucket count is fixed at construction; there is no rehashing. The
//! map inherits whatever concurrency discipline its bucket list has:
//! coarse-lock buckets make a coarse-lock map, lock-free buckets a
//! lock-free map.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{ConcurrentMap, ConcurrentSet};

pub const DEFAULT_BUCKETS: usize = 1000;

/// A key/value pair that compares (and hashes) by key alone, so bucket
/// lists can treat entries as set elements.
#[derive(Clone, Debug, Default)]
pub struct Entry<K, V> {
    pub key: K,
    pub value: V,
}

impl<K, V> Entry<K, V> {
    pub fn new(key: K, value: V) -> Self {
        Entry { key, value }
    }

    /// Key-only entry used to probe a bucket.
    pub fn probe(key: K) -> Self
    where
        V: Default,
    {
        Entry {
            key,
            value: V::default(),
        }
    }
}

impl<K: PartialEq, V> PartialEq for Entry<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

pub struct BucketMap<K, V, L> {
    buckets: Vec<L>,
    nbuckets: usize,
    size: AtomicUsize,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, L: Default> BucketMap<K, V, L> {
    pub fn new() -> Self {
        Self::with_buckets(DEFAULT_BUCKETS)
    }

    pub fn with_buckets(nbuckets: usize) -> Self {
        let nbuckets = nbuckets.max(1);
        BucketMap {
            buckets: (0..nbuckets).map(|_| L::default()).collect(),
            nbuckets,
            size: AtomicUsize::new(0),
            _marker: PhantomData,
        }
    }
}

impl<K, V, L: Default> Default for BucketMap<K, V, L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, L> BucketMap<K, V, L>
where
    K: Hash + PartialEq + Clone,
    V: Default + Clone,
    L: ConcurrentSet<Entry<K, V>> + Default,
{
    /// Every entry for `key` lives in bucket `hash(key) % nbuckets`.
    fn bucket(&self, key: &K) -> &L {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.buckets[(hasher.finish() % self.nbuckets as u64) as usize]
    }

    /// Inserts only when the key is absent; reports whether it was new.
    pub fn insert(&self, key: K, value: V) -> bool {
        let bucket = self.bucket(&key);
        if bucket.insert_unique(Entry::new(key, value)) {
            self.size.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    pub fn remove(&self, key: &K) -> bool {
        let bucket = self.bucket(key);
        if bucket.remove(&Entry::probe(key.clone())) {
            self.size.fetch_sub(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    pub fn has(&self, key: &K) -> bool {
        self.bucket(key).contains(&Entry::probe(key.clone()))
    }

    /// Non-mutating lookup.
    pub fn lookup(&self, key: &K) -> Option<V> {
        self.bucket(key)
            .find(&Entry::probe(key.clone()))
            .map(|entry| entry.value)
    }

    /// Returns the value for `key`; when absent, a default-valued entry is
    /// inserted first and that default is returned.
    pub fn get(&self, key: K) -> V {
        let bucket = self.bucket(&key);
        let probe = Entry::probe(key);
        if let Some(found) = bucket.find(&probe) {
            return found.value;
        }
        if bucket.insert_unique(probe) {
            self.size.fetch_add(1, Ordering::Relaxed);
        }
        V::default()
    }

    /// Like the bucket lists' counters: approximate under concurrent
    /// mutation, exact when quiescent.
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V, L> ConcurrentMap<K, V> for BucketMap<K, V, L>
where
    K: Hash + PartialEq + Clone,
    V: Default + Clone,
    L: ConcurrentSet<Entry<K, V>> + Default,
{
    fn with_buckets(buckets: usize) -> Self {
        BucketMap::with_buckets(buckets)
    }

    fn insert(&self, key: K, value: V) -> bool {
        BucketMap::insert(self, key, value)
    }

    fn remove(&self, key: &K) -> bool {
        BucketMap::remove(self, key)
    }

    fn has(&self, key: &K) -> bool {
        BucketMap::has(self, key)
    }

    fn get(&self, key: K) -> V {
        BucketMap::get(self, key)
    }

    fn len(&self) -> usize {
        BucketMap::len(self)
    }
}
