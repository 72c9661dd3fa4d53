//! Concurrent unordered collections behind one contract.
//!
//! Four list variants implement [`ConcurrentSet`] with different
//! synchronization strategies (one global lock, hand-over-hand mutexes,
//! hand-over-hand reader/writer spin locks, and a lock-free list with
//! mark-bit deletion), a hash map chains any of them into buckets, and
//! two adapters expose third-party tables through [`ConcurrentMap`] so
//! the benchmark can drive everything through the same calls.

pub mod adapters;
pub mod coarse_list;
pub mod fine_list;
pub mod hash_map;
pub mod lockfree_list;
pub mod rw_spin;
pub mod seq_list;
pub mod spin_list;

pub use adapters::{CHashMapTable, DashMapTable};
pub use coarse_list::CoarseList;
pub use fine_list::FineList;
pub use hash_map::{BucketMap, Entry};
pub use lockfree_list::LockFreeList;
pub use rw_spin::RwSpinLock;
pub use seq_list::SeqList;
pub use spin_list::RwSpinList;

/// A set of values. All methods take `&self`; whether an implementor may
/// actually be shared between threads is expressed through `Send`/`Sync`,
/// so handing the single-threaded baseline to multiple threads fails to
/// compile instead of failing at runtime.
pub trait ConcurrentSet<T> {
    /// Adds `value` at the head of the set. Duplicates are accepted.
    fn insert(&self, value: T) -> bool;

    /// Adds `value` only if no equal value is present.
    fn insert_unique(&self, value: T) -> bool;

    /// Removes one element equal to `value`, reporting whether one was found.
    fn remove(&self, value: &T) -> bool;

    /// Membership test.
    fn contains(&self, value: &T) -> bool;

    /// Returns a copy of the stored element equal to `value`. Useful when
    /// equality only inspects part of the element, like map entries.
    fn find(&self, value: &T) -> Option<T>
    where
        T: Clone;

    /// Number of elements. Concurrent variants keep this in an atomic that
    /// trails the structure under contention; it is exact when quiescent.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A keyed table. Implemented by [`BucketMap`] over any list variant and by
/// the third-party adapters, so the benchmark runner is generic over all of
/// them with static dispatch.
pub trait ConcurrentMap<K, V> {
    /// Builds a table sized for roughly `buckets` chains.
    fn with_buckets(buckets: usize) -> Self;

    /// Inserts the pair, reporting whether the key was new.
    fn insert(&self, key: K, value: V) -> bool;

    /// Removes the entry for `key`, reporting whether one existed.
    fn remove(&self, key: &K) -> bool;

    /// Key membership test.
    fn has(&self, key: &K) -> bool;

    /// Returns the value for `key`, inserting `V::default()` first when the
    /// key is absent.
    fn get(&self, key: K) -> V;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
