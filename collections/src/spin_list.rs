//! Doubly linked list with hand-over-hand reader/writer spin locks.
//!
//! The traversal shape is the same as [`FineList`](crate::FineList), but
//! every node (and the list head) is protected by an [`RwSpinLock`], so
//! readers can overlap each other while writers stay exclusive. Lock
//! acquisition order is unchanged: list lock before any node lock, node
//! locks only head to tail.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::rw_spin::RwSpinLock;
use crate::ConcurrentSet;

struct Node<T> {
    value: T,
    prev: UnsafeCell<*mut Node<T>>,
    next: UnsafeCell<*mut Node<T>>,
    lock: RwSpinLock,
}

impl<T> Node<T> {
    fn alloc(value: T, prev: *mut Node<T>, next: *mut Node<T>) -> *mut Node<T> {
        Box::into_raw(Box::new(Node {
            value,
            prev: UnsafeCell::new(prev),
            next: UnsafeCell::new(next),
            lock: RwSpinLock::new(),
        }))
    }
}

pub struct RwSpinList<T> {
    head: UnsafeCell<*mut Node<T>>,
    size: AtomicUsize,
    lock: RwSpinLock,
}

// Readers may observe the same node's value concurrently, hence T: Sync on
// top of the usual T: Send.
unsafe impl<T: Send> Send for RwSpinList<T> {}
unsafe impl<T: Send + Sync> Sync for RwSpinList<T> {}

impl<T> RwSpinList<T> {
    pub fn new() -> Self {
        RwSpinList {
            head: UnsafeCell::new(ptr::null_mut()),
            size: AtomicUsize::new(0),
            lock: RwSpinLock::new(),
        }
    }

    /// Values head to tail under coupled read locks.
    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        let mut values = Vec::new();
        self.lock.read_lock();
        unsafe {
            let first = *self.head.get();
            if first.is_null() {
                self.lock.read_unlock();
                return values;
            }
            (*first).lock.read_lock();
            values.push((*first).value.clone());
            let mut prev = first;
            let mut curr = *(*first).next.get();
            self.lock.read_unlock();
            while !curr.is_null() {
                (*curr).lock.read_lock();
                values.push((*curr).value.clone());
                let next = *(*curr).next.get();
                (*prev).lock.read_unlock();
                prev = curr;
                curr = next;
            }
            (*prev).lock.read_unlock();
        }
        values
    }

    #[cfg(test)]
    fn links_consistent(&self) -> bool {
        // Test-only, single-threaded: walk the raw links directly.
        unsafe {
            let mut count = 0;
            let mut node = *self.head.get();
            if !node.is_null() && !(*(*node).prev.get()).is_null() {
                return false;
            }
            while !node.is_null() {
                count += 1;
                let next = *(*node).next.get();
                if !next.is_null() && *(*next).prev.get() != node {
                    return false;
                }
                node = next;
            }
            count == self.size.load(Ordering::Relaxed)
        }
    }
}

impl<T> Default for RwSpinList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: PartialEq> ConcurrentSet<T> for RwSpinList<T> {
    /// Prepends under the list write lock plus the old head's write lock.
    fn insert(&self, value: T) -> bool {
        self.lock.write_lock();
        unsafe {
            let first = *self.head.get();
            if first.is_null() {
                *self.head.get() = Node::alloc(value, ptr::null_mut(), ptr::null_mut());
            } else {
                (*first).lock.write_lock();
                let node = Node::alloc(value, ptr::null_mut(), first);
                *(*first).prev.get() = node;
                *self.head.get() = node;
                (*first).lock.write_unlock();
            }
        }
        self.size.fetch_add(1, Ordering::Relaxed);
        self.lock.write_unlock();
        true
    }

    /// Couples write locks to the tail and appends there when absent.
    fn insert_unique(&self, value: T) -> bool {
        self.lock.write_lock();
        unsafe {
            let first = *self.head.get();
            if first.is_null() {
                *self.head.get() = Node::alloc(value, ptr::null_mut(), ptr::null_mut());
                self.size.fetch_add(1, Ordering::Relaxed);
                self.lock.write_unlock();
                return true;
            }
            (*first).lock.write_lock();
            if (*first).value == value {
                (*first).lock.write_unlock();
                self.lock.write_unlock();
                return false;
            }
            let mut prev = first;
            let mut curr = *(*first).next.get();
            self.lock.write_unlock();
            while !curr.is_null() {
                (*curr).lock.write_lock();
                if (*curr).value == value {
                    (*curr).lock.write_unlock();
                    (*prev).lock.write_unlock();
                    return false;
                }
                let next = *(*curr).next.get();
                (*prev).lock.write_unlock();
                prev = curr;
                curr = next;
            }
            // prev is the tail and its write lock is still held.
            *(*prev).next.get() = Node::alloc(value, prev, ptr::null_mut());
            (*prev).lock.write_unlock();
        }
        self.size.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn remove(&self, value: &T) -> bool {
        self.lock.write_lock();
        unsafe {
            let first = *self.head.get();
            if first.is_null() {
                self.lock.write_unlock();
                return false;
            }
            (*first).lock.write_lock();
            if (*first).value == *value {
                let next = *(*first).next.get();
                *self.head.get() = next;
                if !next.is_null() {
                    *(*next).prev.get() = ptr::null_mut();
                }
                self.size.fetch_sub(1, Ordering::Relaxed);
                (*first).lock.write_unlock();
                self.lock.write_unlock();
                drop(Box::from_raw(first));
                return true;
            }
            let mut prev = first;
            let mut curr = *(*first).next.get();
            self.lock.write_unlock();
            while !curr.is_null() {
                (*curr).lock.write_lock();
                if (*curr).value == *value {
                    // Unlink inside the {prev, curr} write window.
                    let next = *(*curr).next.get();
                    *(*prev).next.get() = next;
                    if !next.is_null() {
                        *(*next).prev.get() = prev;
                    }
                    self.size.fetch_sub(1, Ordering::Relaxed);
                    (*curr).lock.write_unlock();
                    (*prev).lock.write_unlock();
                    drop(Box::from_raw(curr));
                    return true;
                }
                let next = *(*curr).next.get();
                (*prev).lock.write_unlock();
                prev = curr;
                curr = next;
            }
            (*prev).lock.write_unlock();
        }
        false
    }

    fn contains(&self, value: &T) -> bool {
        self.lock.read_lock();
        unsafe {
            let first = *self.head.get();
            if first.is_null() {
                self.lock.read_unlock();
                return false;
            }
            (*first).lock.read_lock();
            if (*first).value == *value {
                (*first).lock.read_unlock();
                self.lock.read_unlock();
                return true;
            }
            let mut prev = first;
            let mut curr = *(*first).next.get();
            self.lock.read_unlock();
            while !curr.is_null() {
                (*curr).lock.read_lock();
                if (*curr).value == *value {
                    (*curr).lock.read_unlock();
                    (*prev).lock.read_unlock();
                    return true;
                }
                let next = *(*curr).next.get();
                (*prev).lock.read_unlock();
                prev = curr;
                curr = next;
            }
            (*prev).lock.read_unlock();
        }
        false
    }

    fn find(&self, value: &T) -> Option<T>
    where
        T: Clone,
    {
        self.lock.read_lock();
        unsafe {
            let first = *self.head.get();
            if first.is_null() {
                self.lock.read_unlock();
                return None;
            }
            (*first).lock.read_lock();
            if (*first).value == *value {
                let found = (*first).value.clone();
                (*first).lock.read_unlock();
                self.lock.read_unlock();
                return Some(found);
            }
            let mut prev = first;
            let mut curr = *(*first).next.get();
            self.lock.read_unlock();
            while !curr.is_null() {
                (*curr).lock.read_lock();
                if (*curr).value == *value {
                    let found = (*curr).value.clone();
                    (*curr).lock.read_unlock();
                    (*prev).lock.read_unlock();
                    return Some(found);
                }
                let next = *(*curr).next.get();
                (*prev).lock.read_unlock();
                prev = curr;
                curr = next;
            }
            (*prev).lock.read_unlock();
        }
        None
    }

    /// Snapshot of the atomic counter; no lock taken.
    fn len(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }
}

impl<T: std::fmt::Debug + Clone> std::fmt::Debug for RwSpinList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RwSpinList").field("values", &self.to_vec()).finish()
    }
}

impl<T: PartialEq> PartialEq for RwSpinList<T> {
    /// Reader comparison: list read locks in address order, then coupled
    /// read locks walking both lists in lockstep.
    fn eq(&self, other: &Self) -> bool {
        if ptr::eq(self, other) {
            return true;
        }
        if self.size.load(Ordering::Relaxed) != other.size.load(Ordering::Relaxed) {
            return false;
        }
        let (first, second) = if (self as *const Self) < (other as *const Self) {
            (self, other)
        } else {
            (other, self)
        };
        first.lock.read_lock();
        second.lock.read_lock();
        unsafe {
            let a = *first.head.get();
            let b = *second.head.get();
            if a.is_null() || b.is_null() {
                second.lock.read_unlock();
                first.lock.read_unlock();
                return a.is_null() && b.is_null();
            }
            (*a).lock.read_lock();
            (*b).lock.read_lock();
            second.lock.read_unlock();
            first.lock.read_unlock();
            let mut a = a;
            let mut b = b;
            loop {
                if (*a).value != (*b).value {
                    (*b).lock.read_unlock();
                    (*a).lock.read_unlock();
                    return false;
                }
                let na = *(*a).next.get();
                let nb = *(*b).next.get();
                if na.is_null() || nb.is_null() {
                    (*b).lock.read_unlock();
                    (*a).lock.read_unlock();
                    return na.is_null() && nb.is_null();
                }
                (*na).lock.read_lock();
                (*nb).lock.read_lock();
                (*a).lock.read_unlock();
                (*b).lock.read_unlock();
                a = na;
                b = nb;
            }
        }
    }
}

impl<T> Drop for RwSpinList<T> {
    /// Takes the list write lock so teardown owns the structure outright.
    fn drop(&mut self) {
        self.lock.write_lock();
        unsafe {
            let mut node = *self.head.get();
            while !node.is_null() {
                let next = *(*node).next.get();
                drop(Box::from_raw(node));
                node = next;
            }
            *self.head.get() = ptr::null_mut();
        }
        self.lock.write_unlock();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_insert_remove_contains() {
        let list = RwSpinList::new();
        list.insert(1);
        list.insert(2);
        list.insert(3);
        assert!(list.contains(&2));
        assert_eq!(list.len(), 3);
        assert_eq!(list.to_vec(), vec![3, 2, 1]);
        assert!(list.remove(&2));
        assert!(!list.contains(&2));
        assert_eq!(list.len(), 2);
        assert!(list.links_consistent());
    }

    #[test]
    fn test_insert_unique_twice() {
        let list = RwSpinList::new();
        assert!(list.insert_unique(4));
        assert!(!list.insert_unique(4));
        assert_eq!(list.len(), 1);
        assert!(list.insert_unique(5));
        assert_eq!(list.to_vec(), vec![4, 5]);
    }

    #[test]
    fn test_find_and_equality() {
        let a = RwSpinList::new();
        let b = RwSpinList::new();
        assert_eq!(a, b);
        for i in 0..8u64 {
            a.insert(i);
            b.insert(i);
        }
        assert_eq!(a.find(&3), Some(3));
        assert_eq!(a.find(&9), None);
        assert_eq!(a, b);
        b.remove(&0);
        assert_ne!(a, b);
    }

    #[test]
    fn test_matches_sequential_baseline() {
        use crate::SeqList;

        let spin = RwSpinList::new();
        let seq = SeqList::new();
        for i in 0..60u64 {
            if i % 5 == 0 {
                assert_eq!(spin.insert_unique(i % 9), seq.insert_unique(i % 9));
            } else {
                spin.insert(i % 9);
                seq.insert(i % 9);
            }
            if i % 3 == 0 {
                assert_eq!(spin.remove(&(i % 7)), seq.remove(&(i % 7)));
            }
        }
        assert_eq!(spin.to_vec(), seq.to_vec());
        assert_eq!(spin.len(), seq.len());
    }

    #[test]
    fn test_concurrent_disjoint_ranges() {
        use crossbeam_utils::thread;
        use rand::seq::SliceRandom;
        use rand::SeedableRng;

        const PER_THREAD: u64 = 1500;
        let list = Arc::new(RwSpinList::new());
        thread::scope(|s| {
            for t in 0..4u64 {
                let list = list.clone();
                s.spawn(move |_| {
                    let mut rng = rand::rngs::StdRng::seed_from_u64(t);
                    let mut keys: Vec<u64> =
                        (t * PER_THREAD..(t + 1) * PER_THREAD).collect();
                    keys.shuffle(&mut rng);
                    for k in keys {
                        list.insert(k);
                    }
                });
            }
        })
        .unwrap();
        assert_eq!(list.len(), 4 * PER_THREAD as usize);
        for k in 0..4 * PER_THREAD {
            assert!(list.contains(&k));
        }
        thread::scope(|s| {
            for t in 0..4u64 {
                let list = list.clone();
                s.spawn(move |_| {
                    let mut rng = rand::rngs::StdRng::seed_from_u64(t + 77);
                    let mut keys: Vec<u64> =
                        (t * PER_THREAD..(t + 1) * PER_THREAD).collect();
                    keys.shuffle(&mut rng);
                    for k in keys {
                        assert!(list.remove(&k));
                    }
                });
            }
        })
        .unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn test_parallel_readers_during_writes() {
        use crossbeam_utils::thread;

        let list = Arc::new(RwSpinList::new());
        for i in 0..200u64 {
            list.insert(i);
        }
        thread::scope(|s| {
            for _ in 0..3 {
                let list = list.clone();
                s.spawn(move |_| {
                    for i in 0..200u64 {
                        list.contains(&i);
                    }
                });
            }
            let writer = list.clone();
            s.spawn(move |_| {
                for i in 200..300u64 {
                    writer.insert(i);
                }
            });
        })
        .unwrap();
        assert_eq!(list.len(), 300);
    }
}
