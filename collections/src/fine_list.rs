//! Hand-over-hand (lock-coupling) doubly linked list.
//!
//! Each node's mutex guards that node's `next` pointer; the list-level
//! mutex guards the head pointer. A traversal holds at most two adjacent
//! locks and only ever acquires them in list order (list lock before any
//! node lock, node locks head to tail), which is what makes the protocol
//! deadlock free. `prev` pointers are only touched inside the two-lock
//! window around the affected node.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::ConcurrentSet;

struct Node<T> {
    value: T,
    prev: UnsafeCell<*mut Node<T>>,
    next: Mutex<*mut Node<T>>,
}

impl<T> Node<T> {
    fn alloc(value: T, prev: *mut Node<T>, next: *mut Node<T>) -> *mut Node<T> {
        Box::into_raw(Box::new(Node {
            value,
            prev: UnsafeCell::new(prev),
            next: Mutex::new(next),
        }))
    }
}

pub struct FineList<T> {
    head: Mutex<*mut Node<T>>,
    size: AtomicUsize,
}

// Raw node pointers defeat the auto traits; the coupling protocol hands a
// node to exactly one thread at a time, so Mutex<T>-style bounds apply.
unsafe impl<T: Send> Send for FineList<T> {}
unsafe impl<T: Send> Sync for FineList<T> {}

impl<T> FineList<T> {
    pub fn new() -> Self {
        FineList {
            head: Mutex::new(ptr::null_mut()),
            size: AtomicUsize::new(0),
        }
    }

    /// Values head to tail, collected under the coupling protocol.
    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        let mut values = Vec::new();
        let head_guard = self.head.lock();
        let first = *head_guard;
        if first.is_null() {
            return values;
        }
        unsafe {
            let mut prev_guard = (*first).next.lock();
            values.push((*first).value.clone());
            drop(head_guard);
            let mut curr = *prev_guard;
            while !curr.is_null() {
                let curr_guard = (*curr).next.lock();
                values.push((*curr).value.clone());
                let next = *curr_guard;
                prev_guard = curr_guard;
                curr = next;
            }
        }
        values
    }

    #[cfg(test)]
    fn links_consistent(&self) -> bool {
        // Test-only, single-threaded: walk the raw links directly.
        unsafe {
            let mut count = 0;
            let mut node = *self.head.lock();
            if !node.is_null() && !(*(*node).prev.get()).is_null() {
                return false;
            }
            while !node.is_null() {
                count += 1;
                let next = *(*node).next.lock();
                if !next.is_null() && *(*next).prev.get() != node {
                    return false;
                }
                node = next;
            }
            count == self.size.load(Ordering::Relaxed)
        }
    }
}

impl<T> Default for FineList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: PartialEq> ConcurrentSet<T> for FineList<T> {
    /// Prepends under the list lock plus the old head's lock.
    fn insert(&self, value: T) -> bool {
        let mut head_guard = self.head.lock();
        let first = *head_guard;
        if first.is_null() {
            *head_guard = Node::alloc(value, ptr::null_mut(), ptr::null_mut());
        } else {
            unsafe {
                let _first_guard = (*first).next.lock();
                let node = Node::alloc(value, ptr::null_mut(), first);
                *(*first).prev.get() = node;
                *head_guard = node;
            }
        }
        self.size.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Couples write locks to the tail and appends there when absent.
    fn insert_unique(&self, value: T) -> bool {
        let mut head_guard = self.head.lock();
        let first = *head_guard;
        if first.is_null() {
            *head_guard = Node::alloc(value, ptr::null_mut(), ptr::null_mut());
            self.size.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        unsafe {
            let mut prev_guard = (*first).next.lock();
            if (*first).value == value {
                return false;
            }
            drop(head_guard);
            let mut prev = first;
            let mut curr = *prev_guard;
            while !curr.is_null() {
                let curr_guard = (*curr).next.lock();
                if (*curr).value == value {
                    return false;
                }
                let next = *curr_guard;
                prev = curr;
                prev_guard = curr_guard;
                curr = next;
            }
            // prev is the tail and its lock is still held.
            *prev_guard = Node::alloc(value, prev, ptr::null_mut());
        }
        self.size.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn remove(&self, value: &T) -> bool {
        let mut head_guard = self.head.lock();
        let first = *head_guard;
        if first.is_null() {
            return false;
        }
        unsafe {
            let mut prev_guard = (*first).next.lock();
            if (*first).value == *value {
                // Head match: relink under the list lock and the head's lock.
                let next = *prev_guard;
                *head_guard = next;
                if !next.is_null() {
                    *(*next).prev.get() = ptr::null_mut();
                }
                self.size.fetch_sub(1, Ordering::Relaxed);
                drop(prev_guard);
                drop(head_guard);
                drop(Box::from_raw(first));
                return true;
            }
            drop(head_guard);
            let mut prev = first;
            let mut curr = *prev_guard;
            while !curr.is_null() {
                let curr_guard = (*curr).next.lock();
                if (*curr).value == *value {
                    // Unlink inside the {prev, curr} window. The successor's
                    // back link is rewritten without its own lock, exactly as
                    // wide as the protocol's window.
                    let next = *curr_guard;
                    *prev_guard = next;
                    if !next.is_null() {
                        *(*next).prev.get() = prev;
                    }
                    self.size.fetch_sub(1, Ordering::Relaxed);
                    drop(curr_guard);
                    drop(prev_guard);
                    drop(Box::from_raw(curr));
                    return true;
                }
                let next = *curr_guard;
                prev = curr;
                prev_guard = curr_guard;
                curr = next;
            }
        }
        false
    }

    fn contains(&self, value: &T) -> bool {
        let head_guard = self.head.lock();
        let first = *head_guard;
        if first.is_null() {
            return false;
        }
        unsafe {
            let mut prev_guard = (*first).next.lock();
            if (*first).value == *value {
                return true;
            }
            drop(head_guard);
            let mut curr = *prev_guard;
            while !curr.is_null() {
                let curr_guard = (*curr).next.lock();
                if (*curr).value == *value {
                    return true;
                }
                let next = *curr_guard;
                prev_guard = curr_guard;
                curr = next;
            }
        }
        false
    }

    fn find(&self, value: &T) -> Option<T>
    where
        T: Clone,
    {
        self.scan(value)
    }

    fn len(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }
}

impl<T: std::fmt::Debug + Clone> std::fmt::Debug for FineList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FineList").field("values", &self.to_vec()).finish()
    }
}

impl<T: PartialEq> PartialEq for FineList<T> {
    /// List locks first, in address order, then a lockstep coupled walk.
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
        let ha = first.head.lock();
        let hb = second.head.lock();
        let mut a = *ha;
        let mut b = *hb;
        let mut _prev_a: Option<MutexGuard<'_, *mut Node<T>>> = None;
        let mut _prev_b: Option<MutexGuard<'_, *mut Node<T>>> = None;
        loop {
            if a.is_null() || b.is_null() {
                return a.is_null() && b.is_null();
            }
            unsafe {
                let ga = (*a).next.lock();
                let gb = (*b).next.lock();
                if (*a).value != (*b).value {
                    return false;
                }
                let next_a = *ga;
                let next_b = *gb;
                _prev_a = Some(ga);
                _prev_b = Some(gb);
                a = next_a;
                b = next_b;
            }
        }
    }
}

impl<T> Drop for FineList<T> {
    /// Takes the list lock before tearing down, so the whole structure is
    /// owned exclusively while nodes are freed.
    fn drop(&mut self) {
        let mut head_guard = self.head.lock();
        let mut node = *head_guard;
        while !node.is_null() {
            unsafe {
                let next = *(*node).next.lock();
                drop(Box::from_raw(node));
                node = next;
            }
        }
        *head_guard = ptr::null_mut();
    }
}

impl<T: PartialEq> FineList<T> {
    /// Coupled read of the first matching value.
    fn scan(&self, value: &T) -> Option<T>
    where
        T: Clone,
    {
        let head_guard = self.head.lock();
        let first = *head_guard;
        if first.is_null() {
            return None;
        }
        unsafe {
            let mut prev_guard = (*first).next.lock();
            if (*first).value == *value {
                return Some((*first).value.clone());
            }
            drop(head_guard);
            let mut curr = *prev_guard;
            while !curr.is_null() {
                let curr_guard = (*curr).next.lock();
                if (*curr).value == *value {
                    return Some((*curr).value.clone());
                }
                let next = *curr_guard;
                prev_guard = curr_guard;
                curr = next;
            }
        }
        None
    }
}
