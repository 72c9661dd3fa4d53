//! Coarse-grained locking: the whole sequential list behind one mutex.
//!
//! Upper bound on contention, lower bound on concurrency; every operation
//! holds the lock for its full duration.

use std::ptr;

use parking_lot::Mutex;

use crate::seq_list::ListCore;
use crate::ConcurrentSet;

pub struct CoarseList<T> {
    core: Mutex<ListCore<T>>,
}

// ListCore holds raw node pointers, so the auto traits bail out; the mutex
// serializes every access, making the usual Mutex<T> bounds sound here.
unsafe impl<T: Send> Send for CoarseList<T> {}
unsafe impl<T: Send> Sync for CoarseList<T> {}

impl<T> CoarseList<T> {
    pub fn new() -> Self {
        CoarseList {
            core: Mutex::new(ListCore::new()),
        }
    }

    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.core.lock().to_vec()
    }

    #[cfg(test)]
    fn links_consistent(&self) -> bool {
        self.core.lock().links_consistent()
    }
}

impl<T> Default for CoarseList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: PartialEq> ConcurrentSet<T> for CoarseList<T> {
    fn insert(&self, value: T) -> bool {
        self.core.lock().insert(value);
        true
    }

    fn insert_unique(&self, value: T) -> bool {
        self.core.lock().insert_unique(value)
    }

    fn remove(&self, value: &T) -> bool {
        self.core.lock().remove(value)
    }

    fn contains(&self, value: &T) -> bool {
        self.core.lock().contains(value)
    }

    fn find(&self, value: &T) -> Option<T>
    where
        T: Clone,
    {
        self.core.lock().find(value)
    }

    fn len(&self) -> usize {
        self.core.lock().len()
    }
}

impl<T: std::fmt::Debug + Clone> std::fmt::Debug for CoarseList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoarseList").field("values", &self.to_vec()).finish()
    }
}

impl<T: PartialEq> PartialEq for CoarseList<T> {
    /// Locks both lists in address order so two concurrent comparisons of
    /// the same pair cannot deadlock.
    fn eq(&self, other: &Self) -> bool {
        if ptr::eq(self, other) {
            return true;
        }
        let (first, second) = if (self as *const Self) < (other as *const Self) {
            (self, other)
        } else {
            (other, self)
        };
        let a = first.core.lock();
        let b = second.core.lock();
        a.values_eq(&b)
    }
}
