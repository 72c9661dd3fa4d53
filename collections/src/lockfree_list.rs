//! Lock-free singly linked list with mark-bit logical deletion.
//!
//! Harris-style: every real node sits strictly between the `head` and
//! `tail` sentinels, and the low tag bit of a node's `next` pointer marks
//! the node as logically deleted. Removal first installs the mark (the
//! linearization point), then tries to unlink; traversals snip runs of
//! marked nodes whenever they see them. Unlinked nodes are handed to
//! epoch-based reclamation, never freed eagerly, because concurrent
//! readers may still hold pointers loaded before the unlinking CAS.

use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use parking_lot::Mutex;

use crate::ConcurrentSet;

struct Node<T> {
    value: T,
    next: Atomic<Node<T>>,
}

pub struct LockFreeList<T> {
    head: Atomic<Node<T>>,
    tail: Atomic<Node<T>>,
    size: AtomicUsize,
    // Serializes to_vec and equality only; mutators never touch it.
    render: Mutex<()>,
}

unsafe impl<T: Send> Send for LockFreeList<T> {}
unsafe impl<T: Send + Sync> Sync for LockFreeList<T> {}

impl<T: Default> LockFreeList<T> {
    /// Builds the two sentinels with `head.next` pointing at `tail`. The
    /// sentinels carry default values that no traversal ever inspects.
    pub fn new() -> Self {
        let list = LockFreeList {
            head: Atomic::null(),
            tail: Atomic::null(),
            size: AtomicUsize::new(0),
            render: Mutex::new(()),
        };
        unsafe {
            let guard = epoch::unprotected();
            let tail = Owned::new(Node {
                value: T::default(),
                next: Atomic::null(),
            })
            .into_shared(guard);
            list.tail.store(tail, Ordering::Relaxed);
            list.head.store(
                Owned::new(Node {
                    value: T::default(),
                    next: Atomic::from(tail),
                }),
                Ordering::Relaxed,
            );
        }
        list
    }
}

impl<T: Default> Default for LockFreeList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LockFreeList<T> {
    /// Finds `(left, right)` where `right` is the first unmarked node with
    /// a matching value (or the tail) and `left.next == right` held at the
    /// moment of return. Runs of marked nodes seen on the way are CAS-ed
    /// out of the list and handed to the collector.
    fn search<'g>(&self, value: &T, guard: &'g Guard) -> (Shared<'g, Node<T>>, Shared<'g, Node<T>>)
    where
        T: PartialEq,
    {
        let head = self.head.load(Ordering::Relaxed, guard);
        let tail = self.tail.load(Ordering::Relaxed, guard);
        loop {
            let mut node = head;
            let mut node_next = unsafe { node.deref() }.next.load(Ordering::Acquire, guard);
            let mut left = node;
            let mut left_next = node_next;
            loop {
                if node_next.tag() == 0 {
                    left = node;
                    left_next = node_next;
                }
                node = node_next.with_tag(0);
                if node == tail {
                    break;
                }
                node_next = unsafe { node.deref() }.next.load(Ordering::Acquire, guard);
                if node_next.tag() == 0 && unsafe { node.deref() }.value == *value {
                    break;
                }
            }
            let right = node;

            if left_next == right {
                // Adjacent already; only return if right has not been
                // marked in the meantime.
                if right != tail
                    && unsafe { right.deref() }.next.load(Ordering::Acquire, guard).tag() != 0
                {
                    continue;
                }
                return (left, right);
            }

            // Snip the marked run between left and right.
            if unsafe { left.deref() }
                .next
                .compare_exchange(left_next, right, Ordering::AcqRel, Ordering::Acquire, guard)
                .is_ok()
            {
                unsafe {
                    let mut cut = left_next;
                    while cut.with_tag(0) != right {
                        let succ = cut.deref().next.load(Ordering::Relaxed, guard);
                        guard.defer_destroy(cut.with_tag(0));
                        cut = succ.with_tag(0);
                    }
                }
                if right != tail
                    && unsafe { right.deref() }.next.load(Ordering::Acquire, guard).tag() != 0
                {
                    continue;
                }
                return (left, right);
            }
        }
    }

    /// Values head to tail, skipping marked nodes, serialized through the
    /// render lock so two snapshots cannot interleave.
    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        let _serial = self.render.lock();
        let guard = &epoch::pin();
        let tail = self.tail.load(Ordering::Relaxed, guard);
        let head = self.head.load(Ordering::Relaxed, guard);
        let mut values = Vec::new();
        let mut node = unsafe { head.deref() }
            .next
            .load(Ordering::Acquire, guard)
            .with_tag(0);
        while node != tail {
            let next = unsafe { node.deref() }.next.load(Ordering::Acquire, guard);
            if next.tag() == 0 {
                values.push(unsafe { node.deref() }.value.clone());
            }
            node = next.with_tag(0);
        }
        values
    }
}

impl<T: PartialEq> ConcurrentSet<T> for LockFreeList<T> {
    /// Pushes at `head.next`; retries the CAS until it lands, so it always
    /// succeeds.
    fn insert(&self, value: T) -> bool {
        let guard = &epoch::pin();
        let head = self.head.load(Ordering::Relaxed, guard);
        let mut node = Owned::new(Node {
            value,
            next: Atomic::null(),
        });
        loop {
            let first = unsafe { head.deref() }.next.load(Ordering::Acquire, guard);
            node.next.store(first, Ordering::Relaxed);
            match unsafe { head.deref() }.next.compare_exchange(
                first,
                node,
                Ordering::Release,
                Ordering::Relaxed,
                guard,
            ) {
                Ok(_) => {
                    self.size.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                Err(e) => node = e.new,
            }
        }
    }

    fn insert_unique(&self, value: T) -> bool {
        let guard = &epoch::pin();
        let tail = self.tail.load(Ordering::Relaxed, guard);
        let mut node = Owned::new(Node {
            value,
            next: Atomic::null(),
        });
        loop {
            let (left, right) = self.search(&node.value, guard);
            if right != tail {
                // Already present; dropping the owned node frees the
                // speculative allocation.
                return false;
            }
            node.next.store(right, Ordering::Relaxed);
            match unsafe { left.deref() }.next.compare_exchange(
                right,
                node,
                Ordering::Release,
                Ordering::Relaxed,
                guard,
            ) {
                Ok(_) => {
                    self.size.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                Err(e) => node = e.new,
            }
        }
    }

    fn remove(&self, value: &T) -> bool {
        let guard = &epoch::pin();
        let tail = self.tail.load(Ordering::Relaxed, guard);
        loop {
            let (left, right) = self.search(value, guard);
            if right == tail || unsafe { right.deref() }.value != *value {
                return false;
            }
            let right_next = unsafe { right.deref() }.next.load(Ordering::Acquire, guard);
            if right_next.tag() != 0 {
                // Another remover marked it first; find the next candidate.
                continue;
            }
            // The mark CAS is the logical deletion and the linearization
            // point; the counter moves here, not at the unlink.
            if unsafe { right.deref() }
                .next
                .compare_exchange(
                    right_next,
                    right_next.with_tag(1),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                    guard,
                )
                .is_err()
            {
                continue;
            }
            self.size.fetch_sub(1, Ordering::Relaxed);
            match unsafe { left.deref() }.next.compare_exchange(
                right,
                right_next,
                Ordering::AcqRel,
                Ordering::Relaxed,
                guard,
            ) {
                Ok(_) => unsafe { guard.defer_destroy(right) },
                // Lost the unlink race; a follow-up search splices it out.
                Err(_) => {
                    let _ = self.search(value, guard);
                }
            }
            return true;
        }
    }

    /// Reports a node as present only if its value matches and its `next`
    /// is unmarked at the moment of the load. Does not help with cleanup.
    fn contains(&self, value: &T) -> bool {
        let guard = &epoch::pin();
        let tail = self.tail.load(Ordering::Relaxed, guard);
        let head = self.head.load(Ordering::Relaxed, guard);
        let mut node = unsafe { head.deref() }
            .next
            .load(Ordering::Acquire, guard)
            .with_tag(0);
        while node != tail {
            let next = unsafe { node.deref() }.next.load(Ordering::Acquire, guard);
            if next.tag() == 0 && unsafe { node.deref() }.value == *value {
                return true;
            }
            node = next.with_tag(0);
        }
        false
    }

    fn find(&self, value: &T) -> Option<T>
    where
        T: Clone,
    {
        let guard = &epoch::pin();
        let tail = self.tail.load(Ordering::Relaxed, guard);
        let head = self.head.load(Ordering::Relaxed, guard);
        let mut node = unsafe { head.deref() }
            .next
            .load(Ordering::Acquire, guard)
            .with_tag(0);
        while node != tail {
            let next = unsafe { node.deref() }.next.load(Ordering::Acquire, guard);
            if next.tag() == 0 && unsafe { node.deref() }.value == *value {
                return Some(unsafe { node.deref() }.value.clone());
            }
            node = next.with_tag(0);
        }
        None
    }

    /// Converges to the reachable-node count when quiescent; under
    /// concurrent mutation it trails the structure.
    fn len(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }
}

impl<T: std::fmt::Debug + Clone> std::fmt::Debug for LockFreeList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockFreeList").field("values", &self.to_vec()).finish()
    }
}

impl<T: PartialEq> PartialEq for LockFreeList<T> {
    /// Size check first, then both render locks in address order and a
    /// lockstep walk that skips marked nodes on either side.
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
        let _serial_a = first.render.lock();
        let _serial_b = second.render.lock();
        let guard = &epoch::pin();
        let tail_a = first.tail.load(Ordering::Relaxed, guard);
        let tail_b = second.tail.load(Ordering::Relaxed, guard);
        let mut a = unsafe { first.head.load(Ordering::Relaxed, guard).deref() }
            .next
            .load(Ordering::Acquire, guard)
            .with_tag(0);
        let mut b = unsafe { second.head.load(Ordering::Relaxed, guard).deref() }
            .next
            .load(Ordering::Acquire, guard)
            .with_tag(0);
        loop {
            // Skip logically deleted nodes on both sides.
            let next_a = loop {
                if a == tail_a {
                    break None;
                }
                let next = unsafe { a.deref() }.next.load(Ordering::Acquire, guard);
                if next.tag() == 0 {
                    break Some(next);
                }
                a = next.with_tag(0);
            };
            let next_b = loop {
                if b == tail_b {
                    break None;
                }
                let next = unsafe { b.deref() }.next.load(Ordering::Acquire, guard);
                if next.tag() == 0 {
                    break Some(next);
                }
                b = next.with_tag(0);
            };
            match (next_a, next_b) {
                (None, None) => return true,
                (Some(na), Some(nb)) => {
                    if unsafe { a.deref() }.value != unsafe { b.deref() }.value {
                        return false;
                    }
                    a = na.with_tag(0);
                    b = nb.with_tag(0);
                }
                _ => return false,
            }
        }
    }
}

impl<T> Drop for LockFreeList<T> {
    /// `&mut self` proves no reader is left, so the whole chain (marked
    /// nodes and sentinels included) is freed with an unprotected guard.
    fn drop(&mut self) {
        unsafe {
            let guard = epoch::unprotected();
            let mut node = self.head.load(Ordering::Relaxed, guard);
            while !node.is_null() {
                let next = node.deref().next.load(Ordering::Relaxed, guard);
                drop(node.into_owned());
                node = next.with_tag(0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_fresh_list_is_empty() {
        let list: LockFreeList<u64> = LockFreeList::new();
        assert_eq!(list.len(), 0);
        assert!(list.is_empty());
        assert!(!list.contains(&1));
        assert_eq!(list.to_vec(), Vec::<u64>::new());
    }

    #[test]
    fn test_insert_prepends() {
        let list = LockFreeList::new();
        assert!(list.insert(1));
        assert!(list.insert(2));
        assert!(list.insert(2));
        assert_eq!(list.to_vec(), vec![2, 2, 1]);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_insert_unique_frees_duplicate() {
        let list = LockFreeList::new();
        assert!(list.insert_unique(4));
        assert!(!list.insert_unique(4));
        assert_eq!(list.len(), 1);
        assert!(list.insert(1));
        assert!(!list.insert_unique(1));
        assert!(list.insert_unique(2));
        assert!(!list.insert_unique(2));
    }

    #[test]
    fn test_remove_head_position() {
        // 4 sits at the head after the inserts.
        let list = LockFreeList::new();
        for i in 1..=4 {
            list.insert(i);
        }
        assert!(list.remove(&4));
        assert_eq!(list.len(), 3);
        assert!(!list.contains(&4));
        assert!(list.contains(&1));
        assert!(list.contains(&2));
        assert!(list.contains(&3));
        assert!(list.insert_unique(4));
        assert_eq!(list.len(), 4);
        assert!(!list.insert_unique(4));
    }

    #[test]
    fn test_remove_middle_and_missing() {
        let list = LockFreeList::new();
        for i in 1..=5 {
            list.insert(i);
        }
        assert!(list.remove(&3));
        assert!(!list.remove(&3));
        assert!(!list.remove(&42));
        assert_eq!(list.to_vec(), vec![5, 4, 2, 1]);
        assert_eq!(list.len(), 4);
    }

    #[test]
    fn test_equality_skips_marked() {
        let a = LockFreeList::new();
        let b = LockFreeList::new();
        assert_eq!(a, b);
        for i in 0..6u64 {
            a.insert(i);
            b.insert(i);
        }
        assert_eq!(a, b);
        a.remove(&2);
        assert_ne!(a, b);
        b.remove(&2);
        assert_eq!(a, b);
    }

    #[test]
    fn test_concurrent_disjoint_ranges() {
        use crossbeam_utils::thread;
        use rand::seq::SliceRandom;
        use rand::SeedableRng;

        const PER_THREAD: u64 = 1500;
        let list = Arc::new(LockFreeList::new());
        thread::scope(|s| {
            for t in 0..4u64 {
                let list = list.clone();
                s.spawn(move |_| {
                    let mut rng = rand::rngs::StdRng::seed_from_u64(t);
                    let mut keys: Vec<u64> =
                        (t * PER_THREAD..(t + 1) * PER_THREAD).collect();
                    keys.shuffle(&mut rng);
                    for k in keys {
                        if k % 2 == 0 {
                            list.insert(k);
                        } else {
                            assert!(list.insert_unique(k));
                        }
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
                    let mut rng = rand::rngs::StdRng::seed_from_u64(t + 9);
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
        assert_eq!(list.len(), 0);
        assert!(list.is_empty());
    }

    #[test]
    fn test_contended_removes_target_same_keys() {
        use crossbeam_utils::thread;
        use std::sync::atomic::{AtomicUsize, Ordering};

        // Every key removed exactly once even when all threads race for it.
        const KEYS: u64 = 500;
        let list = Arc::new(LockFreeList::new());
        for k in 0..KEYS {
            list.insert_unique(k);
        }
        let removed = Arc::new(AtomicUsize::new(0));
        thread::scope(|s| {
            for _ in 0..4 {
                let list = list.clone();
                let removed = removed.clone();
                s.spawn(move |_| {
                    for k in 0..KEYS {
                        if list.remove(&k) {
                            removed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }
        })
        .unwrap();
        assert_eq!(removed.load(Ordering::Relaxed), KEYS as usize);
        assert!(list.is_empty());
        for k in 0..KEYS {
            assert!(!list.contains(&k));
        }
    }
}
