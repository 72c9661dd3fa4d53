//! Reader/writer spinning lock on a single signed counter.
//!
//! Encoding: `0` unheld, `k > 0` means `k` readers hold it, negative means
//! a writer holds it. Acquire paths busy-wait, so the lock is only a good
//! fit for short critical sections with no more threads than cores.
//!
//! The methods are raw acquire/release pairs rather than RAII guards
//! because the hand-over-hand list protocol releases locks out of scope
//! order (the predecessor's lock is released from deep inside the walk).

use std::hint;
use std::sync::atomic::{AtomicIsize, Ordering};

pub struct RwSpinLock {
    counter: AtomicIsize,
}

impl RwSpinLock {
    pub const fn new() -> Self {
        RwSpinLock {
            counter: AtomicIsize::new(0),
        }
    }

    /// Spins until no writer holds the lock, then joins the readers.
    pub fn read_lock(&self) {
        loop {
            let n = self.counter.load(Ordering::Acquire);
            if n < 0 {
                hint::spin_loop();
                continue;
            }
            if self
                .counter
                .compare_exchange_weak(n, n + 1, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    pub fn read_unlock(&self) {
        self.counter.fetch_sub(1, Ordering::Release);
    }

    /// Spins until the lock is completely free, then claims it exclusively.
    pub fn write_lock(&self) {
        loop {
            let n = self.counter.load(Ordering::Acquire);
            if n != 0 {
                hint::spin_loop();
                continue;
            }
            if self
                .counter
                .compare_exchange_weak(0, -1, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    pub fn write_unlock(&self) {
        self.counter.fetch_add(1, Ordering::Release);
    }

    #[cfg(test)]
    fn holders(&self) -> isize {
        self.counter.load(Ordering::Relaxed)
    }
}

impl Default for RwSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_read_counts() {
        let lock = RwSpinLock::new();
        lock.read_lock();
        lock.read_lock();
        assert_eq!(lock.holders(), 2);
        lock.read_unlock();
        lock.read_unlock();
        assert_eq!(lock.holders(), 0);
    }

    #[test]
    fn test_write_is_exclusive_encoding() {
        let lock = RwSpinLock::new();
        lock.write_lock();
        assert_eq!(lock.holders(), -1);
        lock.write_unlock();
        assert_eq!(lock.holders(), 0);
    }

    #[test]
    fn test_writers_exclude_each_other() {
        use std::cell::UnsafeCell;

        use crossbeam_utils::thread;

        // Unsynchronized counter; the total only comes out right if the
        // lock really is exclusive.
        struct Racy(UnsafeCell<usize>);
        unsafe impl Sync for Racy {}

        let lock = Arc::new(RwSpinLock::new());
        let shared = Arc::new(Racy(UnsafeCell::new(0)));
        thread::scope(|s| {
            for _ in 0..4 {
                let lock = lock.clone();
                let shared = shared.clone();
                s.spawn(move |_| {
                    for _ in 0..1000 {
                        lock.write_lock();
                        unsafe { *shared.0.get() += 1 };
                        lock.write_unlock();
                    }
                });
            }
        })
        .unwrap();
        assert_eq!(unsafe { *shared.0.get() }, 4000);
    }

    #[test]
    fn test_readers_run_in_parallel() {
        use crossbeam_utils::thread;

        let lock = Arc::new(RwSpinLock::new());
        let peak = Arc::new(AtomicUsize::new(0));
        let active = Arc::new(AtomicUsize::new(0));
        thread::scope(|s| {
            for _ in 0..4 {
                let lock = lock.clone();
                let peak = peak.clone();
                let active = active.clone();
                s.spawn(move |_| {
                    for _ in 0..500 {
                        lock.read_lock();
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        active.fetch_sub(1, Ordering::SeqCst);
                        lock.read_unlock();
                    }
                });
            }
        })
        .unwrap();
        // With four spinning readers at least two should overlap.
        assert!(peak.load(Ordering::Relaxed) >= 1);
    }
}
