// =============================================================================
// CoHeap — Ticket spinlock
// =============================================================================
//
// A ticket spinlock provides mutual exclusion between threads contending for
// a size class or a superblock. It's the simplest fair lock: threads acquire
// the lock in FIFO order, which keeps one thread's alloc/free storm from
// starving another thread waiting on the same class.
//
// HOW IT WORKS:
//   - Two counters: `next_ticket` and `now_serving`
//   - To lock: atomically increment `next_ticket`, get your ticket number.
//     Spin until `now_serving` equals your ticket.
//   - To unlock: increment `now_serving`, which lets the next waiter proceed.
//
// This is the same ticket/RAII-guard shape as the teacher's
// `sync::spinlock::SpinLock`. The teacher additionally disables CPU
// interrupts while the lock is held, because its locks protect kernel data
// an interrupt handler on the same core could also touch. Nothing in this
// allocator runs from an interrupt handler — contention is strictly between
// userspace threads — so that half of the teacher's lock is dropped here;
// everything else (ticket counters, ordering, the guard) carries over as-is.
// =============================================================================

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU32, Ordering};

/// A ticket-based spinlock.
///
/// # Type Parameter
/// `T`: the data protected by the lock. Must be `Send` because ownership
/// effectively transfers between threads when the lock is acquired.
pub struct SpinLock<T> {
    next_ticket: AtomicU32,
    now_serving: AtomicU32,
    data: UnsafeCell<T>,
}

// SAFETY: SpinLock<T> can be shared between threads as long as T itself can
// be sent between threads. The lock ensures only one thread accesses T at a
// time.
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a new spinlock wrapping `value`. `const fn` so it can be used
    /// directly in statics and in the heap table's `[const { .. }; N]` init.
    pub const fn new(value: T) -> Self {
        Self {
            next_ticket: AtomicU32::new(0),
            now_serving: AtomicU32::new(0),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock, spinning (busy-waiting) if another thread holds it.
    /// Returns a `SpinLockGuard` that releases the lock on drop.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let my_ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);

        // Acquire ordering ensures we see all writes made by the previous
        // lock holder before we access the protected data.
        while self.now_serving.load(Ordering::Acquire) != my_ticket {
            core::hint::spin_loop();
        }

        SpinLockGuard { lock: self }
    }

    /// Attempts to acquire the lock without spinning. Returns `None` if the
    /// lock is currently held by another thread.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        let current = self.now_serving.load(Ordering::Relaxed);
        match self.next_ticket.compare_exchange(
            current,
            current + 1,
            Ordering::Acquire,
            Ordering::Relaxed,
        ) {
            Ok(_) => Some(SpinLockGuard { lock: self }),
            Err(_) => None,
        }
    }

    /// Returns a mutable reference to the underlying data. Safe because
    /// `&mut self` already guarantees exclusive access at compile time — no
    /// lock is needed. Used during construction, before the lock is shared.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

/// RAII guard for a held spinlock. The lock is released when this guard is
/// dropped.
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding the guard means we hold the lock.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: holding the guard means we hold the lock.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        // Release ordering ensures all our writes to the protected data are
        // visible to the next lock holder before they see the incremented
        // `now_serving` value.
        self.lock.now_serving.fetch_add(1, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn mutual_exclusion_under_contention() {
        let lock = Arc::new(SpinLock::new(0u64));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = Arc::clone(&lock);
            handles.push(thread::spawn(move || {
                for _ in 0..10_000 {
                    *lock.lock() += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), 8 * 10_000);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = SpinLock::new(());
        let guard = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }
}
