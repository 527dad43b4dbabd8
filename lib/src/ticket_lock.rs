//! Ticket-based mutex and reader-writer lock.
//!
//! These are the broker's own lock primitives rather than an external spin
//! crate, matching the lock-ordering discipline the bus object graph
//! depends on: global subsystem lock, then namespace lock, then bus lock,
//! then connection lock, always acquired outermost-first.
//!
//! [`TicketMutex`] is a ticket lock for FIFO fairness under contention:
//! each acquirer takes a monotonically-increasing ticket and spins until
//! `now_serving` matches it, so waiters are served in arrival order rather
//! than whichever spinner happens to win the next CAS race.
//!
//! [`TicketRwLock`] is a writer-preferring reader-writer lock: once a
//! writer is queued, new readers yield so continuous read traffic cannot
//! starve it.
//!
//! Unlike the hardware-facing variant these locks do not touch interrupt
//! state — callers running under real interrupt contexts are expected to
//! mask interrupts themselves before taking one of these locks.

use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU16, AtomicU32, Ordering};

/// Mutex built on a ticket lock for FIFO fairness.
///
/// Supports poisoning semantics: after a caller force-unlocks via
/// [`TicketMutex::poison_unlock`] (e.g. during panic recovery), the mutex is
/// marked poisoned. Callers can check [`TicketMutex::is_poisoned`] to decide
/// whether the protected data needs reinitialization before further use.
pub struct TicketMutex<T> {
    /// Monotonically-increasing ticket counter. Each `lock()` call takes the
    /// next ticket via `fetch_add(1)`. Wraps at `u16::MAX` — equality checks
    /// handle wrap-around correctly.
    next_ticket: AtomicU16,
    /// The ticket currently being served. Incremented on unlock. A waiter
    /// spins until `now_serving == my_ticket`.
    now_serving: AtomicU16,
    poisoned: AtomicBool,
    data: UnsafeCell<T>,
}

// SAFETY: TicketMutex provides exclusive access through ticket-lock
// acquisition, making it safe to share across threads.
unsafe impl<T: Send> Send for TicketMutex<T> {}
unsafe impl<T: Send> Sync for TicketMutex<T> {}

pub struct TicketMutexGuard<'a, T> {
    mutex: &'a TicketMutex<T>,
}

impl<T> TicketMutex<T> {
    #[inline]
    pub const fn new(data: T) -> Self {
        Self {
            next_ticket: AtomicU16::new(0),
            now_serving: AtomicU16::new(0),
            poisoned: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    /// Force unlock the mutex without proper guard handling.
    ///
    /// Advances `now_serving` to match `next_ticket`, releasing the lock and
    /// unblocking any waiters in FIFO order.
    ///
    /// # Safety
    /// Only safe to call when no code is currently executing with this lock
    /// held and the caller has another way to know that (panic recovery,
    /// single-threaded teardown). Prefer [`Self::poison_unlock`] which also
    /// marks the mutex poisoned.
    #[inline]
    pub unsafe fn force_unlock(&self) {
        self.now_serving
            .store(self.next_ticket.load(Ordering::Relaxed), Ordering::Release);
    }

    /// Force unlock the mutex AND mark it as poisoned.
    ///
    /// # Safety
    /// Same requirements as [`Self::force_unlock`].
    #[inline]
    pub unsafe fn poison_unlock(&self) {
        self.poisoned.store(true, Ordering::Release);
        self.now_serving
            .store(self.next_ticket.load(Ordering::Relaxed), Ordering::Release);
    }

    /// Returns true if this mutex was force-unlocked during recovery.
    #[inline]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// Clear the poisoned state after the protected data has been
    /// reinitialized. Only call after verifying or restoring invariants.
    #[inline]
    pub fn clear_poison(&self) {
        self.poisoned.store(false, Ordering::Release);
    }

    /// Check if the lock is currently held (or has waiters).
    #[inline]
    pub fn is_locked(&self) -> bool {
        let next = self.next_ticket.load(Ordering::Relaxed);
        let serving = self.now_serving.load(Ordering::Relaxed);
        next != serving
    }

    #[inline]
    pub fn lock(&self) -> TicketMutexGuard<'_, T> {
        // fetch_add wraps at u16::MAX -> 0; equality checks below are
        // wrap-safe so this remains correct after any number of acquisitions.
        let my_ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);

        loop {
            let serving = self.now_serving.load(Ordering::Acquire);
            if serving == my_ticket {
                break;
            }
            // Proportional backoff: spin more the further our ticket is from
            // being served, capped to avoid a single waiter hogging the bus.
            let distance = my_ticket.wrapping_sub(serving) as u32;
            for _ in 0..distance.min(64) {
                spin_loop();
            }
        }

        TicketMutexGuard { mutex: self }
    }

    #[inline]
    pub fn try_lock(&self) -> Option<TicketMutexGuard<'_, T>> {
        let current = self.now_serving.load(Ordering::Relaxed);
        if self
            .next_ticket
            .compare_exchange(
                current,
                current.wrapping_add(1),
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_ok()
        {
            Some(TicketMutexGuard { mutex: self })
        } else {
            None
        }
    }
}

impl<'a, T> Deref for TicketMutexGuard<'a, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<'a, T> DerefMut for TicketMutexGuard<'a, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<'a, T> Drop for TicketMutexGuard<'a, T> {
    #[inline]
    fn drop(&mut self) {
        // Release ordering makes our writes visible to the next acquirer.
        self.mutex.now_serving.fetch_add(1, Ordering::Release);
    }
}

// =============================================================================
// TicketRwLock - writer-preferring reader-writer lock
// =============================================================================

/// Multiple readers can hold the lock simultaneously, but writers get
/// exclusive access, and queued writers stop new readers from joining so
/// continuous read traffic cannot starve them.
pub struct TicketRwLock<T> {
    /// State: 0 = unlocked, -1 = write-locked, >0 = number of readers
    state: AtomicI32,
    /// Number of writers waiting. When > 0, new readers yield.
    writer_waiting: AtomicU32,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for TicketRwLock<T> {}
unsafe impl<T: Send + Sync> Sync for TicketRwLock<T> {}

pub struct TicketRwLockReadGuard<'a, T> {
    lock: &'a TicketRwLock<T>,
}

pub struct TicketRwLockWriteGuard<'a, T> {
    lock: &'a TicketRwLock<T>,
}

impl<T> TicketRwLock<T> {
    #[inline]
    pub const fn new(data: T) -> Self {
        Self {
            state: AtomicI32::new(0),
            writer_waiting: AtomicU32::new(0),
            data: UnsafeCell::new(data),
        }
    }

    /// Acquire read access. Blocks while a writer holds the lock or one is
    /// queued (writer preference).
    #[inline]
    pub fn read(&self) -> TicketRwLockReadGuard<'_, T> {
        loop {
            let state = self.state.load(Ordering::Relaxed);
            if state >= 0 && self.writer_waiting.load(Ordering::Relaxed) == 0 {
                if self
                    .state
                    .compare_exchange_weak(state, state + 1, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    return TicketRwLockReadGuard { lock: self };
                }
            }
            spin_loop();
        }
    }

    /// Try to acquire read access without blocking.
    #[inline]
    pub fn try_read(&self) -> Option<TicketRwLockReadGuard<'_, T>> {
        let state = self.state.load(Ordering::Relaxed);
        if state >= 0 && self.writer_waiting.load(Ordering::Relaxed) == 0 {
            if self
                .state
                .compare_exchange(state, state + 1, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return Some(TicketRwLockReadGuard { lock: self });
            }
        }
        None
    }

    /// Acquire write access. Blocks until exclusive access is available.
    #[inline]
    pub fn write(&self) -> TicketRwLockWriteGuard<'_, T> {
        self.writer_waiting.fetch_add(1, Ordering::Relaxed);
        loop {
            if self
                .state
                .compare_exchange_weak(0, -1, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                self.writer_waiting.fetch_sub(1, Ordering::Relaxed);
                return TicketRwLockWriteGuard { lock: self };
            }
            spin_loop();
        }
    }

    /// Try to acquire write access without blocking.
    #[inline]
    pub fn try_write(&self) -> Option<TicketRwLockWriteGuard<'_, T>> {
        if self
            .state
            .compare_exchange(0, -1, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            return Some(TicketRwLockWriteGuard { lock: self });
        }
        None
    }
}

impl<'a, T> Deref for TicketRwLockReadGuard<'a, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> Drop for TicketRwLockReadGuard<'a, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.state.fetch_sub(1, Ordering::Release);
    }
}

impl<'a, T> Deref for TicketRwLockWriteGuard<'a, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> DerefMut for TicketRwLockWriteGuard<'a, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> Drop for TicketRwLockWriteGuard<'a, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.state.store(0, Ordering::Release);
    }
}

#[cfg(test)]
extern crate std;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutex_mutual_exclusion() {
        let m = TicketMutex::new(0u32);
        {
            let mut g = m.lock();
            *g += 1;
        }
        assert_eq!(*m.lock(), 1);
        assert!(!m.is_locked());
    }

    #[test]
    fn mutex_try_lock_fails_while_held() {
        let m = TicketMutex::new(0u32);
        let _g = m.lock();
        assert!(m.try_lock().is_none());
    }

    #[test]
    fn mutex_poison_roundtrip() {
        let m = TicketMutex::new(0u32);
        assert!(!m.is_poisoned());
        unsafe { m.poison_unlock() };
        assert!(m.is_poisoned());
        m.clear_poison();
        assert!(!m.is_poisoned());
    }

    #[test]
    fn rwlock_multiple_readers() {
        let l = TicketRwLock::new(5u32);
        let r1 = l.read();
        let r2 = l.read();
        assert_eq!(*r1, 5);
        assert_eq!(*r2, 5);
        drop(r1);
        drop(r2);
        assert!(l.try_write().is_some());
    }

    #[test]
    fn rwlock_writer_excludes_readers() {
        let l = TicketRwLock::new(5u32);
        let mut w = l.write();
        *w = 6;
        assert!(l.try_read().is_none());
        drop(w);
        assert_eq!(*l.read(), 6);
    }
}
