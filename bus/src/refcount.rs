//! Uniform acquire/release/disconnect protocol (spec.md §4.1).
//!
//! Every long-lived object in the graph (`Namespace`, `Bus`, `Endpoint`,
//! `Connection`) implements [`Lifecycle`]. [`Arc`] already gives us safe,
//! race-free memory reclamation, but the bus graph has child→parent
//! *and* parent→child strong edges (spec.md §9, "Cyclic-looking but not
//! cyclic graph") — a parent's list holds a strong ref to each child, and
//! each child holds a strong ref back to its parent. Left alone that is
//! a genuine reference cycle. [`disconnect`] is what breaks it: it
//! unlinks the object from its parent's list under the parent's lock,
//! dropping the parent's half of the cycle, and then releases the
//! object's own children the same way. Only after that walk completes
//! can the object's last `Arc` clone actually reach a strong count of
//! zero and free the allocation.
//!
//! A logical refcount (separate from `Arc`'s internal strong count)
//! models the kernel object's kref: list membership and every acquired
//! handle each hold one unit. [`release`] is the only place that ever
//! triggers [`disconnect`] as a side effect of the count reaching zero;
//! callers may also disconnect an object directly (administrative
//! teardown) while other handles remain live, matching spec.md's
//! "external references to remain valid for readout during teardown".

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Logical kernel-object refcount, decoupled from `Arc`'s own strong
/// count. One unit is held by whichever list currently contains the
/// object (its parent's child list) and one unit by every acquired
/// handle.
#[derive(Debug, Default)]
pub struct Refcount(AtomicU32);

impl Refcount {
    #[inline]
    pub const fn new(initial: u32) -> Self {
        Self(AtomicU32::new(initial))
    }

    #[inline]
    pub fn bump(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrement and return the value *before* decrementing, matching
    /// the usual kref_put convention (caller checks `== 1` for "that was
    /// the last reference").
    #[inline]
    pub fn drop_one(&self) -> u32 {
        self.0.fetch_sub(1, Ordering::AcqRel)
    }

    #[inline]
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A disconnect-once flag, shared by every object kind.
#[derive(Debug, Default)]
pub struct DisconnectFlag(AtomicBool);

impl DisconnectFlag {
    #[inline]
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Atomically transition false -> true. Returns `true` if this call
    /// won the race (i.e. the object was not already disconnected).
    #[inline]
    fn set_if_clear(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }
}

/// The uniform lifecycle contract every bus-graph object implements.
pub trait Lifecycle {
    fn refcount(&self) -> &Refcount;
    fn disconnect_flag(&self) -> &DisconnectFlag;

    /// Remove `self` from the parent's child list, dropping the
    /// parent's strong reference to it. Idempotent callers must only
    /// invoke this once (guaranteed by [`disconnect`]'s flag check).
    fn unlink_from_parent(&self);

    /// Release every child this object owns (a snapshot is taken so
    /// concurrent lookups against the live list are never observed
    /// half-torn-down).
    fn release_children(&self);

    /// Emit the one log line this disconnect produces.
    fn log_disconnected(&self);
}

/// `acquire(x)`: bump the logical refcount and return a cloned handle.
#[inline]
pub fn acquire<T: Lifecycle>(x: &Arc<T>) -> Arc<T> {
    x.refcount().bump();
    Arc::clone(x)
}

/// `disconnect(x)`: idempotent teardown. A second call on an
/// already-disconnected object is a no-op, matching spec.md §4.1.
pub fn disconnect<T: Lifecycle>(x: &Arc<T>) {
    if !x.disconnect_flag().set_if_clear() {
        return;
    }
    x.unlink_from_parent();
    x.release_children();
    x.log_disconnected();
}

/// `release(x)`: drop one unit of the logical refcount; if that was the
/// last unit, disconnect (if not already) before the `Arc` itself is
/// dropped at the end of this call.
pub fn release<T: Lifecycle>(x: Arc<T>) {
    if x.refcount().drop_one() == 1 {
        disconnect(&x);
    }
}

#[cfg(test)]
extern crate std;

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    struct Leaf {
        refcount: Refcount,
        disconnected: DisconnectFlag,
        unlink_calls: Cell<u32>,
        disconnect_calls: Cell<u32>,
    }

    // Single-threaded test double: Cell<u32> is fine since Lifecycle
    // here is only exercised from one thread.
    unsafe impl Sync for Leaf {}

    impl Lifecycle for Leaf {
        fn refcount(&self) -> &Refcount {
            &self.refcount
        }
        fn disconnect_flag(&self) -> &DisconnectFlag {
            &self.disconnected
        }
        fn unlink_from_parent(&self) {
            self.unlink_calls.set(self.unlink_calls.get() + 1);
        }
        fn release_children(&self) {}
        fn log_disconnected(&self) {
            self.disconnect_calls.set(self.disconnect_calls.get() + 1);
        }
    }

    fn new_leaf() -> Arc<Leaf> {
        Arc::new(Leaf {
            refcount: Refcount::new(1),
            disconnected: DisconnectFlag::new(),
            unlink_calls: Cell::new(0),
            disconnect_calls: Cell::new(0),
        })
    }

    #[test]
    fn disconnect_runs_exactly_once() {
        let leaf = new_leaf();
        disconnect(&leaf);
        disconnect(&leaf);
        disconnect(&leaf);
        assert_eq!(leaf.unlink_calls.get(), 1);
        assert_eq!(leaf.disconnect_calls.get(), 1);
        assert!(leaf.disconnect_flag().is_set());
    }

    #[test]
    fn release_disconnects_only_on_last_unit() {
        let leaf = new_leaf();
        let extra = acquire(&leaf);
        assert_eq!(leaf.refcount().get(), 2);

        release(extra);
        assert_eq!(leaf.unlink_calls.get(), 0, "one unit remains, no teardown yet");

        release(leaf.clone());
        assert_eq!(leaf.unlink_calls.get(), 1);
    }

    #[test]
    fn acquire_returns_independent_clone() {
        let leaf = new_leaf();
        let other = acquire(&leaf);
        assert!(Arc::ptr_eq(&leaf, &other));
        assert_eq!(leaf.refcount().get(), 2);
    }
}
