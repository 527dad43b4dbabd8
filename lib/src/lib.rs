#![no_std]
#![allow(unsafe_op_in_unsafe_fn)]

//! Shared kernel-style primitives used across the bus broker.
//!
//! This crate carries the small, hardware-independent pieces of the
//! original kernel support library: alignment helpers, a one-shot
//! initialization cell, a ticket-based mutex/rwlock pair, and the klog
//! logging facade. Everything here is `no_std` and allocation-free so it
//! can be pulled into any subsystem without dragging in a scheduler or a
//! driver stack.

pub mod alignment;
pub mod klog;
pub mod once_lock;
pub mod ticket_lock;

#[doc(hidden)]
pub use paste;

pub use alignment::{align_down_u64, align_down_usize, align_up_u64, align_up_usize};
pub use alignment::{align_down_usize as align_down, align_up_usize as align_up};
pub use klog::{
    KlogLevel, klog_get_level, klog_init, klog_is_enabled, klog_register_backend, klog_set_level,
};
pub use once_lock::OnceLock;
pub use ticket_lock::{TicketMutex, TicketMutexGuard, TicketRwLock, TicketRwLockReadGuard, TicketRwLockWriteGuard};
