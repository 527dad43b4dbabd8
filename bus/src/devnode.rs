//! Character-device node registration (spec.md §1: "the character-device
//! node registration with the host OS" is an external collaborator).
//!
//! The core's only contract with it is registering a world-accessible
//! control node at namespace creation and unregistering it at
//! disconnect (spec.md §4.2). Modeled as a trait so the real host-OS
//! binding and an in-memory test double both satisfy the same contract.

use alloc::string::String;
use alloc::vec::Vec;

use slopos_lib::ticket_lock::TicketMutex;

use crate::error::{BusError, BusResult};

/// A registered control-device node. Opaque to callers beyond
/// `unregister`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceHandle(pub u64);

/// The contract the core requires of the host's device-node registrar.
pub trait ControlDeviceRegistry: Send + Sync {
    /// Registers a control node at `devpath` with the given file mode,
    /// returning a handle used to unregister it later.
    fn register(&self, devpath: &str, mode: u32) -> BusResult<DeviceHandle>;

    /// Unregisters a previously-registered node. Idempotent: calling
    /// this twice on the same handle must not panic, mirroring
    /// `disconnect`'s own idempotence (spec.md §4.1).
    fn unregister(&self, handle: DeviceHandle);
}

struct Entry {
    handle: DeviceHandle,
    devpath: String,
    mode: u32,
}

/// An in-memory stand-in for the host's device-node registrar, used by
/// tests and by the integration scenario suite. Mirrors the devfs
/// registration pattern of a node table guarded by a single lock.
pub struct InMemoryControlDeviceRegistry {
    entries: TicketMutex<Vec<Entry>>,
    next_handle: TicketMutex<u64>,
}

impl InMemoryControlDeviceRegistry {
    pub fn new() -> Self {
        Self {
            entries: TicketMutex::new(Vec::new()),
            next_handle: TicketMutex::new(1),
        }
    }

    /// Number of currently-registered nodes, for test assertions.
    pub fn registered_count(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_registered(&self, devpath: &str) -> bool {
        self.entries.lock().iter().any(|e| e.devpath == devpath)
    }
}

impl Default for InMemoryControlDeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlDeviceRegistry for InMemoryControlDeviceRegistry {
    fn register(&self, devpath: &str, mode: u32) -> BusResult<DeviceHandle> {
        if self.is_registered(devpath) {
            return Err(BusError::EEXIST);
        }
        let mut next = self.next_handle.lock();
        let handle = DeviceHandle(*next);
        *next += 1;
        drop(next);
        self.entries.lock().push(Entry {
            handle,
            devpath: String::from(devpath),
            mode,
        });
        Ok(handle)
    }

    fn unregister(&self, handle: DeviceHandle) {
        self.entries.lock().retain(|e| e.handle != handle);
    }
}

#[cfg(test)]
extern crate std;
