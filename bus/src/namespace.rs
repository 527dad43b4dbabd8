//! Isolation domains and their global registry (spec.md §3 "Namespace",
//! §4.2 "NamespaceManager").
//!
//! Namespaces nest (every non-root namespace names a parent), but the
//! authoritative list used for both lookup and teardown is the single
//! global, flat list the [`NamespaceManager`] owns under its subsystem
//! lock (spec.md §5 tier 1) — not a per-namespace child list. A
//! namespace therefore holds a strong back-reference to the manager's
//! shared state (the "parent" in the [`Lifecycle`] sense), mirroring
//! the same cyclic-looking-but-not-cyclic pattern used one level down
//! for bus/endpoint/connection (spec.md §9).

use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use slopos_lib::{klog_info, klog_warn};
use slopos_lib::ticket_lock::TicketMutex;

use crate::bus::Bus;
use crate::devnode::{ControlDeviceRegistry, DeviceHandle};
use crate::error::{BusError, BusResult};
use crate::refcount::{self, DisconnectFlag, Lifecycle, Refcount};

/// Well-known major for the root namespace's control device (spec.md
/// §4.2: "a fixed well-known value for the root").
pub const ROOT_MAJOR: u32 = 1;

/// Dynamic major free-list allocator (spec.md §4.2: "dynamic
/// otherwise"). Grounded in the original's simple bitmap/free-list
/// device-major allocation in `ns.c`.
struct MajorAllocator {
    next: u32,
    freed: Vec<u32>,
}

impl MajorAllocator {
    fn new(start: u32) -> Self {
        Self {
            next: start,
            freed: Vec::new(),
        }
    }

    fn alloc(&mut self) -> u32 {
        if let Some(major) = self.freed.pop() {
            return major;
        }
        let major = self.next;
        self.next += 1;
        major
    }

    fn free(&mut self, major: u32) {
        self.freed.push(major);
    }
}

struct NamespaceInner {
    bus_list: Vec<Arc<Bus>>,
    next_bus_id: u64,
}

/// The process-wide global state (spec.md §9 "Global state"): the
/// namespace list and the major-id allocator, guarded by one subsystem
/// lock taken only briefly.
struct NamespaceManagerShared {
    list: TicketMutex<Vec<Arc<Namespace>>>,
    majors: TicketMutex<MajorAllocator>,
    next_ns_id: TicketMutex<u64>,
    registry: Arc<dyn ControlDeviceRegistry>,
}

/// Global registry of namespaces (spec.md §4.2).
#[derive(Clone)]
pub struct NamespaceManager(Arc<NamespaceManagerShared>);

impl NamespaceManager {
    /// Constructs the process-wide manager. Hosts call this exactly
    /// once at broker startup (spec.md §2.1 "Construction contract"),
    /// typically behind a `slopos_lib::once_lock::OnceLock`.
    pub fn new(registry: Arc<dyn ControlDeviceRegistry>) -> Self {
        Self(Arc::new(NamespaceManagerShared {
            list: TicketMutex::new(Vec::new()),
            majors: TicketMutex::new(MajorAllocator::new(ROOT_MAJOR + 1)),
            next_ns_id: TicketMutex::new(0),
            registry,
        }))
    }

    /// `ns_new(parent, name, mode) -> ns | err` (spec.md §4.2).
    pub fn ns_new(
        &self,
        parent: Option<&Arc<Namespace>>,
        name: Option<&str>,
        mode: u32,
    ) -> BusResult<Arc<Namespace>> {
        // Precondition: (parent == null) XOR (name != null).
        if parent.is_none() != name.is_none() {
            klog_warn!("ns_new: root must be nameless, children must be named");
            return Err(BusError::EINVAL);
        }

        if let (Some(parent), Some(name)) = (parent, name) {
            if self.find_live(Some(parent), name).is_some() {
                klog_warn!("ns_new: ({}, {}) already exists", parent.id, name);
                return Err(BusError::EEXIST);
            }
        } else if self.find_live(None, "").is_some() {
            // Root is unique too: a second nameless namespace would
            // collide on (None, None).
            return Err(BusError::EEXIST);
        }

        let major = if parent.is_none() {
            ROOT_MAJOR
        } else {
            self.0.majors.lock().alloc()
        };

        let devpath = match (parent, name) {
            (None, None) => String::from("kdbus"),
            (Some(p), Some(n)) => format!("kdbus/ns/{}/{}", p.devpath, n),
            _ => unreachable!("XOR precondition checked above"),
        };

        let registration = self.0.registry.register(&devpath, 0o666);
        let control_device = match registration {
            Ok(handle) => Some(handle),
            Err(err) => {
                if parent.is_some() {
                    self.0.majors.lock().free(major);
                }
                klog_warn!("ns_new: control device registration failed for '{}'", devpath);
                return Err(err);
            }
        };

        let mut id_guard = self.0.next_ns_id.lock();
        let id = *id_guard;
        *id_guard += 1;
        drop(id_guard);

        let ns = Arc::new(Namespace {
            id,
            name: name.map(String::from),
            devpath,
            parent: parent.map(Arc::clone),
            major,
            control_device,
            manager: Arc::clone(&self.0),
            inner: TicketMutex::new(NamespaceInner {
                bus_list: Vec::new(),
                next_bus_id: 1,
            }),
            refcount: Refcount::new(1),
            disconnected: DisconnectFlag::new(),
        });

        self.0.list.lock().push(Arc::clone(&ns));
        klog_info!("namespace '{}' created (id={}, major={})", ns.devpath, id, major);
        Ok(ns)
    }

    /// `ns_find(parent, name) -> ns | null` (spec.md §4.2).
    pub fn ns_find(&self, parent: Option<&Arc<Namespace>>, name: &str) -> Option<Arc<Namespace>> {
        self.find_live(parent, name).map(|ns| refcount::acquire(&ns))
    }

    fn find_live(&self, parent: Option<&Arc<Namespace>>, name: &str) -> Option<Arc<Namespace>> {
        self.0.list.lock().iter().find_map(|ns| {
            if ns.is_disconnected() {
                return None;
            }
            let parent_matches = match (parent, &ns.parent) {
                (None, None) => true,
                (Some(p), Some(q)) => Arc::ptr_eq(p, q),
                _ => false,
            };
            let name_matches = ns.name.as_deref() == Some(name) || (ns.name.is_none() && name.is_empty());
            if parent_matches && name_matches {
                Some(Arc::clone(ns))
            } else {
                None
            }
        })
    }

    pub fn ns_disconnect(ns: &Arc<Namespace>) {
        refcount::disconnect(ns);
    }

    pub fn ns_release(ns: Arc<Namespace>) {
        refcount::release(ns);
    }
}

pub struct Namespace {
    pub id: u64,
    pub name: Option<String>,
    pub devpath: String,
    parent: Option<Arc<Namespace>>,
    major: u32,
    control_device: Option<DeviceHandle>,
    manager: Arc<NamespaceManagerShared>,
    inner: TicketMutex<NamespaceInner>,
    refcount: Refcount,
    disconnected: DisconnectFlag,
}

impl Namespace {
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.is_set()
    }

    pub fn parent(&self) -> Option<&Arc<Namespace>> {
        self.parent.as_ref()
    }

    pub fn major(&self) -> u32 {
        self.major
    }

    pub fn bus_count(&self) -> usize {
        self.inner.lock().bus_list.len()
    }

    pub(crate) fn find_bus(&self, name: &str) -> Option<Arc<Bus>> {
        self.inner
            .lock()
            .bus_list
            .iter()
            .find(|b| !b.is_disconnected() && b.name == name)
            .cloned()
    }

    /// Assigns the next bus id and appends to `bus_list` atomically
    /// under this namespace's lock (spec.md §5 ordering guarantee).
    pub(crate) fn publish_bus(&self, bus: Arc<Bus>) {
        let mut inner = self.inner.lock();
        let id = inner.next_bus_id;
        inner.next_bus_id += 1;
        bus.set_id(id);
        inner.bus_list.push(bus);
    }

    pub(crate) fn unlink_bus(&self, name: &str) {
        self.inner.lock().bus_list.retain(|b| b.name != name);
    }

    /// Standalone namespace, bypassing [`NamespaceManager`], for unit
    /// tests elsewhere in this crate that only need somewhere to hang a
    /// bus off of.
    #[cfg(test)]
    pub(crate) fn new_root(major: u32) -> Arc<Namespace> {
        use crate::devnode::InMemoryControlDeviceRegistry;
        let manager = Arc::new(NamespaceManagerShared {
            list: TicketMutex::new(Vec::new()),
            majors: TicketMutex::new(MajorAllocator::new(major + 1)),
            next_ns_id: TicketMutex::new(0),
            registry: Arc::new(InMemoryControlDeviceRegistry::new()),
        });
        Arc::new(Namespace {
            id: 0,
            name: None,
            devpath: String::from("kdbus"),
            parent: None,
            major,
            control_device: None,
            manager,
            inner: TicketMutex::new(NamespaceInner {
                bus_list: Vec::new(),
                next_bus_id: 1,
            }),
            refcount: Refcount::new(1),
            disconnected: DisconnectFlag::new(),
        })
    }
}

impl Lifecycle for Namespace {
    fn refcount(&self) -> &Refcount {
        &self.refcount
    }

    fn disconnect_flag(&self) -> &DisconnectFlag {
        &self.disconnected
    }

    fn unlink_from_parent(&self) {
        self.manager.list.lock().retain(|ns| ns.id != self.id);
        if let Some(handle) = self.control_device {
            self.manager.registry.unregister(handle);
        }
        if self.parent.is_some() {
            self.manager.majors.lock().free(self.major);
        }
    }

    fn release_children(&self) {
        let snapshot: Vec<Arc<Bus>> = self.inner.lock().bus_list.clone();
        for bus in snapshot {
            refcount::disconnect(&bus);
        }
        self.inner.lock().bus_list.clear();
    }

    fn log_disconnected(&self) {
        klog_info!("namespace '{}' disconnected", self.devpath);
    }
}

#[cfg(test)]
extern crate std;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devnode::InMemoryControlDeviceRegistry;

    fn manager() -> NamespaceManager {
        NamespaceManager::new(Arc::new(InMemoryControlDeviceRegistry::new()))
    }

    #[test]
    fn root_requires_no_name() {
        let mgr = manager();
        let root = mgr.ns_new(None, None, 0o666).expect("root creates");
        assert_eq!(root.devpath, "kdbus");
        assert_eq!(root.major(), ROOT_MAJOR);
    }

    #[test]
    fn child_requires_parent_and_name() {
        let mgr = manager();
        assert_eq!(
            mgr.ns_new(None, Some("oops"), 0o666).unwrap_err(),
            BusError::EINVAL
        );
        let root = mgr.ns_new(None, None, 0o666).expect("root creates");
        assert_eq!(
            mgr.ns_new(Some(&root), None, 0o666).unwrap_err(),
            BusError::EINVAL
        );
    }

    #[test]
    fn duplicate_parent_name_is_eexist() {
        let mgr = manager();
        let root = mgr.ns_new(None, None, 0o666).expect("root creates");
        mgr.ns_new(Some(&root), Some("child"), 0o666)
            .expect("first child creates");
        let err = mgr
            .ns_new(Some(&root), Some("child"), 0o666)
            .unwrap_err();
        assert_eq!(err, BusError::EEXIST);
    }

    #[test]
    fn disconnected_namespace_frees_its_name_for_reuse() {
        let mgr = manager();
        let root = mgr.ns_new(None, None, 0o666).expect("root creates");
        let child = mgr
            .ns_new(Some(&root), Some("child"), 0o666)
            .expect("first child creates");
        NamespaceManager::ns_disconnect(&child);
        mgr.ns_new(Some(&root), Some("child"), 0o666)
            .expect("name is free again after disconnect");
    }

    #[test]
    fn child_major_differs_from_root() {
        let mgr = manager();
        let root = mgr.ns_new(None, None, 0o666).expect("root creates");
        let child = mgr
            .ns_new(Some(&root), Some("child"), 0o666)
            .expect("child creates");
        assert_ne!(root.major(), child.major());
    }
}
