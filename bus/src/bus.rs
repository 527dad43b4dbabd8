//! Per-bus state (spec.md §3 "Bus", §4.3).
//!
//! A bus owns a connection hash, an endpoint list, a name registry, and
//! a connection-id allocator, all guarded by one lock per spec.md §5
//! tier 3 ("bus lock — covers `conn_hash`, `ep_list`, `next_conn_id`").

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use hashbrown::HashMap;
use slopos_lib::{klog_info, klog_warn};
use slopos_lib::ticket_lock::TicketMutex;

use crate::command::ParsedMakeBusCommand;
use crate::connection::Connection;
use crate::endpoint::Endpoint;
use crate::error::{BusError, BusResult};
use crate::limits;
use crate::name_registry::NameRegistry;
use crate::namespace::Namespace;
use crate::refcount::{self, DisconnectFlag, Lifecycle, Refcount};

bitflags! {
    /// Bus-level flags (spec.md §3). Only bit 0 is currently assigned;
    /// the rest are reserved, matching the wire layout of spec.md §6.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BusFlags: u64 {
        const POLICY_OPEN = 1 << 0;
    }
}

struct BusInner {
    conn_hash: HashMap<u64, Arc<Connection>>,
    endpoints: Vec<Arc<Endpoint>>,
    next_conn_id: u64,
}

pub struct Bus {
    id: AtomicU64,
    pub name: String,
    pub flags: BusFlags,
    pub bloom_size: u64,
    pub cgroup_id: Option<u64>,
    name_registry: NameRegistry,
    namespace: Arc<Namespace>,
    inner: TicketMutex<BusInner>,
    refcount: Refcount,
    disconnected: DisconnectFlag,
}

impl Bus {
    pub fn id(&self) -> u64 {
        self.id.load(Ordering::Relaxed)
    }

    pub(crate) fn set_id(&self, id: u64) {
        self.id.store(id, Ordering::Relaxed);
    }

    /// The bus's owned name registry (spec.md §3: "Bus exclusively
    /// owns... its name registry").
    pub fn name_registry(&self) -> &NameRegistry {
        &self.name_registry
    }

    /// `bus_new(ns, cmd, mode, uid, gid) -> bus | err` (spec.md §4.3).
    ///
    /// `uid` is the creator's effective user id, already formatted in
    /// the user namespace active at creation (spec.md §3's "expressed
    /// in the user namespace active at creation" is the caller's
    /// responsibility: this function only compares `cmd.name` against
    /// the string it is handed).
    pub fn bus_new(
        ns: &Arc<Namespace>,
        cmd: &ParsedMakeBusCommand,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> BusResult<Arc<Bus>> {
        let prefix = prefix_for_uid(uid);
        if !cmd.name.starts_with(prefix.as_str()) {
            klog_warn!(
                "bus_new: name '{}' does not match required prefix '{}'",
                cmd.name,
                prefix
            );
            return Err(BusError::EPERM);
        }

        if ns.find_bus(&cmd.name).is_some() {
            klog_warn!("bus_new: name '{}' already exists", cmd.name);
            return Err(BusError::EEXIST);
        }

        let bus = Arc::new(Bus {
            id: AtomicU64::new(0), // assigned below, under ns.lock
            name: cmd.name.clone(),
            flags: if cmd.policy_open() {
                BusFlags::POLICY_OPEN
            } else {
                BusFlags::empty()
            },
            bloom_size: cmd.bloom_size,
            cgroup_id: cmd.cgroup_id,
            name_registry: NameRegistry::new(),
            namespace: Arc::clone(ns),
            inner: TicketMutex::new(BusInner {
                conn_hash: HashMap::new(),
                endpoints: Vec::new(),
                next_conn_id: limits::FIRST_CONN_ID,
            }),
            refcount: Refcount::new(1),
            disconnected: DisconnectFlag::new(),
        });

        Endpoint::new(&bus, "bus", mode, uid, gid, cmd.policy_open())?;

        // Publish id + list membership atomically under ns.lock so a
        // concurrent bus_find never observes a partially-initialized
        // bus (spec.md §5 ordering guarantee).
        ns.publish_bus(Arc::clone(&bus));

        klog_info!("bus '{}' created (id={})", bus.name, bus.id());
        Ok(bus)
    }

    /// `bus_find(ns, name) -> bus | null` (spec.md §4.3). Implemented on
    /// `Namespace` since the bus list lives there; re-exposed here for
    /// API symmetry with the other `*_find` operations.
    pub fn bus_find(ns: &Arc<Namespace>, name: &str) -> Option<Arc<Bus>> {
        ns.find_bus(name)
    }

    /// `bus_find_conn_by_id(bus, id) -> conn | null` (spec.md §4.3).
    pub fn bus_find_conn_by_id(&self, id: u64) -> Option<Arc<Connection>> {
        self.inner.lock().conn_hash.get(&id).cloned()
    }

    pub fn bus_disconnect(bus: &Arc<Bus>) {
        refcount::disconnect(bus);
    }

    pub fn bus_release(bus: Arc<Bus>) {
        refcount::release(bus);
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.is_set()
    }

    pub fn endpoint_count(&self) -> usize {
        self.inner.lock().endpoints.len()
    }

    pub(crate) fn attach_endpoint(&self, ep: Arc<Endpoint>) {
        self.inner.lock().endpoints.push(ep);
    }

    pub(crate) fn unlink_endpoint(&self, name: &str) {
        self.inner.lock().endpoints.retain(|e| e.name != name);
    }

    /// Allocates the next connection id and inserts `conn` into
    /// `conn_hash` under a single `bus.lock` critical section (spec.md
    /// §4.3: "id allocation and insertion into `conn_hash` are performed
    /// under `bus.lock` in one critical section"), so no observer can
    /// ever see an id that has been handed out but is not yet looked up
    /// from `bus_find_conn_by_id`.
    pub(crate) fn alloc_and_insert_connection(&self, conn_for: impl FnOnce(u64) -> Arc<Connection>) -> Arc<Connection> {
        let mut inner = self.inner.lock();
        let id = inner.next_conn_id;
        inner.next_conn_id += 1;
        let conn = conn_for(id);
        inner.conn_hash.insert(id, Arc::clone(&conn));
        conn
    }

    pub(crate) fn remove_connection(&self, id: u64) {
        self.inner.lock().conn_hash.remove(&id);
    }

    /// Constructs a bus directly, bypassing the TLV command pipeline,
    /// for unit tests elsewhere in this crate that only need a live bus
    /// to hang an endpoint/connection off of.
    #[cfg(test)]
    pub(crate) fn new_for_test(
        ns: &Arc<Namespace>,
        name: &str,
        flags: BusFlags,
        bloom_size: u64,
    ) -> Arc<Bus> {
        let bus = Arc::new(Bus {
            id: AtomicU64::new(0),
            name: String::from(name),
            flags,
            bloom_size,
            cgroup_id: None,
            name_registry: NameRegistry::new(),
            namespace: Arc::clone(ns),
            inner: TicketMutex::new(BusInner {
                conn_hash: HashMap::new(),
                endpoints: Vec::new(),
                next_conn_id: limits::FIRST_CONN_ID,
            }),
            refcount: Refcount::new(1),
            disconnected: DisconnectFlag::new(),
        });
        ns.publish_bus(Arc::clone(&bus));
        bus
    }
}

impl Lifecycle for Bus {
    fn refcount(&self) -> &Refcount {
        &self.refcount
    }

    fn disconnect_flag(&self) -> &DisconnectFlag {
        &self.disconnected
    }

    fn unlink_from_parent(&self) {
        self.namespace.unlink_bus(self.name.as_str());
    }

    fn release_children(&self) {
        let snapshot: Vec<Arc<Endpoint>> = self.inner.lock().endpoints.clone();
        for ep in snapshot {
            refcount::disconnect(&ep);
        }
        self.inner.lock().endpoints.clear();
        // NameRegistry is owned outright (no refcount of its own); it
        // is simply dropped along with the bus.
    }

    fn log_disconnected(&self) {
        klog_info!("bus '{}' (id={}) disconnected", self.name, self.id());
    }
}

/// Formats the mandatory bus-name prefix for a given creator uid.
/// Per spec.md §9's resolved Open Question, this is always a strict,
/// full-string prefix match of `"<UID>-"` — no short-length comparison.
fn prefix_for_uid(uid: u32) -> String {
    let mut s = String::new();
    core::fmt::Write::write_fmt(&mut s, format_args!("{}-", uid)).ok();
    s
}

#[cfg(test)]
extern crate std;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::parse_make_bus;
    use crate::namespace::Namespace;

    fn frame(name: &str, flags: u64, bloom: u64) -> alloc::vec::Vec<u8> {
        crate::command::encode_make_bus_frame(name, flags, bloom)
    }

    #[test]
    fn scenario_s1_happy_path() {
        let ns = Namespace::new_root(1);
        let cmd = parse_make_bus(&frame("1000-test", 0, 64)).expect("parses");
        let bus = Bus::bus_new(&ns, &cmd, 0o666, 1000, 1000).expect("creates");
        assert_eq!(bus.name, "1000-test");
        assert_eq!(bus.id(), 1);
        assert_eq!(bus.endpoint_count(), 1);
    }

    #[test]
    fn scenario_s2_prefix_violation() {
        let ns = Namespace::new_root(2);
        let cmd = parse_make_bus(&frame("999-test", 0, 64)).expect("parses");
        let err = Bus::bus_new(&ns, &cmd, 0o666, 1000, 1000).unwrap_err();
        assert_eq!(err, BusError::EPERM);
    }

    #[test]
    fn scenario_s5_name_collision() {
        let ns = Namespace::new_root(5);
        let cmd = parse_make_bus(&frame("1000-a", 0, 64)).expect("parses");
        let _first = Bus::bus_new(&ns, &cmd, 0o666, 1000, 1000).expect("first ok");
        let err = Bus::bus_new(&ns, &cmd, 0o666, 1000, 1000).unwrap_err();
        assert_eq!(err, BusError::EEXIST);
    }

    #[test]
    fn connection_ids_start_at_one_and_increment() {
        let ns = Namespace::new_root(6);
        let bus = Bus::new_for_test(&ns, "1000-ids", BusFlags::empty(), 64);
        let ep = Endpoint::new(&bus, "bus", 0o666, 0, 0, false).expect("endpoint");
        let c1 = ep.new_connection(None);
        let c2 = ep.new_connection(None);
        assert_eq!(c1.id, 1);
        assert_eq!(c2.id, 2);
        assert!(bus.bus_find_conn_by_id(1).is_some());
        assert!(bus.bus_find_conn_by_id(2).is_some());
        assert!(bus.bus_find_conn_by_id(0).is_none());
    }
}
