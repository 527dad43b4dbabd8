//! Device-node attachment point on a bus (spec.md §3 "Endpoint").
//!
//! Endpoint is named as an external contract in spec.md ("the core
//! creates/destroys one per bus: the default `"bus"` endpoint"), but
//! nothing outside this workspace provides it, so it is implemented
//! here in full: a factory taking `(bus, name, mode, uid, gid,
//! policy_open)`, a disconnect that terminates every connection opened
//! through it, and a release.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use slopos_lib::klog_info;
use slopos_lib::ticket_lock::TicketMutex;

use crate::bus::Bus;
use crate::connection::Connection;
use crate::error::BusResult;
use crate::refcount::{self, DisconnectFlag, Lifecycle, Refcount};

pub struct Endpoint {
    pub name: String,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub policy_open: bool,
    connections: TicketMutex<Vec<Arc<Connection>>>,
    bus: Arc<Bus>,
    refcount: Refcount,
    disconnected: DisconnectFlag,
}

impl Endpoint {
    /// `(bus, endpoint-name, file-mode, uid, gid, policy-open-flag) ->
    /// new endpoint attached to the bus's endpoint list` (spec.md §3).
    pub fn new(
        bus: &Arc<Bus>,
        name: &str,
        mode: u32,
        uid: u32,
        gid: u32,
        policy_open: bool,
    ) -> BusResult<Arc<Self>> {
        let ep = Arc::new(Self {
            name: String::from(name),
            mode,
            uid,
            gid,
            policy_open,
            connections: TicketMutex::new(Vec::new()),
            bus: Arc::clone(bus),
            refcount: Refcount::new(1),
            disconnected: DisconnectFlag::new(),
        });
        bus.attach_endpoint(Arc::clone(&ep));
        klog_info!("endpoint '{}' created on bus '{}'", ep.name, bus.name);
        Ok(ep)
    }

    /// Allocates a new connection id from the owning bus, inserts it
    /// into `bus.conn_hash`, and records it on this endpoint's own
    /// connection list (spec.md §3 Connection lifecycle: "inserted
    /// into its bus's connection hash at create").
    pub fn new_connection(self: &Arc<Self>, name: Option<String>) -> Arc<Connection> {
        let ep = Arc::clone(self);
        let conn = self
            .bus
            .alloc_and_insert_connection(move |id| Connection::new(id, name, ep));
        self.connections.lock().push(Arc::clone(&conn));
        conn
    }

    /// Removes `conn_id` from this endpoint's list and from the owning
    /// bus's `conn_hash`. Called by `Connection::unlink_from_parent`.
    pub(crate) fn unlink_connection(&self, conn_id: u64) {
        self.connections.lock().retain(|c| c.id != conn_id);
        self.bus.remove_connection(conn_id);
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.is_set()
    }

    /// Current connection count, mainly for tests and diagnostics.
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }
}

impl Lifecycle for Endpoint {
    fn refcount(&self) -> &Refcount {
        &self.refcount
    }

    fn disconnect_flag(&self) -> &DisconnectFlag {
        &self.disconnected
    }

    fn unlink_from_parent(&self) {
        self.bus.unlink_endpoint(self.name.as_str());
    }

    fn release_children(&self) {
        let snapshot: Vec<Arc<Connection>> = self.connections.lock().clone();
        for conn in snapshot {
            refcount::disconnect(&conn);
        }
        self.connections.lock().clear();
    }

    fn log_disconnected(&self) {
        klog_info!("endpoint '{}' disconnected", self.name);
    }
}
