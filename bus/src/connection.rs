//! A peer's session on a bus (spec.md §3 "Connection").
//!
//! Only the fields the core reads are modeled here: an id assigned by
//! the owning bus, an optional debug/monitor label, and the list of
//! well-known names this connection currently owns. The message store,
//! receive pool, and memfd payload delivery are out of scope (spec.md
//! §1) and have no representation here.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use slopos_lib::klog_info;
use slopos_lib::ticket_lock::TicketMutex;

use crate::endpoint::Endpoint;
use crate::refcount::{DisconnectFlag, Lifecycle, Refcount};

/// One well-known name owned by a connection.
#[derive(Debug, Clone)]
pub struct OwnedName {
    pub name: String,
    pub flags: u32,
}

pub struct Connection {
    pub id: u64,
    pub name: Option<String>,
    names: TicketMutex<Vec<OwnedName>>,
    endpoint: Arc<Endpoint>,
    refcount: Refcount,
    disconnected: DisconnectFlag,
}

impl Connection {
    pub(crate) fn new(id: u64, name: Option<String>, endpoint: Arc<Endpoint>) -> Arc<Self> {
        Arc::new(Self {
            id,
            name,
            names: TicketMutex::new(Vec::new()),
            endpoint,
            refcount: Refcount::new(1),
            disconnected: DisconnectFlag::new(),
        })
    }

    /// The endpoint this connection was opened through.
    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    /// Appends a newly-claimed well-known name under the connection's
    /// own lock (spec.md §5, innermost lock tier).
    pub fn add_owned_name(&self, name: String, flags: u32) {
        self.names.lock().push(OwnedName { name, flags });
    }

    /// Snapshot of currently-owned names, for `MetadataCollector`'s
    /// `NAMES` record (spec.md §4.5) which must iterate under
    /// `conn.lock`.
    pub fn owned_names(&self) -> Vec<OwnedName> {
        self.names.lock().clone()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.is_set()
    }
}

impl Lifecycle for Connection {
    fn refcount(&self) -> &Refcount {
        &self.refcount
    }

    fn disconnect_flag(&self) -> &DisconnectFlag {
        &self.disconnected
    }

    fn unlink_from_parent(&self) {
        self.endpoint.unlink_connection(self.id);
    }

    fn release_children(&self) {
        // Connections are leaves in the object graph; nothing further
        // to tear down.
    }

    fn log_disconnected(&self) {
        klog_info!("connection {} disconnected", self.id);
    }
}

#[cfg(test)]
extern crate std;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Bus, BusFlags};
    use crate::namespace::Namespace;

    fn root_ns() -> Arc<Namespace> {
        Namespace::new_root(7)
    }

    #[test]
    fn owned_names_round_trip() {
        let ns = root_ns();
        let bus = Bus::new_for_test(&ns, "1000-conn-test", BusFlags::empty(), 64);
        let ep = Endpoint::new(&bus, "bus", 0o666, 0, 0, false).expect("endpoint");
        let conn = ep.new_connection(Some(alloc::string::String::from("mon")));

        conn.add_owned_name(alloc::string::String::from("org.example.Foo"), 0);
        let names = conn.owned_names();
        assert_eq!(names.len(), 1);
        assert_eq!(names[0].name, "org.example.Foo");
    }
}
