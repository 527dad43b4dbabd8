#![no_std]

//! Kernel-resident capability bus broker core.
//!
//! The object graph is a namespace → bus → endpoint → connection
//! hierarchy (see [`namespace`], [`bus`], [`endpoint`], [`connection`]),
//! reached through the userspace-facing `make-bus` TLV command parsed
//! by [`command`]. [`metadata`] snapshots caller-process attributes for
//! attachment to outgoing messages. [`refcount`] is the uniform
//! acquire/release/disconnect protocol every long-lived object type
//! implements.
//!
//! Out of scope (external collaborators; only their contracts with this
//! core are modeled): the message store and memfd payload delivery, the
//! name-registry lookup/claim algorithm ([`name_registry`] only
//! creates/releases it), the policy database, and the userspace
//! test/monitor tools.

extern crate alloc;

pub mod bus;
pub mod command;
pub mod connection;
pub mod devnode;
pub mod endpoint;
pub mod error;
pub mod limits;
pub mod metadata;
pub mod name_registry;
pub mod namespace;
pub mod refcount;

pub use bus::{Bus, BusFlags};
pub use command::{parse_make_bus, ParsedMakeBusCommand};
pub use connection::Connection;
pub use devnode::{ControlDeviceRegistry, DeviceHandle, InMemoryControlDeviceRegistry};
pub use endpoint::Endpoint;
pub use error::{BusError, BusResult};
pub use metadata::{AttachMask, MetadataCollector, NamespaceToken, ProcessSnapshot};
pub use name_registry::NameRegistry;
pub use namespace::{Namespace, NamespaceManager};
pub use refcount::{acquire, disconnect, release, Lifecycle};
