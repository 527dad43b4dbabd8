//! End-to-end scenarios S1–S8, exercising only the public API of
//! `slopos_bus` (spec.md §8).

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;

use slopos_bus::command::{encode_make_bus_frame, parse_make_bus};
use slopos_bus::devnode::InMemoryControlDeviceRegistry;
use slopos_bus::endpoint::Endpoint;
use slopos_bus::{Bus, BusError, BusFlags, NamespaceManager};

fn fresh_manager() -> NamespaceManager {
    NamespaceManager::new(Arc::new(InMemoryControlDeviceRegistry::new()))
}

/// Builds a frame with an extra item of an arbitrary (possibly
/// unsupported) type appended after the name item, for S4/S7.
fn frame_with_extra_item(name: &str, extra_type: u64, extra_payload: &[u8]) -> Vec<u8> {
    let mut frame = encode_make_bus_frame(name, 0, 64);

    let mut padded_payload = Vec::from(extra_payload);
    while padded_payload.len() % 8 != 0 {
        padded_payload.push(0);
    }
    let true_item_size = 16 + extra_payload.len();

    let mut item = Vec::new();
    item.extend_from_slice(&(true_item_size as u64).to_le_bytes());
    item.extend_from_slice(&extra_type.to_le_bytes());
    item.extend_from_slice(&padded_payload);

    let new_total = frame.len() + item.len();
    frame[0..8].copy_from_slice(&(new_total as u64).to_le_bytes());
    frame.extend_from_slice(&item);
    frame
}

#[test]
fn s1_make_bus_happy_path() {
    let mgr = fresh_manager();
    let ns = mgr.ns_new(None, None, 0o666).expect("root namespace");

    let frame = encode_make_bus_frame("1000-test", 0, 64);
    let cmd = parse_make_bus(&frame).expect("frame parses");
    let bus = Bus::bus_new(&ns, &cmd, 0o666, 1000, 1000).expect("bus created");

    assert_eq!(bus.name, "1000-test");
    assert_eq!(bus.id(), 1);
    assert_eq!(bus.endpoint_count(), 1);
}

#[test]
fn s2_prefix_violation() {
    let mgr = fresh_manager();
    let ns = mgr.ns_new(None, None, 0o666).expect("root namespace");

    let frame = encode_make_bus_frame("999-test", 0, 64);
    let cmd = parse_make_bus(&frame).expect("frame parses");
    let err = Bus::bus_new(&ns, &cmd, 0o666, 1000, 1000).unwrap_err();

    assert_eq!(err, BusError::EPERM);
    assert_eq!(ns.bus_count(), 0);
}

#[test]
fn s3_bloom_too_small() {
    let frame = encode_make_bus_frame("1000-test", 0, 4);
    let err = parse_make_bus(&frame).unwrap_err();
    assert_eq!(err, BusError::EINVAL);
}

#[test]
fn s4_duplicate_make_name_item() {
    // A second MAKE_NAME item (type 1) after the first.
    let frame = frame_with_extra_item("1000-test", 1, b"1000-dup\0");
    let err = parse_make_bus(&frame).unwrap_err();
    assert_eq!(err, BusError::EEXIST);
}

#[test]
fn s5_name_collision_in_same_namespace() {
    let mgr = fresh_manager();
    let ns = mgr.ns_new(None, None, 0o666).expect("root namespace");

    let frame = encode_make_bus_frame("1000-a", 0, 64);
    let cmd = parse_make_bus(&frame).expect("frame parses");

    Bus::bus_new(&ns, &cmd, 0o666, 1000, 1000).expect("first create succeeds");
    let err = Bus::bus_new(&ns, &cmd, 0o666, 1000, 1000).unwrap_err();
    assert_eq!(err, BusError::EEXIST);
}

#[test]
fn s6_metadata_append_idempotence() {
    use slopos_bus::metadata::{AttachMask, MetadataCollector, NamespaceToken, ProcessSnapshot, TranslatedCreds};

    let mgr = fresh_manager();
    let ns = mgr.ns_new(None, None, 0o666).expect("root namespace");
    let frame = encode_make_bus_frame("1000-meta", 0, 64);
    let cmd = parse_make_bus(&frame).expect("frame parses");
    let bus = Bus::bus_new(&ns, &cmd, 0o666, 1000, 1000).expect("bus created");
    let ep = Endpoint::new(&bus, "mon", 0o666, 0, 0, false).expect("endpoint");
    let conn = ep.new_connection(None);

    let snapshot = ProcessSnapshot {
        creds: Some(TranslatedCreds {
            uid: 1000,
            gid: 1000,
            pid: 7,
            tid: 7,
            starttime: 99,
        }),
        comm_tgid: Some(alloc::string::String::from("broker")),
        comm_tid: Some(alloc::string::String::from("broker")),
        ..Default::default()
    };
    let mask = AttachMask::CREDS | AttachMask::COMM;

    let mut meta = MetadataCollector::meta_new(NamespaceToken(1), NamespaceToken(1));
    meta.meta_append(Some(&conn), 42, mask, &snapshot).unwrap();
    let after_one = meta.buffer().to_vec();
    meta.meta_append(Some(&conn), 42, mask, &snapshot).unwrap();
    let after_two = meta.buffer().to_vec();

    assert_eq!(after_one, after_two);
    assert!(meta.attached().contains(AttachMask::CREDS));
    assert!(meta.attached().contains(AttachMask::COMM));
}

#[test]
fn s7_unsupported_item_type() {
    let mgr = fresh_manager();
    let ns = mgr.ns_new(None, None, 0o666).expect("root namespace");

    // type 999 is not MAKE_NAME(1) or MAKE_CGROUP(2).
    let frame = frame_with_extra_item("1000-test", 999, &[0u8; 8]);
    let err = parse_make_bus(&frame).unwrap_err();
    assert_eq!(err, BusError::ENOTSUPP);
    assert_eq!(ns.bus_count(), 0);
}

#[test]
fn s8_teardown_ordering_releases_everything() {
    let registry = Arc::new(InMemoryControlDeviceRegistry::new());
    let mgr = NamespaceManager::new(registry.clone());
    let ns = mgr.ns_new(None, None, 0o666).expect("root namespace");

    let frame = encode_make_bus_frame("1000-teardown", 0, 64);
    let cmd = parse_make_bus(&frame).expect("frame parses");
    let bus = Bus::bus_new(&ns, &cmd, 0o666, 1000, 1000).expect("bus created");
    assert!(bus.bus_find_conn_by_id(0).is_none(), "id 0 is never assigned");

    let endpoint = Endpoint::new(&bus, "extra", 0o666, 0, 0, false).expect("second endpoint");
    let conn = endpoint.new_connection(None);

    assert_eq!(registry.registered_count(), 1);
    assert_eq!(ns.bus_count(), 1);
    assert_eq!(bus.endpoint_count(), 2);
    assert!(bus.bus_find_conn_by_id(conn.id).is_some());

    // Release the last external reference to the namespace; nothing
    // else in this test holds a strong ref to `ns` once it is dropped
    // other than the manager's own global list.
    drop(conn);
    slopos_bus::namespace::NamespaceManager::ns_release(ns);

    assert_eq!(registry.registered_count(), 0, "control device must be unregistered");
    assert!(bus.is_disconnected(), "bus must have disconnected");
    assert!(endpoint.is_disconnected(), "endpoint must have disconnected");
}
