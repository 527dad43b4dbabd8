//! TLV `make-bus` command ingress (spec.md §4.4).
//!
//! Parses a userspace-supplied, little-endian, 8-byte-aligned buffer
//! describing a new bus. The buffer is attacker-controlled: every
//! length field is re-validated against the scratch-buffer bound before
//! use, and no slice into it escapes without a prior bounds check.
//! Grounded in `examples/original_source/bus.c`'s
//! `kdbus_bus_make_user`, including its item-iteration order and the
//! "don't short-circuit on the first accepted item" requirement.

use alloc::string::String;
#[cfg(any(test, feature = "test-support"))]
use alloc::vec::Vec;

use slopos_lib::klog_warn;

use crate::error::{BusError, BusResult};
use crate::limits;

/// TLV item type tags carried in a `make-bus` frame (spec.md §6).
const ITEM_TYPE_MAKE_NAME: u64 = 1;
const ITEM_TYPE_MAKE_CGROUP: u64 = 2;

/// `flags` bit 0 (spec.md §6).
pub const FLAG_POLICY_OPEN: u64 = 1 << 0;

/// A parsed, validated view over a `make-bus` command frame (spec.md
/// §3 "Make-bus command object").
#[derive(Debug, Clone)]
pub struct ParsedMakeBusCommand {
    pub name: String,
    pub cgroup_id: Option<u64>,
    pub flags: u64,
    pub bloom_size: u64,
}

impl ParsedMakeBusCommand {
    pub fn policy_open(&self) -> bool {
        self.flags & FLAG_POLICY_OPEN != 0
    }
}

/// Parses and validates a raw `make-bus` frame per spec.md §4.4's
/// five-step algorithm.
///
/// `raw` stands in for the "bounded user-space copy" step: the caller
/// has already copied the frame out of userspace into kernel memory
/// (step 2's copy-failure path, `EFAULT`, is the caller's
/// responsibility since it depends on the host's copy-from-user
/// primitive, which this core does not implement).
pub fn parse_make_bus(raw: &[u8]) -> BusResult<ParsedMakeBusCommand> {
    // Step 1: bounded leading `size` field.
    if raw.len() < 8 {
        return Err(BusError::EMSGSIZE);
    }
    let size = read_u64(raw, 0);
    if size < limits::MAKE_BUS_HEADER_SIZE as u64 || size > limits::MAKE_BUS_FRAME_MAX {
        klog_warn!("make-bus: frame size {} out of bounds", size);
        return Err(BusError::EMSGSIZE);
    }
    let size = size as usize;
    if raw.len() < size {
        // The caller's scratch copy must contain exactly `size` bytes;
        // a short buffer is the moral equivalent of a copy fault.
        return Err(BusError::EFAULT);
    }
    let frame = &raw[..size];

    let flags = read_u64(frame, 8);
    let bloom_size = read_u64(frame, 16);

    // Step 3: iterate items from the first item boundary to `size`.
    let mut cursor = limits::MAKE_BUS_HEADER_SIZE;
    let mut name: Option<String> = None;
    let mut cgroup_id: Option<u64> = None;

    while cursor + limits::ITEM_HEADER_SIZE <= frame.len() {
        let item_size = read_u64(frame, cursor) as usize;
        let item_type = read_u64(frame, cursor + 8);

        if item_size <= limits::ITEM_HEADER_SIZE {
            klog_warn!("make-bus: empty-payload item at offset {}", cursor);
            return Err(BusError::EINVAL);
        }
        if cursor + item_size > frame.len() {
            klog_warn!("make-bus: item at offset {} overruns frame", cursor);
            return Err(BusError::EINVAL);
        }
        let payload = &frame[cursor + limits::ITEM_HEADER_SIZE..cursor + item_size];

        match item_type {
            ITEM_TYPE_MAKE_NAME => {
                if name.is_some() {
                    klog_warn!("make-bus: duplicate MAKE_NAME item");
                    return Err(BusError::EEXIST);
                }
                name = Some(parse_make_name(payload)?);
            }
            ITEM_TYPE_MAKE_CGROUP => {
                if cgroup_id.is_some() {
                    klog_warn!("make-bus: duplicate MAKE_CGROUP item");
                    return Err(BusError::EEXIST);
                }
                if payload.len() < 8 {
                    return Err(BusError::EINVAL);
                }
                cgroup_id = Some(read_u64(payload, 0));
            }
            _ => {
                klog_warn!("make-bus: unsupported item type {}", item_type);
                return Err(BusError::ENOTSUPP);
            }
        }

        cursor += align_up(item_size, limits::ITEM_ALIGN);
    }

    // Step 4: final cursor must land within one alignment unit of the
    // declared frame size (padding tolerance).
    if cursor > frame.len() || frame.len() - cursor >= limits::ITEM_ALIGN {
        klog_warn!("make-bus: trailing garbage after last item");
        return Err(BusError::EINVAL);
    }

    // Step 5: a name is mandatory; bloom_size must be aligned and
    // in-range. Both suspicious original paths (spec.md §9 Open
    // Question (b)) are hard EINVAL here, with no partial state.
    let name = name.ok_or(BusError::EBADMSG)?;
    if bloom_size % limits::BLOOM_SIZE_ALIGN != 0
        || bloom_size < limits::BLOOM_SIZE_MIN
        || bloom_size > limits::BLOOM_SIZE_MAX
    {
        klog_warn!("make-bus: bloom_size {} rejected", bloom_size);
        return Err(BusError::EINVAL);
    }

    Ok(ParsedMakeBusCommand {
        name,
        cgroup_id,
        flags,
        bloom_size,
    })
}

/// Validates a `MAKE_NAME` payload: length bounds and NUL-terminated
/// string content (spec.md §4.4).
fn parse_make_name(payload: &[u8]) -> BusResult<String> {
    if payload.len() < limits::MAKE_NAME_PAYLOAD_MIN {
        return Err(BusError::EINVAL);
    }
    if payload.len() > limits::MAKE_NAME_PAYLOAD_MAX {
        return Err(BusError::ENAMETOOLONG);
    }
    let nul_pos = payload
        .iter()
        .position(|&b| b == 0)
        .ok_or(BusError::EINVAL)?;
    if nul_pos != payload.len() - 1 {
        // Trailing bytes after the NUL are not a valid C string.
        return Err(BusError::EINVAL);
    }
    let bytes = &payload[..nul_pos];
    let s = core::str::from_utf8(bytes).map_err(|_| BusError::EINVAL)?;
    Ok(String::from(s))
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(arr)
}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Encodes a minimal valid `make-bus` frame, used by tests and by the
/// integration scenario harness to build fixtures without hand-laying
/// out bytes at every call site.
#[cfg(any(test, feature = "test-support"))]
pub fn encode_make_bus_frame(name: &str, flags: u64, bloom_size: u64) -> Vec<u8> {
    let mut name_payload = Vec::from(name.as_bytes());
    name_payload.push(0);
    while name_payload.len() % limits::ITEM_ALIGN != 0 {
        name_payload.push(0);
    }
    let item_size = limits::ITEM_HEADER_SIZE + name_payload.len();
    // item_size must reflect the *unpadded* payload length per spec;
    // padding lives after it, so record the true payload length and
    // pad the frame, not the declared item size.
    let true_item_size = limits::ITEM_HEADER_SIZE + name.len() + 1;

    let total = limits::MAKE_BUS_HEADER_SIZE + item_size;
    let mut frame = Vec::with_capacity(total);
    frame.extend_from_slice(&(total as u64).to_le_bytes());
    frame.extend_from_slice(&flags.to_le_bytes());
    frame.extend_from_slice(&bloom_size.to_le_bytes());
    frame.extend_from_slice(&(true_item_size as u64).to_le_bytes());
    frame.extend_from_slice(&ITEM_TYPE_MAKE_NAME.to_le_bytes());
    frame.extend_from_slice(&name_payload);
    frame
}

#[cfg(test)]
extern crate std;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_matches_scenario_s1() {
        let frame = encode_make_bus_frame("1000-test", 0, 64);
        let parsed = parse_make_bus(&frame).expect("parses");
        assert_eq!(parsed.name, "1000-test");
        assert_eq!(parsed.flags, 0);
        assert_eq!(parsed.bloom_size, 64);
        assert!(!parsed.policy_open());
    }

    #[test]
    fn bloom_too_small_is_einval() {
        let frame = encode_make_bus_frame("1000-test", 0, 4);
        assert_eq!(parse_make_bus(&frame).unwrap_err(), BusError::EINVAL);
    }

    #[test]
    fn bloom_unaligned_is_einval() {
        let frame = encode_make_bus_frame("1000-test", 0, 12);
        assert_eq!(parse_make_bus(&frame).unwrap_err(), BusError::EINVAL);
    }

    #[test]
    fn bloom_too_large_is_einval() {
        let frame = encode_make_bus_frame("1000-test", 0, 32 * 1024);
        assert_eq!(parse_make_bus(&frame).unwrap_err(), BusError::EINVAL);
    }

    #[test]
    fn duplicate_make_name_is_eexist() {
        let mut frame = encode_make_bus_frame("1000-test", 0, 64);
        let second_item = {
            let mut payload = Vec::from(&b"1000-again\0"[..]);
            while payload.len() % limits::ITEM_ALIGN != 0 {
                payload.push(0);
            }
            let true_size = limits::ITEM_HEADER_SIZE + 11;
            let mut item = Vec::new();
            item.extend_from_slice(&(true_size as u64).to_le_bytes());
            item.extend_from_slice(&ITEM_TYPE_MAKE_NAME.to_le_bytes());
            item.extend_from_slice(&payload);
            item
        };
        let new_total = frame.len() + second_item.len();
        frame[0..8].copy_from_slice(&(new_total as u64).to_le_bytes());
        frame.extend_from_slice(&second_item);

        assert_eq!(parse_make_bus(&frame).unwrap_err(), BusError::EEXIST);
    }

    #[test]
    fn unsupported_item_type_is_enotsupp() {
        let mut frame = encode_make_bus_frame("1000-test", 0, 64);
        let unknown_item = {
            let payload = [0u8; 8];
            let true_size = limits::ITEM_HEADER_SIZE + payload.len();
            let mut item = Vec::new();
            item.extend_from_slice(&(true_size as u64).to_le_bytes());
            item.extend_from_slice(&99u64.to_le_bytes());
            item.extend_from_slice(&payload);
            item
        };
        let new_total = frame.len() + unknown_item.len();
        frame[0..8].copy_from_slice(&(new_total as u64).to_le_bytes());
        frame.extend_from_slice(&unknown_item);

        assert_eq!(parse_make_bus(&frame).unwrap_err(), BusError::ENOTSUPP);
    }

    #[test]
    fn missing_name_is_ebadmsg() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&(limits::MAKE_BUS_HEADER_SIZE as u64).to_le_bytes());
        frame.extend_from_slice(&0u64.to_le_bytes());
        frame.extend_from_slice(&64u64.to_le_bytes());
        assert_eq!(parse_make_bus(&frame).unwrap_err(), BusError::EBADMSG);
    }

    #[test]
    fn frame_over_max_is_emsgsize() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&(0x10000u64).to_le_bytes());
        frame.extend_from_slice(&0u64.to_le_bytes());
        frame.extend_from_slice(&64u64.to_le_bytes());
        assert_eq!(parse_make_bus(&frame).unwrap_err(), BusError::EMSGSIZE);
    }

    #[test]
    fn empty_payload_item_is_einval() {
        let mut frame = Vec::new();
        let total = limits::MAKE_BUS_HEADER_SIZE + limits::ITEM_ALIGN;
        frame.extend_from_slice(&(total as u64).to_le_bytes());
        frame.extend_from_slice(&0u64.to_le_bytes());
        frame.extend_from_slice(&64u64.to_le_bytes());
        // item.size == header size exactly => empty payload
        frame.extend_from_slice(&(limits::ITEM_HEADER_SIZE as u64).to_le_bytes());
        frame.extend_from_slice(&ITEM_TYPE_MAKE_NAME.to_le_bytes());
        assert_eq!(parse_make_bus(&frame).unwrap_err(), BusError::EINVAL);
    }
}
