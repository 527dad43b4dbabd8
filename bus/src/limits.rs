//! Compile-time tunables.
//!
//! This subsystem has no runtime configuration file — like the rest of
//! the teacher's kernel-resident crates, its bounds are `pub const`
//! items baked into the binary, not a deserialized config struct.

/// Minimum bloom-filter byte size (spec.md §3, §6).
pub const BLOOM_SIZE_MIN: u64 = 8;

/// Maximum bloom-filter byte size.
pub const BLOOM_SIZE_MAX: u64 = 16 * 1024;

/// Required alignment for `bloom_size`.
pub const BLOOM_SIZE_ALIGN: u64 = 8;

/// Maximum size of an entire `make-bus` command frame.
pub const MAKE_BUS_FRAME_MAX: u64 = 0xFFFF;

/// Minimum payload length (including the NUL terminator) for `MAKE_NAME`.
pub const MAKE_NAME_PAYLOAD_MIN: usize = 2;

/// Maximum payload length (including the NUL terminator) for `MAKE_NAME`.
pub const MAKE_NAME_PAYLOAD_MAX: usize = 64;

/// Size in bytes of the fixed `make-bus` frame header
/// (`size`, `flags`, `bloom_size`).
pub const MAKE_BUS_HEADER_SIZE: usize = 24;

/// Size in bytes of a TLV item header (`size`, `type`).
pub const ITEM_HEADER_SIZE: usize = 16;

/// Size in bytes of a metadata item header (`size`, `type`), same layout
/// as a command item header.
pub const META_ITEM_HEADER_SIZE: usize = 16;

/// Alignment every TLV and metadata item boundary is rounded up to.
pub const ITEM_ALIGN: usize = 8;

/// Reserved connection id meaning "the kernel/broker itself" — never
/// assigned to a live connection.
pub const KERNEL_CONN_ID: u64 = 0;

/// First connection id a bus hands out.
pub const FIRST_CONN_ID: u64 = 1;

/// Minimum bytes the metadata buffer's first allocation reserves.
pub const META_INITIAL_RESERVE: usize = 256;
