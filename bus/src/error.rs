//! Errno-compatible error representation for the bus broker.
//!
//! Mirrors the teacher's own syscall error type: a `#[repr(transparent)]`
//! newtype over the raw errno, with named associated consts and a single
//! `Display`/`Debug` implementation. No `thiserror` — this crate is
//! `no_std` and hand-rolls its formatting the same way the reference
//! syscall layer does.

use core::fmt;

/// A bus broker error, exposed to userspace as a negative errno exactly as
/// spec.md §6 enumerates.
#[derive(Clone, Copy, Eq, PartialEq)]
#[repr(transparent)]
pub struct BusError(i32);

impl BusError {
    /// Invalid argument.
    pub const EINVAL: Self = Self(22);
    /// Message too long.
    pub const EMSGSIZE: Self = Self(90);
    /// File (name) exists.
    pub const EEXIST: Self = Self(17);
    /// Operation not permitted.
    pub const EPERM: Self = Self(1);
    /// File name too long.
    pub const ENAMETOOLONG: Self = Self(36);
    /// Not a valid message.
    pub const EBADMSG: Self = Self(74);
    /// Operation not supported.
    pub const ENOTSUPP: Self = Self(524);
    /// Out of memory.
    pub const ENOMEM: Self = Self(12);
    /// Bad address / unavailable process state.
    pub const EFAULT: Self = Self(14);

    /// Build a `BusError` from a raw errno value.
    #[inline]
    pub const fn from_errno(errno: i32) -> Self {
        Self(errno)
    }

    /// The raw errno value.
    #[inline]
    pub const fn errno(self) -> i32 {
        self.0
    }

    /// Human-readable description, used in log lines.
    pub const fn as_str(self) -> &'static str {
        match self.0 {
            1 => "Operation not permitted",
            12 => "Out of memory",
            14 => "Bad address",
            17 => "File exists",
            22 => "Invalid argument",
            36 => "File name too long",
            74 => "Not a valid message",
            90 => "Message too long",
            524 => "Operation not supported",
            _ => "Unknown error",
        }
    }
}

impl fmt::Debug for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BusError({}: {})", self.0, self.as_str())
    }
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result type for bus broker operations.
pub type BusResult<T> = Result<T, BusError>;

#[cfg(test)]
extern crate std;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_errnos_have_distinct_messages() {
        assert_ne!(BusError::EINVAL.as_str(), BusError::EEXIST.as_str());
        assert_eq!(BusError::EPERM.errno(), 1);
    }

    #[test]
    fn from_errno_roundtrips() {
        let e = BusError::from_errno(22);
        assert_eq!(e, BusError::EINVAL);
    }
}
