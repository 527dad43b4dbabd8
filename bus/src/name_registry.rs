//! Per-bus well-known-name directory.
//!
//! The lookup/claim algorithm itself is an external collaborator
//! (policy around name ownership, queueing, activation) that this core
//! does not implement; the core's only contract with it is creation and
//! release alongside the owning `Bus`. Kept as an opaque handle rather
//! than a `()` so the ownership edge (`Bus` -> `NameRegistry`) is
//! visible in the type graph and so a future real implementation has an
//! obvious place to grow into.

/// Opaque per-bus name directory. Construction and teardown are the
/// only operations the core performs on it.
#[derive(Debug)]
pub struct NameRegistry {
    _private: (),
}

impl NameRegistry {
    /// Creates a fresh, empty registry for a newly-created bus.
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl Default for NameRegistry {
    fn default() -> Self {
        Self::new()
    }
}
