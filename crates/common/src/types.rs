//! Identity types handed out by the transport engine.
//!
//! The engine addresses everything with opaque 64-bit values. Wrapping them in
//! distinct newtypes keeps a portal handle from being passed where a pending
//! connection pointer is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of a dispatchable object (portal or session).
///
/// Assigned by the transport engine at creation. `0` is the sentinel for
/// "uncreated/invalid" and is never registered with an event queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle(u64);

impl Handle {
    /// The sentinel invalid handle.
    pub const INVALID: Handle = Handle(0);

    /// Wrap a raw engine handle.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Whether this handle refers to a created object.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.0 != 0
    }

    /// Get the raw value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Engine pointer to an inbound connection that has not been admitted yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingSessionPtr(u64);

impl PendingSessionPtr {
    /// Wrap a raw engine pointer.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Whether the pointer is null.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Get the raw value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// The handle a session created from this pending connection is addressed by.
    ///
    /// The engine routes every later event for the connection to the pointer it
    /// reported when the connection arrived.
    #[must_use]
    pub const fn session_handle(&self) -> Handle {
        Handle(self.0)
    }
}

impl fmt::Display for PendingSessionPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Engine pointer to a materialized server-side session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct NativeSessionPtr(u64);

impl NativeSessionPtr {
    /// The null pointer, held by sessions that were never admitted.
    pub const NULL: NativeSessionPtr = NativeSessionPtr(0);

    /// Wrap a raw engine pointer.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Whether the pointer is null.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Get the raw value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NativeSessionPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Identity of one event queue handler, as known to the transport engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueId(pub Uuid);

impl QueueId {
    /// Create a new random queue ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for QueueId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "eqh-{}", self.0.simple())
    }
}
