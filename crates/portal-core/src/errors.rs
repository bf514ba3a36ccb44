//! Portal error types.
//!
//! Every error maps onto one of four kinds. Configuration and resource errors
//! are fatal to the object being constructed; protocol errors are expected
//! while objects close concurrently and are dropped; misuse is reported to the
//! caller without touching unrelated state.

use common::types::Handle;
use thiserror::Error;

use crate::address::AddressError;
use crate::boundary::BoundaryError;
use crate::session::SessionState;

/// Error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid scheme or address. Fatal at construction.
    Configuration,
    /// The engine could not create or admit an object. Fatal.
    Resource,
    /// Stale or malformed traffic. Recovered silently.
    Protocol,
    /// Operation called in the wrong state. Reported, not fatal.
    Misuse,
}

impl ErrorKind {
    /// Returns the kind as a string for log fields and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Resource => "resource",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Misuse => "misuse",
        }
    }

    /// Whether the object that produced the error is left unusable.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, ErrorKind::Configuration | ErrorKind::Resource)
    }
}

/// Event queue handler errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The object carries the sentinel handle.
    #[error("Cannot register an object with the invalid handle")]
    InvalidHandle,

    /// Another object already holds this handle.
    #[error("Handle {0} is already registered")]
    AlreadyRegistered(Handle),

    /// The mailbox is at capacity.
    #[error("Event queue mailbox is full")]
    MailboxFull,

    /// The dispatch task has stopped.
    #[error("Event queue is stopped")]
    Stopped,

    /// The dispatch task went away before answering.
    #[error("Event queue dropped the acknowledgement")]
    AcknowledgementLost,
}

/// Portal and session error type.
#[derive(Debug, Error)]
pub enum PortalError {
    /// The URI could not be used as a transport address.
    #[error("Invalid address: {0}")]
    Address(#[from] AddressError),

    /// The engine refused to start listening.
    #[error("Failed to start listening on {address}: {reason}")]
    ListenFailed { address: String, reason: String },

    /// The engine could not materialize an admitted session.
    #[error("Failed to admit session {session}: {reason}")]
    AdmissionFailed { session: Handle, reason: String },

    /// The engine refused a client connection request.
    #[error("Failed to connect to {address}: {reason}")]
    ConnectFailed { address: String, reason: String },

    /// The portal is closing and takes no new sessions.
    #[error("Portal {0} is closing")]
    PortalClosing(Handle),

    /// Accept/forward on a session that is not waiting for admission.
    #[error("Session {handle} is not pending (state: {state:?})")]
    SessionNotPending { handle: Handle, state: SessionState },

    /// Accept/forward on a client session.
    #[error("Session {0} is not a server session")]
    NotAServerSession(Handle),

    /// Registration with an event queue failed.
    #[error("Event queue error: {0}")]
    Queue(#[from] QueueError),
}

impl PortalError {
    /// Returns the error classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            PortalError::Address(_) => ErrorKind::Configuration,
            PortalError::ListenFailed { .. }
            | PortalError::AdmissionFailed { .. }
            | PortalError::ConnectFailed { .. } => ErrorKind::Resource,
            PortalError::PortalClosing(_)
            | PortalError::SessionNotPending { .. }
            | PortalError::NotAServerSession(_) => ErrorKind::Misuse,
            PortalError::Queue(QueueError::InvalidHandle | QueueError::AlreadyRegistered(_)) => {
                ErrorKind::Misuse
            }
            PortalError::Queue(
                QueueError::MailboxFull | QueueError::Stopped | QueueError::AcknowledgementLost,
            ) => ErrorKind::Resource,
        }
    }

    pub(crate) fn listen_failed(address: &str, err: &BoundaryError) -> Self {
        PortalError::ListenFailed {
            address: address.to_string(),
            reason: err.to_string(),
        }
    }
}
