//! The transport engine boundary.
//!
//! The engine owns connections at the wire level. The control path only asks
//! it to create, admit, forward, reject and tear down objects; the engine
//! reports what happened later through raw events pushed into an event queue
//! (see [`crate::queue::RawEventSender`]).
//!
//! All calls are synchronous and must not block for long: they are made from
//! dispatch tasks while user callbacks run.

use common::types::{Handle, NativeSessionPtr, PendingSessionPtr, QueueId};
use thiserror::Error;

use crate::address::PortalAddress;
use crate::event::EventReason;

/// Error reported by the transport engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BoundaryError {
    /// Binding the listening address failed.
    #[error("bind failed: {0}")]
    Bind(String),

    /// The engine failed the operation.
    #[error("engine error: {0}")]
    Engine(String),
}

/// Result of starting to listen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerBinding {
    /// Handle the engine will address portal events to.
    pub handle: Handle,
    /// Port actually bound (assigned by the engine when `0` was requested).
    pub port: u16,
}

/// Operations the control path needs from the transport engine.
pub trait TransportBoundary: Send + Sync + 'static {
    /// Start listening on `address`, delivering portal events to `queue`.
    ///
    /// An invalid handle in the returned binding is treated as a failure.
    fn start_listening(
        &self,
        address: &PortalAddress,
        queue: QueueId,
    ) -> Result<ListenerBinding, BoundaryError>;

    /// Stop listening. Completion is reported by a later `PortalClosed` event.
    fn stop_listening(&self, portal: Handle);

    /// Materialize a server session for `pending`, owned by portal `owner`.
    fn admit_session(
        &self,
        pending: PendingSessionPtr,
        owner: Handle,
    ) -> Result<NativeSessionPtr, BoundaryError>;

    /// Redirect `pending` to the portal `owner` listening at `target`.
    fn forward_session(
        &self,
        target: &PortalAddress,
        pending: PendingSessionPtr,
        owner: Handle,
    ) -> Result<NativeSessionPtr, BoundaryError>;

    /// Refuse `pending`; `payload` is returned to the remote peer.
    fn reject_session(&self, pending: PendingSessionPtr, reason: EventReason, payload: &[u8]);

    /// Open a client connection, delivering its events to `queue`.
    fn connect_session(
        &self,
        address: &PortalAddress,
        queue: QueueId,
    ) -> Result<Handle, BoundaryError>;

    /// Tear down an admitted server session. Completion is a later `SessionClosed` event.
    fn close_server_session(&self, session: NativeSessionPtr);

    /// Tear down a client session. Completion is a later `SessionClosed` event.
    fn close_client_session(&self, session: Handle);
}
