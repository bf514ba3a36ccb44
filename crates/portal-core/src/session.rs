//! Sessions: one connection's control-path identity and current owner.
//!
//! A server session starts `Pending`, built from the [`SessionKey`] a portal
//! reported for an inbound connection. `accept` or `forward` moves it to
//! `Owned` and registers it with the owning portal's queue. A client session
//! starts `Connected`. Both move to `Closing` on a local close or a peer
//! teardown and to `Closed` when the engine reports `SessionClosed`.
//!
//! ```text
//! Pending --accept/forward--> Owned ----\
//!                                        +--> Closing --SessionClosed--> Closed
//! (connect) -------------> Connected ---/
//! ```

use std::fmt;
use std::sync::{Arc, Weak};

use common::types::{Handle, NativeSessionPtr, PendingSessionPtr, QueueId};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::address::PortalAddress;
use crate::callbacks::{invoke_guarded, SessionCallbacks};
use crate::errors::PortalError;
use crate::event::{Event, EventName, EventReason};
use crate::observability::metrics::record_session_closed;
use crate::portal::{Portal, PortalInner};
use crate::queue::{DispatchContext, EventQueueHandle, Eventable};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Inbound request not yet admitted.
    Pending,
    /// Admitted by exactly one portal.
    Owned,
    /// Client session established by `connect`.
    Connected,
    /// Teardown requested locally or started by the peer.
    Closing,
    /// Terminal event observed; deregistered everywhere.
    Closed,
}

impl SessionState {
    /// Returns the state as a string for log fields.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SessionState::Pending => "pending",
            SessionState::Owned => "owned",
            SessionState::Connected => "connected",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        }
    }

    /// Whether close was requested or completed.
    #[must_use]
    pub const fn is_closing(&self) -> bool {
        matches!(self, SessionState::Closing | SessionState::Closed)
    }
}

/// Which side of the connection a session represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Server,
    Client,
}

/// Correlation token for a pending inbound connection.
///
/// Carries no ownership. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pending: PendingSessionPtr,
    uri: String,
}

impl SessionKey {
    /// Pair a pending connection pointer with the URI it arrived on.
    #[must_use]
    pub fn new(pending: PendingSessionPtr, uri: impl Into<String>) -> Self {
        Self {
            pending,
            uri: uri.into(),
        }
    }

    /// Engine pointer of the pending connection.
    #[must_use]
    pub fn pending_ptr(&self) -> PendingSessionPtr {
        self.pending
    }

    /// URI the connection arrived on.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }
}

/// Mutable part of a session. Locked after a portal's state and before its session set.
pub(crate) struct SessionSlot {
    pub(crate) state: SessionState,
    pub(crate) owner: Option<Weak<PortalInner>>,
    pub(crate) native: NativeSessionPtr,
    pub(crate) queue: Option<EventQueueHandle>,
}

pub(crate) struct SessionInner {
    handle: Handle,
    key: Option<SessionKey>,
    role: SessionRole,
    callbacks: Option<Arc<dyn SessionCallbacks>>,
    slot: Mutex<SessionSlot>,
}

/// A server or client session. Clones refer to the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("handle", &self.inner.handle)
            .field("role", &self.inner.role)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Build a pending server session for an inbound connection.
    ///
    /// The session is not registered anywhere until a portal accepts or
    /// forwards it.
    #[must_use]
    pub fn server(key: SessionKey, callbacks: Option<Arc<dyn SessionCallbacks>>) -> Self {
        let handle = key.pending_ptr().session_handle();
        Self {
            inner: Arc::new(SessionInner {
                handle,
                key: Some(key),
                role: SessionRole::Server,
                callbacks,
                slot: Mutex::new(SessionSlot {
                    state: SessionState::Pending,
                    owner: None,
                    native: NativeSessionPtr::NULL,
                    queue: None,
                }),
            }),
        }
    }

    /// Open a client session to `uri`, dispatched on `queue`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a bad address, a resource error if
    /// the engine refuses the connection, or a queue error if registration
    /// fails (the engine session is torn down again in that case).
    pub fn connect(
        queue: &EventQueueHandle,
        uri: &str,
        callbacks: Option<Arc<dyn SessionCallbacks>>,
    ) -> Result<Self, PortalError> {
        let address = PortalAddress::parse(uri).map_err(|e| {
            error!(target: "portal.session", uri = %uri, error = %e, "Invalid session address");
            PortalError::from(e)
        })?;

        let boundary = queue.boundary();
        let handle = boundary
            .connect_session(&address, queue.id())
            .map_err(|e| PortalError::ConnectFailed {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        if !handle.is_valid() {
            error!(
                target: "portal.session",
                address = %address,
                "Engine returned the invalid handle for a client session"
            );
            return Err(PortalError::ConnectFailed {
                address: address.to_string(),
                reason: "engine returned the invalid handle".to_string(),
            });
        }

        let session = Self {
            inner: Arc::new(SessionInner {
                handle,
                key: None,
                role: SessionRole::Client,
                callbacks,
                slot: Mutex::new(SessionSlot {
                    state: SessionState::Connected,
                    owner: None,
                    native: NativeSessionPtr::NULL,
                    queue: Some(queue.clone()),
                }),
            }),
        };

        if let Err(e) = queue.add_eventable(session.as_eventable()) {
            boundary.close_client_session(handle);
            return Err(e.into());
        }

        info!(
            target: "portal.session",
            handle = %handle,
            address = %address,
            queue_id = %queue.id(),
            "Client session created"
        );
        Ok(session)
    }

    /// Identity handle.
    #[must_use]
    pub fn handle(&self) -> Handle {
        self.inner.handle
    }

    /// Correlation key; `None` for client sessions.
    #[must_use]
    pub fn key(&self) -> Option<&SessionKey> {
        self.inner.key.as_ref()
    }

    #[must_use]
    pub fn role(&self) -> SessionRole {
        self.inner.role
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.slot.lock().state
    }

    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.state().is_closing()
    }

    /// Engine pointer of the admitted server session; null before admission.
    #[must_use]
    pub fn native_ptr(&self) -> NativeSessionPtr {
        self.inner.slot.lock().native
    }

    /// The portal currently owning this session.
    #[must_use]
    pub fn owner(&self) -> Option<Portal> {
        let slot = self.inner.slot.lock();
        slot.owner
            .as_ref()
            .and_then(Weak::upgrade)
            .map(Portal::from_inner)
    }

    /// Queue this session is dispatched on, once registered.
    #[must_use]
    pub fn queue_id(&self) -> Option<QueueId> {
        self.inner.slot.lock().queue.as_ref().map(EventQueueHandle::id)
    }

    /// Request teardown.
    ///
    /// Returns `false` if the session is already closing or was never
    /// admitted. Completion is reported later by a `SessionClosed` event.
    pub fn close(&self) -> bool {
        let (state, native, queue) = {
            let mut slot = self.inner.slot.lock();
            let state = slot.state;
            match state {
                SessionState::Closing | SessionState::Closed => {
                    warn!(
                        target: "portal.session",
                        handle = %self.inner.handle,
                        state = state.as_str(),
                        "Attempting to close a session that is already closing"
                    );
                    return false;
                }
                SessionState::Pending => {
                    error!(
                        target: "portal.session",
                        handle = %self.inner.handle,
                        "Cannot close a session that was never admitted, reject it instead"
                    );
                    return false;
                }
                SessionState::Owned | SessionState::Connected => {}
            }
            slot.state = SessionState::Closing;
            (state, slot.native, slot.queue.clone())
        };

        let Some(queue) = queue else {
            error!(
                target: "portal.session",
                handle = %self.inner.handle,
                "Active session has no event queue"
            );
            return false;
        };

        if state == SessionState::Owned {
            queue.boundary().close_server_session(native);
        } else {
            queue.boundary().close_client_session(self.inner.handle);
        }

        debug!(
            target: "portal.session",
            handle = %self.inner.handle,
            "Session close requested"
        );
        true
    }

    pub(crate) fn lock_slot(&self) -> MutexGuard<'_, SessionSlot> {
        self.inner.slot.lock()
    }

    pub(crate) fn as_eventable(&self) -> Arc<dyn Eventable> {
        Arc::clone(&self.inner) as Arc<dyn Eventable>
    }

    pub(crate) fn ptr_eq(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl SessionInner {
    fn on_session_error(&self, name: EventName, reason: EventReason, ctx: &mut DispatchContext<'_>) {
        if name.is_terminal() {
            ctx.deregister(self.handle);
            let owner = {
                let mut slot = self.slot.lock();
                slot.state = SessionState::Closed;
                slot.native = NativeSessionPtr::NULL;
                slot.owner.take()
            };
            if let Some(portal) = owner.as_ref().and_then(Weak::upgrade) {
                portal.remove_session(self.handle);
            }
            record_session_closed();
            info!(
                target: "portal.session",
                handle = %self.handle,
                reason = ?reason,
                "Session closed"
            );
        } else if name.is_peer_teardown() {
            let mut slot = self.slot.lock();
            if matches!(slot.state, SessionState::Owned | SessionState::Connected) {
                slot.state = SessionState::Closing;
                debug!(
                    target: "portal.session",
                    handle = %self.handle,
                    event = name.as_str(),
                    "Peer started teardown"
                );
            }
        }

        if let Some(callbacks) = &self.callbacks {
            invoke_guarded("session.on_session_event", || {
                callbacks.on_session_event(name, reason);
            });
        }
    }
}

impl Eventable for SessionInner {
    fn handle(&self) -> Handle {
        self.handle
    }

    fn is_closing(&self) -> bool {
        self.slot.lock().state.is_closing()
    }

    fn kind(&self) -> &'static str {
        "session"
    }

    fn on_event(&self, event: Event, ctx: &mut DispatchContext<'_>) {
        match event {
            Event::SessionError { name, reason } => self.on_session_error(name, reason, ctx),
            Event::NewSession { .. } => {
                warn!(
                    target: "portal.session",
                    handle = %self.handle,
                    "Session received a new-session event, ignoring"
                );
            }
        }
    }
}
