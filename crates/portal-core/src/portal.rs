//! Portals: listening and worker endpoints that own sessions.
//!
//! A listening portal reports inbound connections to its
//! [`PortalCallbacks`] and the callee decides between `accept`, `forward`
//! and `reject`. A worker portal has no callbacks and only receives sessions
//! forwarded to it.
//!
//! # Ownership transfer
//!
//! Admission locks the target portal's state, then the session, then the
//! target portal's session set. Every other path follows the same order.
//! The session is registered with the target portal's queue before the
//! engine is asked to admit it, so the registration precedes every event the
//! engine can produce for it.
//!
//! # Closing
//!
//! `close` closes the owned sessions and asks the engine to stop listening.
//! The portal stays registered until the engine confirms with a terminal
//! event, since events for its handle may still be in flight.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use common::types::{Handle, QueueId};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::address::{uri_host, PortalAddress};
use crate::callbacks::{invoke_guarded, PortalCallbacks};
use crate::errors::PortalError;
use crate::event::{Event, EventName, EventReason};
use crate::observability::metrics::{record_session_admitted, record_session_rejected};
use crate::queue::{DispatchContext, EventQueueHandle, Eventable};
use crate::session::{Session, SessionKey, SessionState};

/// Portal lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalState {
    /// Bound and taking sessions.
    Listening,
    /// `close` was called; waiting for the engine to confirm.
    Closing,
    /// The engine confirmed; deregistered from its queue.
    Closed,
}

impl PortalState {
    /// Returns the state as a string for log fields.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            PortalState::Listening => "listening",
            PortalState::Closing => "closing",
            PortalState::Closed => "closed",
        }
    }
}

/// How a session reaches its owner.
enum Admission {
    Accept,
    Forward(PortalAddress),
}

impl Admission {
    const fn as_str(&self) -> &'static str {
        match self {
            Admission::Accept => "accept",
            Admission::Forward(_) => "forward",
        }
    }
}

pub(crate) struct PortalInner {
    handle: Handle,
    queue: EventQueueHandle,
    bound_address: PortalAddress,
    advertised_address: PortalAddress,
    callbacks: Option<Arc<dyn PortalCallbacks>>,
    sessions: Mutex<HashMap<Handle, Session>>,
    state: Mutex<PortalState>,
}

/// A listening or worker portal. Clones refer to the same portal.
#[derive(Clone)]
pub struct Portal {
    inner: Arc<PortalInner>,
}

impl fmt::Debug for Portal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Portal")
            .field("handle", &self.inner.handle)
            .field("bound_address", &self.inner.bound_address.as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Portal {
    /// Start a listening portal on `uri`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a bad address, a resource error if
    /// the engine cannot bind, or a queue error if registration fails.
    pub fn listen(
        queue: &EventQueueHandle,
        uri: &str,
        callbacks: Arc<dyn PortalCallbacks>,
    ) -> Result<Self, PortalError> {
        Self::start(queue, uri, Some(callbacks))
    }

    /// Start a worker portal on `uri`. It only receives forwarded sessions.
    ///
    /// # Errors
    ///
    /// Same as [`Portal::listen`].
    pub fn worker(queue: &EventQueueHandle, uri: &str) -> Result<Self, PortalError> {
        Self::start(queue, uri, None)
    }

    fn start(
        queue: &EventQueueHandle,
        uri: &str,
        callbacks: Option<Arc<dyn PortalCallbacks>>,
    ) -> Result<Self, PortalError> {
        let requested = PortalAddress::parse(uri).map_err(|e| {
            error!(target: "portal.portal", uri = %uri, error = %e, "Invalid portal address");
            PortalError::from(e)
        })?;

        let boundary = queue.boundary();
        let binding = boundary
            .start_listening(&requested, queue.id())
            .map_err(|e| {
                error!(
                    target: "portal.portal",
                    address = %requested,
                    error = %e,
                    "Failed to start listening"
                );
                PortalError::listen_failed(requested.as_str(), &e)
            })?;

        if !binding.handle.is_valid() {
            error!(
                target: "portal.portal",
                address = %requested,
                "Engine returned the invalid handle for a portal"
            );
            return Err(PortalError::ListenFailed {
                address: requested.to_string(),
                reason: "engine returned the invalid handle".to_string(),
            });
        }

        let derived = requested
            .with_port(binding.port)
            .and_then(|bound| Ok((bound, requested.with_port(0)?)));
        let (bound_address, advertised_address) = match derived {
            Ok(pair) => pair,
            Err(e) => {
                boundary.stop_listening(binding.handle);
                return Err(e.into());
            }
        };

        let inner = Arc::new(PortalInner {
            handle: binding.handle,
            queue: queue.clone(),
            bound_address,
            advertised_address,
            callbacks,
            sessions: Mutex::new(HashMap::new()),
            state: Mutex::new(PortalState::Listening),
        });

        if let Err(e) = queue.add_eventable(Arc::clone(&inner) as Arc<dyn Eventable>) {
            boundary.stop_listening(binding.handle);
            return Err(e.into());
        }

        info!(
            target: "portal.portal",
            handle = %inner.handle,
            bound_address = %inner.bound_address,
            advertised_address = %inner.advertised_address,
            queue_id = %queue.id(),
            worker = inner.callbacks.is_none(),
            "Portal listening"
        );

        Ok(Self { inner })
    }

    pub(crate) fn from_inner(inner: Arc<PortalInner>) -> Self {
        Self { inner }
    }

    /// Identity handle.
    #[must_use]
    pub fn handle(&self) -> Handle {
        self.inner.handle
    }

    /// Address with the literal bound port.
    #[must_use]
    pub fn bound_address(&self) -> &PortalAddress {
        &self.inner.bound_address
    }

    /// Port assigned by the engine.
    #[must_use]
    pub fn bound_port(&self) -> u16 {
        self.inner.bound_address.port().unwrap_or_default()
    }

    /// Address published to clients: the bound address with port `0`.
    #[must_use]
    pub fn advertised_address(&self) -> &PortalAddress {
        &self.inner.advertised_address
    }

    /// Queue this portal is dispatched on.
    #[must_use]
    pub fn queue_id(&self) -> QueueId {
        self.inner.queue.id()
    }

    #[must_use]
    pub fn state(&self) -> PortalState {
        *self.inner.state.lock()
    }

    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.inner.is_closing()
    }

    /// Snapshot of the owned sessions.
    #[must_use]
    pub fn sessions(&self) -> Vec<Session> {
        self.inner.sessions.lock().values().cloned().collect()
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    /// Whether `session` is in this portal's owned set.
    #[must_use]
    pub fn owns(&self, session: &Session) -> bool {
        self.inner
            .sessions
            .lock()
            .get(&session.handle())
            .is_some_and(|owned| owned.ptr_eq(session))
    }

    /// Admit a pending session with this portal as its owner.
    ///
    /// # Errors
    ///
    /// Fails if this portal is closing, the session is not a pending server
    /// session, registration fails, or the engine cannot admit it.
    pub fn accept(&self, session: &Session) -> Result<(), PortalError> {
        self.inner.admit(session, &Admission::Accept)
    }

    /// Hand a pending session to `target` instead of accepting it here.
    ///
    /// Forwarding to this portal is treated as `accept`. A wildcard host in
    /// the target's address is replaced by the host the session arrived on.
    ///
    /// # Errors
    ///
    /// Same as [`Portal::accept`], plus address errors from the host rewrite.
    /// Fails with [`PortalError::PortalClosing`] if either portal is closing.
    pub fn forward(&self, target: &Portal, session: &Session) -> Result<(), PortalError> {
        if Arc::ptr_eq(&self.inner, &target.inner) {
            warn!(
                target: "portal.portal",
                handle = %self.inner.handle,
                session = %session.handle(),
                "Forward to self, accepting instead"
            );
            return self.accept(session);
        }

        if self.inner.is_closing() {
            warn!(
                target: "portal.portal",
                handle = %self.inner.handle,
                session = %session.handle(),
                target_portal = %target.inner.handle,
                "Portal is closing, refusing to forward"
            );
            return Err(PortalError::PortalClosing(self.inner.handle));
        }

        let key = session
            .key()
            .ok_or(PortalError::NotAServerSession(session.handle()))?;

        let mut address = target.inner.bound_address.clone();
        if address.host_is_unspecified() {
            let peer_host = uri_host(key.uri())?;
            address = address.with_host(&peer_host)?;
            debug!(
                target: "portal.portal",
                session = %session.handle(),
                address = %address,
                "Rewrote wildcard forward address"
            );
        }

        target.inner.admit(session, &Admission::Forward(address))
    }

    /// Refuse a pending connection. `payload` is returned to the peer.
    pub fn reject(&self, key: &SessionKey, reason: EventReason, payload: &[u8]) {
        self.inner
            .queue
            .boundary()
            .reject_session(key.pending_ptr(), reason, payload);
        record_session_rejected();
        debug!(
            target: "portal.portal",
            handle = %self.inner.handle,
            pending = %key.pending_ptr(),
            reason = ?reason,
            payload_len = payload.len(),
            "Session rejected"
        );
    }

    /// Close owned sessions and stop listening.
    ///
    /// Returns `false` if the portal is already closing or has no valid
    /// handle. The portal is deregistered only when the engine confirms.
    pub fn close(&self) -> bool {
        let handle = self.inner.handle;
        {
            let mut state = self.inner.state.lock();
            if *state != PortalState::Listening {
                warn!(
                    target: "portal.portal",
                    handle = %handle,
                    state = state.as_str(),
                    "Attempting to close a portal that is already closing"
                );
                return false;
            }
            if !handle.is_valid() {
                error!(target: "portal.portal", "Closing a portal with the invalid handle");
                return false;
            }
            *state = PortalState::Closing;
        }

        let sessions = self.sessions();
        for session in sessions.iter().filter(|s| !s.is_closing()) {
            debug!(
                target: "portal.portal",
                handle = %handle,
                session = %session.handle(),
                "Closing session from portal close"
            );
            session.close();
        }

        self.inner.queue.boundary().stop_listening(handle);

        info!(
            target: "portal.portal",
            handle = %handle,
            sessions_closed = sessions.len(),
            "Portal closing"
        );
        true
    }
}

impl PortalInner {
    fn is_closing(&self) -> bool {
        *self.state.lock() != PortalState::Listening
    }

    fn admit(self: &Arc<Self>, session: &Session, admission: &Admission) -> Result<(), PortalError> {
        // Held throughout so a concurrent close cannot miss this session.
        let state = self.state.lock();
        if *state != PortalState::Listening {
            warn!(
                target: "portal.portal",
                handle = %self.handle,
                session = %session.handle(),
                "Portal is closing, refusing admission"
            );
            return Err(PortalError::PortalClosing(self.handle));
        }

        let key = session
            .key()
            .ok_or(PortalError::NotAServerSession(session.handle()))?;

        let mut slot = session.lock_slot();
        if slot.state != SessionState::Pending {
            return Err(PortalError::SessionNotPending {
                handle: session.handle(),
                state: slot.state,
            });
        }

        // Refuses a second object for the same connection before the engine is asked
        let _registration = self.queue.add_eventable(session.as_eventable())?;

        let boundary = self.queue.boundary();
        let result = match admission {
            Admission::Accept => boundary.admit_session(key.pending_ptr(), self.handle),
            Admission::Forward(address) => {
                boundary.forward_session(address, key.pending_ptr(), self.handle)
            }
        };

        let native = match result {
            Ok(native) if !native.is_null() => native,
            other => {
                let reason = match other {
                    Err(e) => e.to_string(),
                    Ok(_) => "engine returned a null session".to_string(),
                };
                if let Err(e) = self.queue.remove_eventable(session.handle()) {
                    warn!(
                        target: "portal.portal",
                        handle = %self.handle,
                        session = %session.handle(),
                        error = %e,
                        "Failed to deregister session after admission failure"
                    );
                }
                error!(
                    target: "portal.portal",
                    handle = %self.handle,
                    session = %session.handle(),
                    mode = admission.as_str(),
                    reason = %reason,
                    "Session admission failed"
                );
                return Err(PortalError::AdmissionFailed {
                    session: session.handle(),
                    reason,
                });
            }
        };

        slot.native = native;
        slot.state = SessionState::Owned;
        slot.owner = Some(Arc::downgrade(self));
        slot.queue = Some(self.queue.clone());
        self.sessions.lock().insert(session.handle(), session.clone());
        drop(slot);
        drop(state);

        record_session_admitted(admission.as_str());
        info!(
            target: "portal.portal",
            handle = %self.handle,
            session = %session.handle(),
            native = %native,
            mode = admission.as_str(),
            queue_id = %self.queue.id(),
            "Session admitted"
        );
        Ok(())
    }

    pub(crate) fn remove_session(&self, session: Handle) -> bool {
        let removed = self.sessions.lock().remove(&session).is_some();
        if removed {
            debug!(
                target: "portal.portal",
                handle = %self.handle,
                session = %session,
                "Session removed from portal"
            );
        }
        removed
    }

    fn on_session_error(&self, name: EventName, reason: EventReason, ctx: &mut DispatchContext<'_>) {
        if name.is_terminal() {
            ctx.deregister(self.handle);
            *self.state.lock() = PortalState::Closed;
            info!(
                target: "portal.portal",
                handle = %self.handle,
                event = name.as_str(),
                "Portal closed"
            );
        }

        match &self.callbacks {
            Some(callbacks) => {
                invoke_guarded("portal.on_session_event", || {
                    callbacks.on_session_event(name, reason);
                });
            }
            None => debug!(
                target: "portal.portal",
                handle = %self.handle,
                event = name.as_str(),
                "Worker portal event"
            ),
        }
    }

    fn on_new_session(&self, key: SessionKey, source_address: &str) {
        if self.is_closing() {
            debug!(
                target: "portal.portal",
                handle = %self.handle,
                pending = %key.pending_ptr(),
                "Portal is closing, dropping new session request"
            );
            return;
        }

        let Some(callbacks) = &self.callbacks else {
            warn!(
                target: "portal.portal",
                handle = %self.handle,
                pending = %key.pending_ptr(),
                "Worker portal received a new session request, ignoring"
            );
            return;
        };

        debug!(
            target: "portal.portal",
            handle = %self.handle,
            pending = %key.pending_ptr(),
            uri = %key.uri(),
            source_address = %source_address,
            "New session request"
        );
        invoke_guarded("portal.on_session_new", || {
            callbacks.on_session_new(key, source_address);
        });
    }
}

impl Eventable for PortalInner {
    fn handle(&self) -> Handle {
        self.handle
    }

    fn is_closing(&self) -> bool {
        PortalInner::is_closing(self)
    }

    fn kind(&self) -> &'static str {
        "portal"
    }

    fn on_event(&self, event: Event, ctx: &mut DispatchContext<'_>) {
        match event {
            Event::SessionError { name, reason } => self.on_session_error(name, reason, ctx),
            Event::NewSession {
                pending,
                uri,
                source_address,
            } => self.on_new_session(SessionKey::new(pending, uri), &source_address),
        }
    }
}
