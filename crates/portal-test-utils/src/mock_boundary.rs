//! In-memory transport engine for control-path testing.
//!
//! Records every boundary call and hands out handles, ports and native
//! pointers from counters. With terminal events enabled it also plays the
//! engine's part of a teardown: `stop_listening` is answered with
//! `PortalClosed` and session closes with `SessionClosed`, pushed into the
//! queue the object belongs to.
//!
//! # Example
//!
//! ```rust,ignore
//! use portal_test_utils::MockBoundary;
//!
//! let boundary = MockBoundary::new().with_port(34567).with_terminal_events();
//! let (queue, task) = EventQueueHandler::spawn(boundary.shared(), &QueueConfig::default());
//! boundary.attach(&queue);
//!
//! let portal = Portal::worker(&queue, "rdma://0.0.0.0:9999").unwrap();
//! assert_eq!(portal.bound_port(), 34567);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use common::types::{Handle, NativeSessionPtr, PendingSessionPtr, QueueId};
use portal_core::boundary::{BoundaryError, ListenerBinding, TransportBoundary};
use portal_core::event::{EventName, EventReason, RawEvent};
use portal_core::queue::{EventQueueHandle, RawEventSender};
use portal_core::PortalAddress;

/// First handle handed out for portals and client sessions.
pub const FIRST_HANDLE: u64 = 0x1000;

/// First native session pointer handed out on admission.
pub const FIRST_NATIVE_PTR: u64 = 0x9000;

/// First port assigned when no fixed port is configured.
pub const FIRST_PORT: u16 = 40000;

/// One recorded boundary call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundaryCall {
    StartListening {
        address: String,
        queue: QueueId,
    },
    StopListening {
        portal: Handle,
    },
    AdmitSession {
        pending: PendingSessionPtr,
        owner: Handle,
    },
    ForwardSession {
        address: String,
        pending: PendingSessionPtr,
        owner: Handle,
    },
    RejectSession {
        pending: PendingSessionPtr,
        reason: EventReason,
        payload: Vec<u8>,
    },
    ConnectSession {
        address: String,
        queue: QueueId,
    },
    CloseServerSession {
        session: NativeSessionPtr,
    },
    CloseClientSession {
        session: Handle,
    },
}

/// Mock transport engine.
#[derive(Debug, Clone)]
pub struct MockBoundary {
    inner: Arc<Mutex<MockBoundaryInner>>,
}

#[derive(Debug)]
struct MockBoundaryInner {
    calls: Vec<BoundaryCall>,
    next_handle: u64,
    next_native: u64,
    next_port: u16,
    fixed_port: Option<u16>,
    fail_listen: bool,
    invalid_listen_handle: bool,
    fail_admit: bool,
    null_native: bool,
    fail_connect: bool,
    terminal_events: bool,
    /// Event producers per attached queue
    senders: HashMap<QueueId, RawEventSender>,
    /// Queue each listening portal reports to
    listeners: HashMap<Handle, QueueId>,
    /// Session handle and queue per admitted native session
    server_sessions: HashMap<NativeSessionPtr, (Handle, QueueId)>,
    /// Queue each client session reports to
    client_sessions: HashMap<Handle, QueueId>,
}

impl Default for MockBoundary {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBoundary {
    /// Create a mock that succeeds at everything and emits no events.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockBoundaryInner {
                calls: Vec::new(),
                next_handle: FIRST_HANDLE,
                next_native: FIRST_NATIVE_PTR,
                next_port: FIRST_PORT,
                fixed_port: None,
                fail_listen: false,
                invalid_listen_handle: false,
                fail_admit: false,
                null_native: false,
                fail_connect: false,
                terminal_events: false,
                senders: HashMap::new(),
                listeners: HashMap::new(),
                server_sessions: HashMap::new(),
                client_sessions: HashMap::new(),
            })),
        }
    }

    /// Assign this port to every listener.
    #[must_use]
    pub fn with_port(self, port: u16) -> Self {
        self.inner.lock().unwrap().fixed_port = Some(port);
        self
    }

    /// Fail `start_listening` with a bind error.
    #[must_use]
    pub fn with_listen_failure(self) -> Self {
        self.inner.lock().unwrap().fail_listen = true;
        self
    }

    /// Answer `start_listening` with the sentinel handle.
    #[must_use]
    pub fn with_invalid_listen_handle(self) -> Self {
        self.inner.lock().unwrap().invalid_listen_handle = true;
        self
    }

    /// Fail `admit_session` and `forward_session`.
    #[must_use]
    pub fn with_admit_failure(self) -> Self {
        self.inner.lock().unwrap().fail_admit = true;
        self
    }

    /// Answer admissions with a null native pointer.
    #[must_use]
    pub fn with_null_native(self) -> Self {
        self.inner.lock().unwrap().null_native = true;
        self
    }

    /// Fail `connect_session`.
    #[must_use]
    pub fn with_connect_failure(self) -> Self {
        self.inner.lock().unwrap().fail_connect = true;
        self
    }

    /// Answer teardown calls with terminal events on attached queues.
    #[must_use]
    pub fn with_terminal_events(self) -> Self {
        self.inner.lock().unwrap().terminal_events = true;
        self
    }

    /// Let the mock push events into `queue`.
    pub fn attach(&self, queue: &EventQueueHandle) {
        self.inner
            .lock()
            .unwrap()
            .senders
            .insert(queue.id(), queue.event_sender());
    }

    /// The mock as a boundary trait object, sharing state with `self`.
    #[must_use]
    pub fn shared(&self) -> Arc<dyn TransportBoundary> {
        Arc::new(self.clone())
    }

    /// Every call recorded so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<BoundaryCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.inner.lock().unwrap().calls.clear();
    }

    /// Recorded `reject_session` calls.
    #[must_use]
    pub fn reject_calls(&self) -> Vec<BoundaryCall> {
        self.filter_calls(|c| matches!(c, BoundaryCall::RejectSession { .. }))
    }

    /// Recorded `forward_session` calls.
    #[must_use]
    pub fn forward_calls(&self) -> Vec<BoundaryCall> {
        self.filter_calls(|c| matches!(c, BoundaryCall::ForwardSession { .. }))
    }

    /// Recorded `admit_session` calls.
    #[must_use]
    pub fn admit_calls(&self) -> Vec<BoundaryCall> {
        self.filter_calls(|c| matches!(c, BoundaryCall::AdmitSession { .. }))
    }

    /// Number of `stop_listening` calls for `portal`.
    #[must_use]
    pub fn stop_listening_count(&self, portal: Handle) -> usize {
        self.filter_calls(|c| matches!(c, BoundaryCall::StopListening { portal: p } if *p == portal))
            .len()
    }

    /// Number of server or client session close calls.
    #[must_use]
    pub fn session_close_count(&self) -> usize {
        self.filter_calls(|c| {
            matches!(
                c,
                BoundaryCall::CloseServerSession { .. } | BoundaryCall::CloseClientSession { .. }
            )
        })
        .len()
    }

    fn filter_calls(&self, pred: impl Fn(&BoundaryCall) -> bool) -> Vec<BoundaryCall> {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| pred(c))
            .cloned()
            .collect()
    }
}

impl MockBoundaryInner {
    fn record(&mut self, call: BoundaryCall) {
        self.calls.push(call);
    }

    fn allocate_handle(&mut self) -> Handle {
        let handle = Handle::new(self.next_handle);
        self.next_handle += 1;
        handle
    }

    fn emit(&self, queue: QueueId, event: RawEvent) {
        if !self.terminal_events {
            return;
        }
        if let Some(sender) = self.senders.get(&queue) {
            let _ = sender.try_send(event);
        }
    }

    fn admit(&mut self, pending: PendingSessionPtr, owner: Handle) -> Result<NativeSessionPtr, BoundaryError> {
        if self.fail_admit {
            return Err(BoundaryError::Engine("admission refused".to_string()));
        }
        if self.null_native {
            return Ok(NativeSessionPtr::NULL);
        }
        let native = NativeSessionPtr::new(self.next_native);
        self.next_native += 1;
        if let Some(queue) = self.listeners.get(&owner).copied() {
            self.server_sessions
                .insert(native, (pending.session_handle(), queue));
        }
        Ok(native)
    }
}

impl TransportBoundary for MockBoundary {
    fn start_listening(
        &self,
        address: &PortalAddress,
        queue: QueueId,
    ) -> Result<ListenerBinding, BoundaryError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record(BoundaryCall::StartListening {
            address: address.to_string(),
            queue,
        });

        if inner.fail_listen {
            return Err(BoundaryError::Bind(format!("cannot bind {address}")));
        }
        if inner.invalid_listen_handle {
            return Ok(ListenerBinding {
                handle: Handle::INVALID,
                port: 0,
            });
        }

        let handle = inner.allocate_handle();
        let port = match inner.fixed_port {
            Some(port) => port,
            None => {
                let port = inner.next_port;
                inner.next_port += 1;
                port
            }
        };
        inner.listeners.insert(handle, queue);
        Ok(ListenerBinding { handle, port })
    }

    fn stop_listening(&self, portal: Handle) {
        let mut inner = self.inner.lock().unwrap();
        inner.record(BoundaryCall::StopListening { portal });
        if let Some(queue) = inner.listeners.get(&portal).copied() {
            inner.emit(
                queue,
                RawEvent::session_error(portal, EventName::PortalClosed, EventReason::Success),
            );
        }
    }

    fn admit_session(
        &self,
        pending: PendingSessionPtr,
        owner: Handle,
    ) -> Result<NativeSessionPtr, BoundaryError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record(BoundaryCall::AdmitSession { pending, owner });
        inner.admit(pending, owner)
    }

    fn forward_session(
        &self,
        target: &PortalAddress,
        pending: PendingSessionPtr,
        owner: Handle,
    ) -> Result<NativeSessionPtr, BoundaryError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record(BoundaryCall::ForwardSession {
            address: target.to_string(),
            pending,
            owner,
        });
        inner.admit(pending, owner)
    }

    fn reject_session(&self, pending: PendingSessionPtr, reason: EventReason, payload: &[u8]) {
        self.inner
            .lock()
            .unwrap()
            .record(BoundaryCall::RejectSession {
                pending,
                reason,
                payload: payload.to_vec(),
            });
    }

    fn connect_session(
        &self,
        address: &PortalAddress,
        queue: QueueId,
    ) -> Result<Handle, BoundaryError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record(BoundaryCall::ConnectSession {
            address: address.to_string(),
            queue,
        });
        if inner.fail_connect {
            return Err(BoundaryError::Engine("connection refused".to_string()));
        }
        let handle = inner.allocate_handle();
        inner.client_sessions.insert(handle, queue);
        Ok(handle)
    }

    fn close_server_session(&self, session: NativeSessionPtr) {
        let mut inner = self.inner.lock().unwrap();
        inner.record(BoundaryCall::CloseServerSession { session });
        if let Some((handle, queue)) = inner.server_sessions.get(&session).copied() {
            inner.emit(
                queue,
                RawEvent::session_error(handle, EventName::SessionClosed, EventReason::Success),
            );
        }
    }

    fn close_client_session(&self, session: Handle) {
        let mut inner = self.inner.lock().unwrap();
        inner.record(BoundaryCall::CloseClientSession { session });
        if let Some(queue) = inner.client_sessions.get(&session).copied() {
            inner.emit(
                queue,
                RawEvent::session_error(session, EventName::SessionClosed, EventReason::Success),
            );
        }
    }
}
