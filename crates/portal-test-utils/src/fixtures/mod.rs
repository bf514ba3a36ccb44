//! Pre-configured test data fixtures for control-path testing.
//!
//! Provides:
//! - Raw engine events addressed to a handle
//! - Callback implementations that record what they were told

use std::sync::Mutex;

use bytes::Bytes;
use common::types::{Handle, PendingSessionPtr};
use portal_core::callbacks::{PortalCallbacks, SessionCallbacks};
use portal_core::event::{EventName, EventReason, RawEvent};
use portal_core::queue::QueueConfig;
use portal_core::session::SessionKey;
use tokio::sync::mpsc;

/// Queue settings for tests: small mailbox, short stop timeout.
#[must_use]
pub fn test_queue_config() -> QueueConfig {
    QueueConfig {
        mailbox_capacity: 64,
        stop_timeout: std::time::Duration::from_secs(1),
    }
}

/// `NewSessionEvent` for the portal `portal`.
#[must_use]
pub fn new_session_event(portal: Handle, pending: u64, uri: &str, source_address: &str) -> RawEvent {
    RawEvent::new_session(portal, PendingSessionPtr::new(pending), uri, source_address)
}

/// Session error event with reason `Success`.
#[must_use]
pub fn lifecycle_event(handle: Handle, name: EventName) -> RawEvent {
    RawEvent::session_error(handle, name, EventReason::Success)
}

/// `SessionClosed` for `handle`.
#[must_use]
pub fn session_closed(handle: Handle) -> RawEvent {
    lifecycle_event(handle, EventName::SessionClosed)
}

/// `PortalClosed` for `handle`.
#[must_use]
pub fn portal_closed(handle: Handle) -> RawEvent {
    lifecycle_event(handle, EventName::PortalClosed)
}

/// Event with a type code the control path does not know.
#[must_use]
pub fn unknown_type_event(handle: Handle, event_type: i32) -> RawEvent {
    RawEvent {
        handle,
        event_type,
        body: Bytes::from_static(&[0, 0, 0, 0]),
    }
}

/// What a recording callback observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    NewSession {
        key: SessionKey,
        source_address: String,
    },
    SessionEvent {
        event: EventName,
        reason: EventReason,
    },
}

/// Portal callbacks that record every invocation.
///
/// Each invocation is also sent on the notification channel so async tests
/// can wait for it.
#[derive(Debug)]
pub struct RecordingPortalCallbacks {
    observed: Mutex<Vec<Observed>>,
    notify: mpsc::UnboundedSender<Observed>,
}

impl RecordingPortalCallbacks {
    /// Create the callbacks and the receiving end of their notifications.
    #[must_use]
    pub fn new() -> (std::sync::Arc<Self>, mpsc::UnboundedReceiver<Observed>) {
        let (notify, rx) = mpsc::unbounded_channel();
        (
            std::sync::Arc::new(Self {
                observed: Mutex::new(Vec::new()),
                notify,
            }),
            rx,
        )
    }

    /// Everything observed so far.
    #[must_use]
    pub fn observed(&self) -> Vec<Observed> {
        self.observed.lock().unwrap().clone()
    }

    /// Only the new-session invocations.
    #[must_use]
    pub fn new_sessions(&self) -> Vec<(SessionKey, String)> {
        self.observed()
            .into_iter()
            .filter_map(|o| match o {
                Observed::NewSession {
                    key,
                    source_address,
                } => Some((key, source_address)),
                Observed::SessionEvent { .. } => None,
            })
            .collect()
    }

    /// Only the lifecycle invocations.
    #[must_use]
    pub fn session_events(&self) -> Vec<(EventName, EventReason)> {
        self.observed()
            .into_iter()
            .filter_map(|o| match o {
                Observed::SessionEvent { event, reason } => Some((event, reason)),
                Observed::NewSession { .. } => None,
            })
            .collect()
    }

    fn push(&self, observed: Observed) {
        self.observed.lock().unwrap().push(observed.clone());
        let _ = self.notify.send(observed);
    }
}

impl PortalCallbacks for RecordingPortalCallbacks {
    fn on_session_new(&self, key: SessionKey, source_address: &str) {
        self.push(Observed::NewSession {
            key,
            source_address: source_address.to_string(),
        });
    }

    fn on_session_event(&self, event: EventName, reason: EventReason) {
        self.push(Observed::SessionEvent { event, reason });
    }
}

/// Session callbacks that record every invocation.
#[derive(Debug, Default)]
pub struct RecordingSessionCallbacks {
    events: Mutex<Vec<(EventName, EventReason)>>,
}

impl RecordingSessionCallbacks {
    #[must_use]
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::default())
    }

    /// Everything observed so far.
    #[must_use]
    pub fn events(&self) -> Vec<(EventName, EventReason)> {
        self.events.lock().unwrap().clone()
    }
}

impl SessionCallbacks for RecordingSessionCallbacks {
    fn on_session_event(&self, event: EventName, reason: EventReason) {
        self.events.lock().unwrap().push((event, reason));
    }
}

/// Portal callbacks that panic on every invocation.
#[derive(Debug, Default)]
pub struct PanickingPortalCallbacks;

impl PortalCallbacks for PanickingPortalCallbacks {
    fn on_session_new(&self, _key: SessionKey, _source_address: &str) {
        panic!("on_session_new exploded");
    }

    fn on_session_event(&self, _event: EventName, _reason: EventReason) {
        panic!("on_session_event exploded");
    }
}
