//! Events reported by the transport engine.
//!
//! The engine pushes [`RawEvent`]s: a target handle, a type code and an
//! encoded body. The dispatch task decodes them into the closed [`Event`]
//! enum before handing them to the target object.
//!
//! Body layout (big-endian):
//!
//! ```text
//! type 0 (session error):  i32 event_name | i32 reason
//! type 5 (new session):    u64 pending_ptr | u16 uri_len | uri | u16 src_len | src
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use common::types::{Handle, PendingSessionPtr};
use thiserror::Error;

/// Type code of session lifecycle/error events.
pub const SESSION_ERROR_EVENT: i32 = 0;

/// Type code of new inbound connection events.
pub const NEW_SESSION_EVENT: i32 = 5;

/// Error type for event decoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The type code is not one the control path handles.
    #[error("Unknown event type: {0}")]
    UnknownEventType(i32),

    /// The body ended early.
    #[error("Insufficient data")]
    InsufficientData,

    /// A string field is not UTF-8.
    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    /// Unknown event name index.
    #[error("Unknown event name: {0}")]
    UnknownEventName(i32),

    /// Unknown reason index.
    #[error("Unknown event reason: {0}")]
    UnknownReason(i32),
}

impl DecodeError {
    /// Label used when counting dropped events.
    #[must_use]
    pub const fn drop_reason(&self) -> &'static str {
        match self {
            DecodeError::UnknownEventType(_) => "unexpected",
            _ => "malformed",
        }
    }
}

/// Lifecycle event names carried by session error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    SessionReject,
    SessionTeardown,
    NewConnection,
    ConnectionEstablished,
    ConnectionClosed,
    ConnectionDisconnected,
    ConnectionRefused,
    ConnectionError,
    SessionError,
    SessionClosed,
    PortalClosed,
}

impl EventName {
    /// Decode from the engine's index.
    #[must_use]
    pub const fn from_index(index: i32) -> Option<Self> {
        Some(match index {
            0 => EventName::SessionReject,
            1 => EventName::SessionTeardown,
            2 => EventName::NewConnection,
            3 => EventName::ConnectionEstablished,
            4 => EventName::ConnectionClosed,
            5 => EventName::ConnectionDisconnected,
            6 => EventName::ConnectionRefused,
            7 => EventName::ConnectionError,
            8 => EventName::SessionError,
            9 => EventName::SessionClosed,
            10 => EventName::PortalClosed,
            _ => return None,
        })
    }

    /// The engine's index for this name.
    #[must_use]
    pub const fn index(&self) -> i32 {
        match self {
            EventName::SessionReject => 0,
            EventName::SessionTeardown => 1,
            EventName::NewConnection => 2,
            EventName::ConnectionEstablished => 3,
            EventName::ConnectionClosed => 4,
            EventName::ConnectionDisconnected => 5,
            EventName::ConnectionRefused => 6,
            EventName::ConnectionError => 7,
            EventName::SessionError => 8,
            EventName::SessionClosed => 9,
            EventName::PortalClosed => 10,
        }
    }

    /// Name as a string for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventName::SessionReject => "session_reject",
            EventName::SessionTeardown => "session_teardown",
            EventName::NewConnection => "new_connection",
            EventName::ConnectionEstablished => "connection_established",
            EventName::ConnectionClosed => "connection_closed",
            EventName::ConnectionDisconnected => "connection_disconnected",
            EventName::ConnectionRefused => "connection_refused",
            EventName::ConnectionError => "connection_error",
            EventName::SessionError => "session_error",
            EventName::SessionClosed => "session_closed",
            EventName::PortalClosed => "portal_closed",
        }
    }

    /// Definitive closure; the target's handle must stop resolving afterwards.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, EventName::SessionClosed | EventName::PortalClosed)
    }

    /// The peer or the link started tearing the session down.
    #[must_use]
    pub const fn is_peer_teardown(&self) -> bool {
        matches!(
            self,
            EventName::SessionTeardown
                | EventName::SessionReject
                | EventName::ConnectionClosed
                | EventName::ConnectionDisconnected
                | EventName::ConnectionRefused
                | EventName::ConnectionError
                | EventName::SessionError
        )
    }
}

/// Reason codes attached to session events and rejections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventReason {
    Success,
    Busy,
    Refused,
    Timeout,
    NotConnected,
    Rejected,
    UnknownError,
}

impl EventReason {
    /// Decode from the engine's index.
    #[must_use]
    pub const fn from_index(index: i32) -> Option<Self> {
        Some(match index {
            0 => EventReason::Success,
            1 => EventReason::Busy,
            2 => EventReason::Refused,
            3 => EventReason::Timeout,
            4 => EventReason::NotConnected,
            5 => EventReason::Rejected,
            6 => EventReason::UnknownError,
            _ => return None,
        })
    }

    /// The engine's index for this reason.
    #[must_use]
    pub const fn index(&self) -> i32 {
        match self {
            EventReason::Success => 0,
            EventReason::Busy => 1,
            EventReason::Refused => 2,
            EventReason::Timeout => 3,
            EventReason::NotConnected => 4,
            EventReason::Rejected => 5,
            EventReason::UnknownError => 6,
        }
    }
}

/// An event as pushed by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// Handle of the target portal or session.
    pub handle: Handle,
    /// Type discriminator.
    pub event_type: i32,
    /// Encoded body.
    pub body: Bytes,
}

impl RawEvent {
    /// Encode a session error/lifecycle event.
    #[must_use]
    pub fn session_error(handle: Handle, name: EventName, reason: EventReason) -> Self {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_i32(name.index());
        buf.put_i32(reason.index());
        Self {
            handle,
            event_type: SESSION_ERROR_EVENT,
            body: buf.freeze(),
        }
    }

    /// Encode a new inbound connection event.
    ///
    /// Strings longer than `u16::MAX` bytes are truncated at a character boundary.
    #[must_use]
    pub fn new_session(
        handle: Handle,
        pending: PendingSessionPtr,
        uri: &str,
        source_address: &str,
    ) -> Self {
        let mut buf = BytesMut::with_capacity(12 + uri.len() + source_address.len());
        buf.put_u64(pending.as_u64());
        put_str(&mut buf, uri);
        put_str(&mut buf, source_address);
        Self {
            handle,
            event_type: NEW_SESSION_EVENT,
            body: buf.freeze(),
        }
    }
}

/// A decoded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Lifecycle or error notification for a portal or session.
    SessionError {
        name: EventName,
        reason: EventReason,
    },
    /// A remote peer asks to connect to a listening portal.
    NewSession {
        pending: PendingSessionPtr,
        uri: String,
        source_address: String,
    },
}

impl Event {
    /// Decode a raw event.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown type codes, short bodies, non-UTF-8
    /// strings and unknown name/reason indices.
    pub fn decode(raw: &RawEvent) -> Result<Self, DecodeError> {
        let mut body = raw.body.clone();
        match raw.event_type {
            SESSION_ERROR_EVENT => {
                if body.remaining() < 8 {
                    return Err(DecodeError::InsufficientData);
                }
                let name_index = body.get_i32();
                let reason_index = body.get_i32();
                let name = EventName::from_index(name_index)
                    .ok_or(DecodeError::UnknownEventName(name_index))?;
                let reason = EventReason::from_index(reason_index)
                    .ok_or(DecodeError::UnknownReason(reason_index))?;
                Ok(Event::SessionError { name, reason })
            }
            NEW_SESSION_EVENT => {
                if body.remaining() < 8 {
                    return Err(DecodeError::InsufficientData);
                }
                let pending = PendingSessionPtr::new(body.get_u64());
                let uri = get_str(&mut body, "uri")?;
                let source_address = get_str(&mut body, "source address")?;
                Ok(Event::NewSession {
                    pending,
                    uri,
                    source_address,
                })
            }
            other => Err(DecodeError::UnknownEventType(other)),
        }
    }

    /// Bounded label for metrics.
    #[must_use]
    pub const fn type_label(&self) -> &'static str {
        match self {
            Event::SessionError { .. } => "session_error",
            Event::NewSession { .. } => "new_session",
        }
    }
}

fn put_str(buf: &mut BytesMut, value: &str) {
    let mut end = value.len().min(usize::from(u16::MAX));
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    let bytes = value.as_bytes().get(..end).unwrap_or_default();
    buf.put_u16(u16::try_from(end).unwrap_or(u16::MAX));
    buf.extend_from_slice(bytes);
}

fn get_str(body: &mut Bytes, field: &'static str) -> Result<String, DecodeError> {
    if body.remaining() < 2 {
        return Err(DecodeError::InsufficientData);
    }
    let len = usize::from(body.get_u16());
    if body.remaining() < len {
        return Err(DecodeError::InsufficientData);
    }
    let raw = body.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::InvalidUtf8(field))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_session_error() {
        let raw = RawEvent::session_error(
            Handle::new(9),
            EventName::PortalClosed,
            EventReason::Success,
        );
        assert_eq!(raw.event_type, SESSION_ERROR_EVENT);
        assert_eq!(
            Event::decode(&raw).unwrap(),
            Event::SessionError {
                name: EventName::PortalClosed,
                reason: EventReason::Success
            }
        );
    }

    #[test]
    fn test_decode_new_session() {
        let raw = RawEvent::new_session(
            Handle::new(1),
            PendingSessionPtr::new(0xabc),
            "rdma://1.2.3.4:5000",
            "1.2.3.4",
        );
        let event = Event::decode(&raw).unwrap();
        assert_eq!(
            event,
            Event::NewSession {
                pending: PendingSessionPtr::new(0xabc),
                uri: "rdma://1.2.3.4:5000".to_string(),
                source_address: "1.2.3.4".to_string(),
            }
        );
        assert_eq!(event.type_label(), "new_session");
    }

    #[test]
    fn test_unknown_type_code() {
        let raw = RawEvent {
            handle: Handle::new(1),
            event_type: 3,
            body: Bytes::new(),
        };
        let err = Event::decode(&raw).unwrap_err();
        assert_eq!(err, DecodeError::UnknownEventType(3));
        assert_eq!(err.drop_reason(), "unexpected");
    }

    #[test]
    fn test_truncated_bodies() {
        let raw = RawEvent {
            handle: Handle::new(1),
            event_type: SESSION_ERROR_EVENT,
            body: Bytes::from_static(&[0, 0, 0, 9]),
        };
        assert_eq!(Event::decode(&raw), Err(DecodeError::InsufficientData));

        let mut full = RawEvent::new_session(Handle::new(1), PendingSessionPtr::new(1), "abc", "d");
        full.body = full.body.slice(..full.body.len() - 1);
        assert_eq!(Event::decode(&full), Err(DecodeError::InsufficientData));
    }

    #[test]
    fn test_unknown_name_and_reason() {
        let mut buf = BytesMut::new();
        buf.put_i32(42);
        buf.put_i32(0);
        let raw = RawEvent {
            handle: Handle::new(1),
            event_type: SESSION_ERROR_EVENT,
            body: buf.freeze(),
        };
        assert_eq!(Event::decode(&raw), Err(DecodeError::UnknownEventName(42)));

        let mut buf = BytesMut::new();
        buf.put_i32(EventName::SessionClosed.index());
        buf.put_i32(-1);
        let raw = RawEvent {
            handle: Handle::new(1),
            event_type: SESSION_ERROR_EVENT,
            body: buf.freeze(),
        };
        let err = Event::decode(&raw).unwrap_err();
        assert_eq!(err, DecodeError::UnknownReason(-1));
        assert_eq!(err.drop_reason(), "malformed");
    }

    #[test]
    fn test_invalid_utf8() {
        let mut buf = BytesMut::new();
        buf.put_u64(1);
        buf.put_u16(2);
        buf.extend_from_slice(&[0xff, 0xfe]);
        buf.put_u16(0);
        let raw = RawEvent {
            handle: Handle::new(1),
            event_type: NEW_SESSION_EVENT,
            body: buf.freeze(),
        };
        assert_eq!(Event::decode(&raw), Err(DecodeError::InvalidUtf8("uri")));
    }

    #[test]
    fn test_name_indices_are_stable() {
        for index in 0..=10 {
            let name = EventName::from_index(index).unwrap();
            assert_eq!(name.index(), index);
        }
        assert!(EventName::from_index(11).is_none());
        for index in 0..=6 {
            assert_eq!(EventReason::from_index(index).unwrap().index(), index);
        }
    }

    #[test]
    fn test_terminal_names() {
        assert!(EventName::SessionClosed.is_terminal());
        assert!(EventName::PortalClosed.is_terminal());
        assert!(!EventName::SessionTeardown.is_terminal());
        assert!(EventName::SessionTeardown.is_peer_teardown());
        assert!(!EventName::ConnectionEstablished.is_peer_teardown());
    }
}
