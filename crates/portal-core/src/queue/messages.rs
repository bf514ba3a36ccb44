//! Mailbox messages of the Event Queue Handler.
//!
//! Events, registrations and deregistrations share one FIFO mailbox, so
//! their relative order is exactly the order they were sent in.

use std::fmt;
use std::sync::Arc;

use common::types::Handle;
use tokio::sync::oneshot;

use super::eventable::Eventable;
use crate::errors::QueueError;
use crate::event::RawEvent;

/// Messages sent to the dispatch task.
pub(crate) enum QueueMessage {
    /// A raw event from the transport engine.
    Event(RawEvent),

    /// Start resolving `eventable`'s handle.
    Register {
        eventable: Arc<dyn Eventable>,
        /// Response channel for the registration outcome.
        respond_to: oneshot::Sender<Result<(), QueueError>>,
    },

    /// Stop resolving `handle`.
    Deregister { handle: Handle },

    /// Barrier: answered once every earlier message is handled.
    Sync {
        /// Response channel for queue status.
        respond_to: oneshot::Sender<QueueStatus>,
    },
}

impl fmt::Debug for QueueMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueMessage::Event(raw) => f
                .debug_struct("Event")
                .field("handle", &raw.handle)
                .field("event_type", &raw.event_type)
                .finish(),
            QueueMessage::Register { eventable, .. } => f
                .debug_struct("Register")
                .field("handle", &eventable.handle())
                .field("kind", &eventable.kind())
                .finish(),
            QueueMessage::Deregister { handle } => {
                f.debug_struct("Deregister").field("handle", handle).finish()
            }
            QueueMessage::Sync { .. } => f.write_str("Sync"),
        }
    }
}

/// Snapshot of a queue's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStatus {
    /// Objects currently registered.
    pub registered: usize,
    /// Events delivered to a target.
    pub dispatched: u64,
    /// Events dropped (stale, malformed or unexpected).
    pub dropped: u64,
}
