//! Event Queue Handler.
//!
//! Routes raw engine events to registered portals and sessions. See
//! [`EventQueueHandler`] for the dispatch model.

mod eventable;
mod handler;
mod messages;

pub use eventable::{DispatchContext, Eventable};
pub use handler::{
    EventQueueHandle, EventQueueHandler, QueueConfig, RawEventSender, Registration,
    DEFAULT_MAILBOX_CAPACITY, DEFAULT_STOP_TIMEOUT,
};
pub use messages::QueueStatus;
