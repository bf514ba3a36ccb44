//! RDMA Portal Control Path Library
//!
//! This library provides the control path of a high-performance messaging
//! transport. The transport engine owns connections at the wire level; this
//! crate decides what happens to them:
//!
//! - Listening portals that report inbound connection requests
//! - Admission decisions (accept, forward to a worker portal, reject)
//! - Session ownership and its transfer between portals
//! - Routing of engine events to the right portal or session
//!
//! # Architecture
//!
//! ```text
//! EventQueueHandler (one dispatch task per queue, any number of queues)
//! ├── resolves Handle -> Eventable
//! ├── Portal (listening or worker)
//! │   ├── owns N Sessions
//! │   └── PortalCallbacks (on_session_new, on_session_event)
//! └── Session (server or client)
//!     └── SessionCallbacks (on_session_event)
//! ```
//!
//! # Key Design Decisions
//!
//! - **One mailbox per queue**: events, registrations and deregistrations
//!   are totally ordered, so a session registered before admission can
//!   never miss its first event
//! - **Deferred deregistration**: `close` only requests teardown; objects
//!   leave their queue when the engine reports the terminal event
//! - **Stale is normal**: events for unknown handles are dropped quietly
//!
//! # Modules
//!
//! - [`address`] - Transport URIs and port/host rewriting
//! - [`boundary`] - Operations consumed from the transport engine
//! - [`event`] - Raw event codec and typed events
//! - [`queue`] - Event Queue Handler actor
//! - [`portal`] - Listening and worker portals
//! - [`session`] - Server and client sessions
//! - [`callbacks`] - User callback traits
//! - [`config`] - Configuration from environment
//! - [`errors`] - Error types and classification
//! - [`observability`] - Tracing setup and metrics

pub mod address;
pub mod boundary;
pub mod callbacks;
pub mod config;
pub mod errors;
pub mod event;
pub mod observability;
pub mod portal;
pub mod queue;
pub mod session;

pub use address::PortalAddress;
pub use boundary::{BoundaryError, ListenerBinding, TransportBoundary};
pub use callbacks::{PortalCallbacks, SessionCallbacks};
pub use errors::{ErrorKind, PortalError, QueueError};
pub use event::{Event, EventName, EventReason, RawEvent};
pub use portal::{Portal, PortalState};
pub use queue::{EventQueueHandle, EventQueueHandler, QueueConfig};
pub use session::{Session, SessionKey, SessionRole, SessionState};
