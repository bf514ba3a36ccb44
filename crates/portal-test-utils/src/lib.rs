//! # Portal Test Utilities
//!
//! Shared test utilities for the portal control path.
//!
//! This crate provides a mock transport engine and test fixtures for
//! exercising portals, sessions and event queues without a real engine.
//!
//! ## Modules
//!
//! - `mock_boundary` - Recording transport engine that can answer teardown
//!   calls with terminal events
//! - `fixtures` - Raw events and recording callbacks
//!
//! ## Usage
//!
//! ```rust,ignore
//! use portal_test_utils::{fixtures::*, MockBoundary};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let boundary = MockBoundary::new().with_terminal_events();
//!     let (queue, task) = EventQueueHandler::spawn(boundary.shared(), &test_queue_config());
//!     boundary.attach(&queue);
//!
//!     let (callbacks, mut observed) = RecordingPortalCallbacks::new();
//!     let portal = Portal::listen(&queue, "rdma://0.0.0.0:9999", callbacks).unwrap();
//!
//!     queue
//!         .event_sender()
//!         .send(new_session_event(portal.handle(), 0x77, "rdma://1.2.3.4:5000", "1.2.3.4"))
//!         .await
//!         .unwrap();
//!     // ...
//! }
//! ```

pub mod fixtures;
pub mod mock_boundary;

pub use mock_boundary::{BoundaryCall, MockBoundary};
