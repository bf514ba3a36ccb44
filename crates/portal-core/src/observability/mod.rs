//! Observability for the portal control path.
//!
//! # Logging
//!
//! Log targets are `portal.queue`, `portal.portal`, `portal.session` and
//! `portal.callbacks`. Stale events log at debug; undecodable events and
//! misuse at warn; construction and admission failures at error.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `portal_events_dispatched_total` | Counter | `event_type` | Events delivered to a target |
//! | `portal_events_dropped_total` | Counter | `reason` | Stale, malformed or unexpected events |
//! | `portal_dispatch_duration_seconds` | Histogram | `event_type` | Time spent per dispatch |
//! | `portal_eventables_registered` | Gauge | none | Objects registered across queues |
//! | `portal_sessions_admitted_total` | Counter | `mode` | Accepted and forwarded sessions |
//! | `portal_sessions_rejected_total` | Counter | none | Rejected connection requests |
//! | `portal_sessions_closed_total` | Counter | none | Sessions reaching `Closed` |
//! | `portal_callback_panics_total` | Counter | `callback` | Panicking user callbacks |

pub mod logging;
pub mod metrics;

pub use logging::init_tracing;
pub use metrics::init_metrics_recorder;
