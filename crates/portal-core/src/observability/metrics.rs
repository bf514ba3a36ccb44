//! Metrics definitions for the portal control path.
//!
//! All metrics follow Prometheus naming conventions:
//! - `portal_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `event_type`: 2 values (session_error, new_session)
//! - `reason`: 3 values (stale, malformed, unexpected)
//! - `mode`: 2 values (accept, forward)
//! - `callback`: bounded by callback names (~3 values)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle.
///
/// Dispatch runs callbacks inline and must stay well under a millisecond,
/// so the dispatch buckets start at 10µs.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("portal_dispatch".to_string()),
            &[
                0.000_01, 0.000_05, 0.000_1, 0.000_5, 0.001, 0.005, 0.010, 0.050, 0.100,
            ],
        )
        .map_err(|e| format!("Failed to set dispatch duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Event Queue Metrics
// ============================================================================

/// Record an event delivered to its target.
///
/// Metric: `portal_events_dispatched_total`
/// Labels: `event_type`
pub fn record_event_dispatched(event_type: &'static str) {
    counter!("portal_events_dispatched_total", "event_type" => event_type).increment(1);
}

/// Record a dropped event.
///
/// Metric: `portal_events_dropped_total`
/// Labels: `reason` (stale, malformed, unexpected)
///
/// Stale drops are expected while objects close concurrently.
pub fn record_event_dropped(reason: &'static str) {
    counter!("portal_events_dropped_total", "reason" => reason).increment(1);
}

/// Record how long one dispatch took, user callbacks included.
///
/// Metric: `portal_dispatch_duration_seconds`
/// Labels: `event_type`
pub fn record_dispatch_duration(event_type: &'static str, duration: Duration) {
    histogram!("portal_dispatch_duration_seconds", "event_type" => event_type)
        .record(duration.as_secs_f64());
}

/// Count one object registered with any queue.
///
/// Metric: `portal_eventables_registered`
/// Labels: none
pub fn record_eventable_registered() {
    gauge!("portal_eventables_registered").increment(1.0);
}

/// Count objects leaving a queue.
///
/// Metric: `portal_eventables_registered`
/// Labels: none
pub fn record_eventable_deregistered(count: usize) {
    if count == 0 {
        return;
    }
    // usize to f64 conversion is safe for realistic registry sizes
    #[allow(clippy::cast_precision_loss)]
    gauge!("portal_eventables_registered").decrement(count as f64);
}

// ============================================================================
// Session Metrics
// ============================================================================

/// Record a session admitted by a portal.
///
/// Metric: `portal_sessions_admitted_total`
/// Labels: `mode` (accept, forward)
pub fn record_session_admitted(mode: &'static str) {
    counter!("portal_sessions_admitted_total", "mode" => mode).increment(1);
}

/// Metric: `portal_sessions_rejected_total`
pub fn record_session_rejected() {
    counter!("portal_sessions_rejected_total").increment(1);
}

/// Metric: `portal_sessions_closed_total`
pub fn record_session_closed() {
    counter!("portal_sessions_closed_total").increment(1);
}

/// Record a user callback that panicked.
///
/// Metric: `portal_callback_panics_total`
/// Labels: `callback`
pub fn record_callback_panic(callback: &'static str) {
    counter!("portal_callback_panics_total", "callback" => callback).increment(1);
}
