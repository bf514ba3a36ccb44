//! User callback surface.
//!
//! Callbacks run synchronously on the dispatch task of the queue the portal
//! or session is registered with. They must not block. Admission decisions
//! (`accept`, `forward`, `reject`) may be made from inside
//! [`PortalCallbacks::on_session_new`].

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::error;

use crate::event::{EventName, EventReason};
use crate::observability::metrics::record_callback_panic;
use crate::session::SessionKey;

/// Callbacks of a listening portal.
pub trait PortalCallbacks: Send + Sync {
    /// A remote peer asks to connect. The callee decides between accept,
    /// forward and reject; the portal takes no default action.
    fn on_session_new(&self, key: SessionKey, source_address: &str);

    /// Lifecycle or error notification addressed to the portal.
    fn on_session_event(&self, event: EventName, reason: EventReason);
}

/// Callbacks of a session.
pub trait SessionCallbacks: Send + Sync {
    /// Lifecycle or error notification addressed to the session.
    fn on_session_event(&self, event: EventName, reason: EventReason);
}

/// Run a user callback, containing any panic it raises.
///
/// Returns `false` if the callback panicked.
pub(crate) fn invoke_guarded<F>(callback: &'static str, f: F) -> bool
where
    F: FnOnce(),
{
    if catch_unwind(AssertUnwindSafe(f)).is_ok() {
        true
    } else {
        error!(
            target: "portal.callbacks",
            callback = callback,
            "User callback panicked"
        );
        record_callback_panic(callback);
        false
    }
}
