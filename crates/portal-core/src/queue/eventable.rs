//! Dispatchable objects and the registry that resolves them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use common::types::{Handle, QueueId};
use parking_lot::Mutex;

use crate::event::Event;

/// Anything an [`EventQueueHandler`](super::EventQueueHandler) can route events to.
pub trait Eventable: Send + Sync + 'static {
    /// Identity handle assigned by the transport engine.
    fn handle(&self) -> Handle;

    /// Monotonic closing flag. Never reset once set.
    fn is_closing(&self) -> bool;

    /// Short label for logs ("portal", "session").
    fn kind(&self) -> &'static str;

    /// Handle one decoded event. Runs on the dispatch task and must not block.
    fn on_event(&self, event: Event, ctx: &mut DispatchContext<'_>);
}

/// Handles claimed on one queue, shared between its handles and its dispatch task.
///
/// A handle is claimed by `add_eventable` before its registration is queued
/// and released once no registration for it remains, so duplicates are
/// refused synchronously.
pub(crate) type Claims = Arc<Mutex<HashSet<Handle>>>;

/// Handle-to-object table owned by one dispatch task.
///
/// Removal clears the entry, so resolving a removed handle is an ordinary
/// lookup that yields nothing.
#[derive(Default)]
pub(crate) struct Registry {
    entries: HashMap<Handle, Arc<dyn Eventable>>,
    claims: Claims,
}

impl Registry {
    pub(crate) fn with_claims(claims: Claims) -> Self {
        Self {
            entries: HashMap::new(),
            claims,
        }
    }

    pub(crate) fn insert(&mut self, eventable: Arc<dyn Eventable>) -> bool {
        let handle = eventable.handle();
        if self.entries.contains_key(&handle) {
            return false;
        }
        self.entries.insert(handle, eventable);
        true
    }

    /// Drop the entry only. The claim was already released by the handle.
    pub(crate) fn remove(&mut self, handle: Handle) -> bool {
        self.entries.remove(&handle).is_some()
    }

    /// Drop the entry and release its claim.
    pub(crate) fn evict(&mut self, handle: Handle) -> bool {
        let removed = self.entries.remove(&handle).is_some();
        if removed {
            self.claims.lock().remove(&handle);
        }
        removed
    }

    pub(crate) fn resolve(&self, handle: Handle) -> Option<Arc<dyn Eventable>> {
        self.entries.get(&handle).map(Arc::clone)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.claims.lock().clear();
        count
    }
}

/// Access to the dispatching queue from inside [`Eventable::on_event`].
///
/// Deregistration through the context takes effect before the next mailbox
/// message is processed.
pub struct DispatchContext<'a> {
    registry: &'a mut Registry,
    queue_id: QueueId,
    deregistered: usize,
}

impl<'a> DispatchContext<'a> {
    pub(crate) fn new(registry: &'a mut Registry, queue_id: QueueId) -> Self {
        Self {
            registry,
            queue_id,
            deregistered: 0,
        }
    }

    /// The queue running this dispatch.
    #[must_use]
    pub fn queue_id(&self) -> QueueId {
        self.queue_id
    }

    /// Remove `handle` from the dispatching queue. Idempotent.
    ///
    /// Returns whether the handle was registered.
    pub fn deregister(&mut self, handle: Handle) -> bool {
        let removed = self.registry.evict(handle);
        if removed {
            self.deregistered += 1;
        }
        removed
    }

    /// Whether `handle` currently resolves on this queue.
    #[must_use]
    pub fn is_registered(&self, handle: Handle) -> bool {
        self.registry.entries.contains_key(&handle)
    }

    pub(crate) fn deregistered(&self) -> usize {
        self.deregistered
    }
}
