//! `EventQueueHandler` - one dispatch task draining one event queue.
//!
//! The handler owns the handle-to-object registry and routes every raw event
//! to the object registered under the event's handle:
//!
//! - One tokio task per handler; events for objects on the same handler
//!   never run concurrently
//! - Independent handlers run in parallel and share nothing
//! - Unresolved handles are stale by definition and dropped at debug level
//! - Malformed bodies and unknown type codes are logged and dropped
//!
//! Registration, deregistration and events travel through the same FIFO
//! mailbox. An object registered before the engine is asked to act on it is
//! therefore resolvable by the time the engine's first event arrives.

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::types::{Handle, QueueId};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::eventable::{Claims, DispatchContext, Eventable, Registry};
use super::messages::{QueueMessage, QueueStatus};
use crate::boundary::TransportBoundary;
use crate::errors::QueueError;
use crate::event::{Event, RawEvent};
use crate::observability::metrics::{
    record_dispatch_duration, record_event_dispatched, record_event_dropped,
    record_eventable_deregistered, record_eventable_registered,
};

/// Default mailbox capacity.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 1000;

/// Default time `shutdown` waits for the dispatch task.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Sizing and shutdown settings of one handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Bounded mailbox size.
    pub mailbox_capacity: usize,
    /// How long `shutdown` waits before aborting the task.
    pub stop_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

fn map_try_send<T>(err: &mpsc::error::TrySendError<T>) -> QueueError {
    match err {
        mpsc::error::TrySendError::Full(_) => QueueError::MailboxFull,
        mpsc::error::TrySendError::Closed(_) => QueueError::Stopped,
    }
}

/// Pending outcome of [`EventQueueHandle::add_eventable`].
///
/// Dropping it is allowed; the registration still happens.
#[derive(Debug)]
pub struct Registration {
    handle: Handle,
    rx: oneshot::Receiver<Result<(), QueueError>>,
}

impl Registration {
    /// Handle being registered.
    #[must_use]
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Wait for the dispatch task to process the registration.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::AlreadyRegistered`] if the handle was taken, or
    /// [`QueueError::AcknowledgementLost`] if the task stopped first.
    pub async fn acknowledged(self) -> Result<(), QueueError> {
        self.rx
            .await
            .map_err(|_| QueueError::AcknowledgementLost)?
    }
}

/// Producer side used by the transport engine to push raw events.
#[derive(Debug, Clone)]
pub struct RawEventSender {
    sender: mpsc::Sender<QueueMessage>,
}

impl RawEventSender {
    /// Push an event, waiting for mailbox space.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Stopped`] if the dispatch task is gone.
    pub async fn send(&self, event: RawEvent) -> Result<(), QueueError> {
        self.sender
            .send(QueueMessage::Event(event))
            .await
            .map_err(|_| QueueError::Stopped)
    }

    /// Push an event without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::MailboxFull`] or [`QueueError::Stopped`].
    pub fn try_send(&self, event: RawEvent) -> Result<(), QueueError> {
        self.sender
            .try_send(QueueMessage::Event(event))
            .map_err(|e| map_try_send(&e))
    }

    /// Push an event from a thread outside the async runtime.
    ///
    /// Must not be called from async context.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Stopped`] if the dispatch task is gone.
    pub fn blocking_send(&self, event: RawEvent) -> Result<(), QueueError> {
        self.sender
            .blocking_send(QueueMessage::Event(event))
            .map_err(|_| QueueError::Stopped)
    }
}

/// Handle to an `EventQueueHandler`.
///
/// Cheap to clone. Objects keep a clone to reach their queue and the
/// transport engine.
#[derive(Clone)]
pub struct EventQueueHandle {
    sender: mpsc::Sender<QueueMessage>,
    cancel_token: CancellationToken,
    queue_id: QueueId,
    boundary: Arc<dyn TransportBoundary>,
    stop_timeout: Duration,
    claims: Claims,
}

impl std::fmt::Debug for EventQueueHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueueHandle")
            .field("queue_id", &self.queue_id)
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

impl EventQueueHandle {
    /// Identity of this queue towards the transport engine.
    #[must_use]
    pub fn id(&self) -> QueueId {
        self.queue_id
    }

    pub(crate) fn boundary(&self) -> &Arc<dyn TransportBoundary> {
        &self.boundary
    }

    /// Register `eventable` under its handle.
    ///
    /// Never blocks, so it may be called from inside a dispatch callback.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidHandle`] for the sentinel handle,
    /// [`QueueError::AlreadyRegistered`] if the handle is registered or
    /// queued for registration on this queue, [`QueueError::MailboxFull`] or
    /// [`QueueError::Stopped`].
    pub fn add_eventable(&self, eventable: Arc<dyn Eventable>) -> Result<Registration, QueueError> {
        let handle = eventable.handle();
        if !handle.is_valid() {
            return Err(QueueError::InvalidHandle);
        }
        if self.cancel_token.is_cancelled() {
            return Err(QueueError::Stopped);
        }
        if !self.claims.lock().insert(handle) {
            warn!(
                target: "portal.queue",
                queue_id = %self.queue_id,
                handle = %handle,
                kind = eventable.kind(),
                "Handle already registered"
            );
            return Err(QueueError::AlreadyRegistered(handle));
        }

        let (tx, rx) = oneshot::channel();
        if let Err(e) = self.sender.try_send(QueueMessage::Register {
            eventable,
            respond_to: tx,
        }) {
            self.claims.lock().remove(&handle);
            return Err(map_try_send(&e));
        }

        Ok(Registration { handle, rx })
    }

    /// Deregister `handle`. Removing an absent handle is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Stopped`] if the dispatch task is gone, or
    /// [`QueueError::MailboxFull`] when the mailbox is full and there is no
    /// runtime to wait on.
    pub fn remove_eventable(&self, handle: Handle) -> Result<(), QueueError> {
        // The claim is released only once the deregistration is queued, so a
        // new registration of the handle always lands behind it.
        match self.sender.try_send(QueueMessage::Deregister { handle }) {
            Ok(()) => {
                self.claims.lock().remove(&handle);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(message)) => {
                let runtime = tokio::runtime::Handle::try_current()
                    .map_err(|_| QueueError::MailboxFull)?;
                let sender = self.sender.clone();
                let claims = Arc::clone(&self.claims);
                runtime.spawn(async move {
                    let _ = sender.send(message).await;
                    claims.lock().remove(&handle);
                });
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.claims.lock().remove(&handle);
                Err(QueueError::Stopped)
            }
        }
    }

    /// Producer for the transport engine.
    #[must_use]
    pub fn event_sender(&self) -> RawEventSender {
        RawEventSender {
            sender: self.sender.clone(),
        }
    }

    /// Wait until every message sent before this call has been handled.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Stopped`] if the dispatch task is gone.
    pub async fn sync(&self) -> Result<QueueStatus, QueueError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(QueueMessage::Sync { respond_to: tx })
            .await
            .map_err(|_| QueueError::Stopped)?;

        rx.await.map_err(|_| QueueError::Stopped)
    }

    /// Stop the dispatch task. Queued messages are discarded.
    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    /// Whether the dispatch task was told to stop or has exited.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancel_token.is_cancelled() || self.sender.is_closed()
    }

    /// Stop and wait for the dispatch task, up to the configured stop timeout.
    ///
    /// Returns `false` if the task had to be aborted.
    pub async fn shutdown(&self, task: JoinHandle<()>) -> bool {
        self.stop();
        let abort = task.abort_handle();
        if tokio::time::timeout(self.stop_timeout, task).await.is_ok() {
            true
        } else {
            warn!(
                target: "portal.queue",
                queue_id = %self.queue_id,
                timeout_ms = u64::try_from(self.stop_timeout.as_millis()).unwrap_or(u64::MAX),
                "Dispatch task did not stop in time, aborting"
            );
            abort.abort();
            false
        }
    }
}

/// The dispatch task.
pub struct EventQueueHandler {
    queue_id: QueueId,
    receiver: mpsc::Receiver<QueueMessage>,
    cancel_token: CancellationToken,
    registry: Registry,
    dispatched: u64,
    dropped: u64,
}

impl EventQueueHandler {
    /// Spawn a handler and return its handle and task.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(
        boundary: Arc<dyn TransportBoundary>,
        config: &QueueConfig,
    ) -> (EventQueueHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(config.mailbox_capacity.max(1));
        let cancel_token = CancellationToken::new();
        let queue_id = QueueId::new();
        let claims = Claims::default();

        let actor = Self {
            queue_id,
            receiver,
            cancel_token: cancel_token.clone(),
            registry: Registry::with_claims(Arc::clone(&claims)),
            dispatched: 0,
            dropped: 0,
        };

        let task = tokio::spawn(actor.run());

        let handle = EventQueueHandle {
            sender,
            cancel_token,
            queue_id,
            boundary,
            stop_timeout: config.stop_timeout,
            claims,
        };

        (handle, task)
    }

    #[instrument(skip_all, name = "portal.queue", fields(queue_id = %self.queue_id))]
    async fn run(mut self) {
        info!(
            target: "portal.queue",
            queue_id = %self.queue_id,
            "Event queue handler started"
        );

        loop {
            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "portal.queue",
                        queue_id = %self.queue_id,
                        "Event queue handler received stop signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message),
                        None => {
                            debug!(
                                target: "portal.queue",
                                queue_id = %self.queue_id,
                                "Event queue mailbox closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        let remaining = self.registry.clear();
        record_eventable_deregistered(remaining);

        info!(
            target: "portal.queue",
            queue_id = %self.queue_id,
            registered_remaining = remaining,
            events_dispatched = self.dispatched,
            events_dropped = self.dropped,
            "Event queue handler stopped"
        );
    }

    fn handle_message(&mut self, message: QueueMessage) {
        match message {
            QueueMessage::Event(raw) => self.dispatch(raw),

            QueueMessage::Register {
                eventable,
                respond_to,
            } => {
                let result = self.register(eventable);
                let _ = respond_to.send(result);
            }

            QueueMessage::Deregister { handle } => {
                if self.registry.remove(handle) {
                    record_eventable_deregistered(1);
                    debug!(
                        target: "portal.queue",
                        queue_id = %self.queue_id,
                        handle = %handle,
                        "Eventable deregistered"
                    );
                } else {
                    debug!(
                        target: "portal.queue",
                        queue_id = %self.queue_id,
                        handle = %handle,
                        "Deregistering absent handle, ignoring"
                    );
                }
            }

            QueueMessage::Sync { respond_to } => {
                let _ = respond_to.send(self.status());
            }
        }
    }

    fn register(&mut self, eventable: Arc<dyn Eventable>) -> Result<(), QueueError> {
        let handle = eventable.handle();
        let kind = eventable.kind();

        if !self.registry.insert(eventable) {
            warn!(
                target: "portal.queue",
                queue_id = %self.queue_id,
                handle = %handle,
                kind = kind,
                "Handle already registered"
            );
            return Err(QueueError::AlreadyRegistered(handle));
        }

        record_eventable_registered();
        debug!(
            target: "portal.queue",
            queue_id = %self.queue_id,
            handle = %handle,
            kind = kind,
            registered = self.registry.len(),
            "Eventable registered"
        );
        Ok(())
    }

    fn dispatch(&mut self, raw: RawEvent) {
        let Some(target) = self.registry.resolve(raw.handle) else {
            debug!(
                target: "portal.queue",
                queue_id = %self.queue_id,
                handle = %raw.handle,
                event_type = raw.event_type,
                "Dropping stale event"
            );
            self.dropped += 1;
            record_event_dropped("stale");
            return;
        };

        let event = match Event::decode(&raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    target: "portal.queue",
                    queue_id = %self.queue_id,
                    handle = %raw.handle,
                    event_type = raw.event_type,
                    error = %e,
                    "Dropping undecodable event"
                );
                self.dropped += 1;
                record_event_dropped(e.drop_reason());
                return;
            }
        };

        let label = event.type_label();
        let start = Instant::now();

        let mut ctx = DispatchContext::new(&mut self.registry, self.queue_id);
        target.on_event(event, &mut ctx);
        let removed = ctx.deregistered();

        if removed > 0 {
            record_eventable_deregistered(removed);
        }
        self.dispatched += 1;
        record_event_dispatched(label);
        record_dispatch_duration(label, start.elapsed());
    }

    fn status(&self) -> QueueStatus {
        QueueStatus {
            registered: self.registry.len(),
            dispatched: self.dispatched,
            dropped: self.dropped,
        }
    }
}
