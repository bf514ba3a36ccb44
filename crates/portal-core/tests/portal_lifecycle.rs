//! Portal construction, event dispatch and close.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::types::{Handle, PendingSessionPtr};
use portal_core::errors::ErrorKind;
use portal_core::event::{EventName, EventReason};
use portal_core::queue::{EventQueueHandle, EventQueueHandler};
use portal_core::{Portal, PortalAddress, PortalError, PortalState, Session, SessionKey, SessionState};
use portal_test_utils::fixtures::{
    lifecycle_event, new_session_event, test_queue_config, unknown_type_event,
    Observed, PanickingPortalCallbacks, RecordingPortalCallbacks, RecordingSessionCallbacks,
};
use portal_test_utils::mock_boundary::FIRST_HANDLE;
use portal_test_utils::{BoundaryCall, MockBoundary};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

fn spawn_queue(boundary: &MockBoundary) -> (EventQueueHandle, JoinHandle<()>) {
    let (queue, task) = EventQueueHandler::spawn(boundary.shared(), &test_queue_config());
    boundary.attach(&queue);
    (queue, task)
}

#[tokio::test]
async fn test_listen_derives_bound_and_advertised_addresses() {
    let boundary = MockBoundary::new().with_port(34567);
    let (queue, task) = spawn_queue(&boundary);
    let (callbacks, _rx) = RecordingPortalCallbacks::new();

    let portal = Portal::listen(&queue, "rdma://host:9999", callbacks).unwrap();

    assert_eq!(portal.handle(), Handle::new(FIRST_HANDLE));
    assert_eq!(portal.bound_port(), 34567);
    assert_eq!(portal.bound_address().as_str(), "rdma://host:34567");
    assert_eq!(portal.advertised_address().as_str(), "rdma://host:0");
    for derived in [portal.bound_address(), portal.advertised_address()] {
        let reparsed = PortalAddress::parse(derived.as_str()).unwrap();
        assert_eq!(reparsed.scheme(), "rdma");
        assert_eq!(reparsed.host(), "host");
    }

    assert_eq!(
        boundary.calls(),
        vec![BoundaryCall::StartListening {
            address: "rdma://host:9999".to_string(),
            queue: queue.id(),
        }]
    );
    assert_eq!(portal.state(), PortalState::Listening);
    assert_eq!(portal.queue_id(), queue.id());
    assert_eq!(queue.sync().await.unwrap().registered, 1);

    assert!(queue.shutdown(task).await);
}

#[tokio::test]
async fn test_invalid_scheme_is_configuration_error() {
    let boundary = MockBoundary::new();
    let (queue, task) = spawn_queue(&boundary);

    let err = Portal::worker(&queue, "tcp://host:9999").unwrap_err();

    assert!(matches!(err, PortalError::Address(_)));
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.kind().is_fatal());
    assert!(boundary.calls().is_empty());
    assert_eq!(queue.sync().await.unwrap().registered, 0);

    assert!(queue.shutdown(task).await);
}

#[tokio::test]
async fn test_listen_failure_is_resource_error() {
    for boundary in [
        MockBoundary::new().with_listen_failure(),
        MockBoundary::new().with_invalid_listen_handle(),
    ] {
        let (queue, task) = spawn_queue(&boundary);

        let err = Portal::worker(&queue, "rdma://0.0.0.0:9999").unwrap_err();

        assert!(matches!(err, PortalError::ListenFailed { .. }));
        assert_eq!(err.kind(), ErrorKind::Resource);
        assert_eq!(queue.sync().await.unwrap().registered, 0);

        assert!(queue.shutdown(task).await);
    }
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let boundary = MockBoundary::new();
    let (queue, task) = spawn_queue(&boundary);
    let portal = Portal::worker(&queue, "rdma://0.0.0.0:9999").unwrap();

    assert!(portal.close());
    assert!(!portal.close());

    assert_eq!(boundary.stop_listening_count(portal.handle()), 1);
    assert_eq!(portal.state(), PortalState::Closing);
    assert!(portal.is_closing());
    // Still registered until the engine confirms
    assert_eq!(queue.sync().await.unwrap().registered, 1);

    assert!(queue.shutdown(task).await);
}

#[tokio::test]
async fn test_close_closes_open_sessions_then_stops_listening() {
    let boundary = MockBoundary::new();
    let (queue, task) = spawn_queue(&boundary);
    let portal = Portal::worker(&queue, "rdma://0.0.0.0:9999").unwrap();

    let first = Session::server(SessionKey::new(PendingSessionPtr::new(0x10), "rdma://1.2.3.4:1"), None);
    let second = Session::server(SessionKey::new(PendingSessionPtr::new(0x20), "rdma://1.2.3.4:1"), None);
    portal.accept(&first).unwrap();
    portal.accept(&second).unwrap();

    assert!(first.close());
    assert_eq!(boundary.session_close_count(), 1);

    assert!(portal.close());

    // Only the session that was not already closing is closed again
    assert_eq!(boundary.session_close_count(), 2);
    assert_eq!(second.state(), SessionState::Closing);
    assert_eq!(
        boundary.calls().last(),
        Some(&BoundaryCall::StopListening {
            portal: portal.handle()
        })
    );

    assert!(queue.shutdown(task).await);
}

#[tokio::test]
async fn test_portal_closed_event_deregisters_portal() {
    let boundary = MockBoundary::new().with_terminal_events();
    let (queue, task) = spawn_queue(&boundary);
    let (callbacks, _rx) = RecordingPortalCallbacks::new();
    let portal = Portal::listen(&queue, "rdma://0.0.0.0:9999", callbacks.clone()).unwrap();

    assert!(portal.close());
    let status = queue.sync().await.unwrap();

    assert_eq!(status.registered, 0);
    assert_eq!(portal.state(), PortalState::Closed);
    assert_eq!(
        callbacks.session_events(),
        vec![(EventName::PortalClosed, EventReason::Success)]
    );

    // A late event for the portal no longer resolves
    queue
        .event_sender()
        .send(new_session_event(portal.handle(), 0x55, "rdma://1.2.3.4:5000", "1.2.3.4"))
        .await
        .unwrap();
    let after = queue.sync().await.unwrap();

    assert_eq!(after.dropped, status.dropped + 1);
    assert!(callbacks.new_sessions().is_empty());

    assert!(queue.shutdown(task).await);
}

#[tokio::test]
async fn test_session_closed_event_on_portal_handle_deregisters_portal() {
    let boundary = MockBoundary::new();
    let (queue, task) = spawn_queue(&boundary);
    let (callbacks, _rx) = RecordingPortalCallbacks::new();
    let portal = Portal::listen(&queue, "rdma://0.0.0.0:9999", callbacks.clone()).unwrap();

    queue
        .event_sender()
        .send(lifecycle_event(portal.handle(), EventName::SessionClosed))
        .await
        .unwrap();

    assert_eq!(queue.sync().await.unwrap().registered, 0);
    assert_eq!(portal.state(), PortalState::Closed);
    assert_eq!(
        callbacks.session_events(),
        vec![(EventName::SessionClosed, EventReason::Success)]
    );

    assert!(queue.shutdown(task).await);
}

#[tokio::test]
async fn test_new_session_invokes_callback_once_without_state_change() {
    let boundary = MockBoundary::new();
    let (queue, task) = spawn_queue(&boundary);
    let (callbacks, mut rx) = RecordingPortalCallbacks::new();
    let portal = Portal::listen(&queue, "rdma://0.0.0.0:9999", callbacks.clone()).unwrap();
    boundary.clear_calls();

    queue
        .event_sender()
        .send(new_session_event(portal.handle(), 0x77, "rdma://1.2.3.4:5000", "1.2.3.4"))
        .await
        .unwrap();

    let observed = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        observed,
        Observed::NewSession {
            key: SessionKey::new(PendingSessionPtr::new(0x77), "rdma://1.2.3.4:5000"),
            source_address: "1.2.3.4".to_string(),
        }
    );

    queue.sync().await.unwrap();
    assert_eq!(callbacks.new_sessions().len(), 1);
    assert_eq!(portal.session_count(), 0);
    assert!(boundary.calls().is_empty());

    assert!(queue.shutdown(task).await);
}

#[tokio::test]
async fn test_closing_portal_drops_new_sessions() {
    let boundary = MockBoundary::new();
    let (queue, task) = spawn_queue(&boundary);
    let (callbacks, _rx) = RecordingPortalCallbacks::new();
    let portal = Portal::listen(&queue, "rdma://0.0.0.0:9999", callbacks.clone()).unwrap();

    assert!(portal.close());
    queue
        .event_sender()
        .send(new_session_event(portal.handle(), 0x77, "rdma://1.2.3.4:5000", "1.2.3.4"))
        .await
        .unwrap();
    queue.sync().await.unwrap();

    assert!(callbacks.new_sessions().is_empty());

    assert!(queue.shutdown(task).await);
}

#[tokio::test]
async fn test_worker_portal_ignores_new_session_requests() {
    let boundary = MockBoundary::new();
    let (queue, task) = spawn_queue(&boundary);
    let portal = Portal::worker(&queue, "rdma://0.0.0.0:9999").unwrap();
    boundary.clear_calls();

    queue
        .event_sender()
        .send(new_session_event(portal.handle(), 0x77, "rdma://1.2.3.4:5000", "1.2.3.4"))
        .await
        .unwrap();
    let status = queue.sync().await.unwrap();

    assert_eq!(status.dispatched, 1);
    assert_eq!(portal.session_count(), 0);
    assert!(boundary.calls().is_empty());

    assert!(queue.shutdown(task).await);
}

#[tokio::test]
async fn test_unknown_event_type_is_dropped() {
    let boundary = MockBoundary::new();
    let (queue, task) = spawn_queue(&boundary);
    let (callbacks, _rx) = RecordingPortalCallbacks::new();
    let portal = Portal::listen(&queue, "rdma://0.0.0.0:9999", callbacks.clone()).unwrap();

    let sender = queue.event_sender();
    sender.send(unknown_type_event(portal.handle(), 3)).await.unwrap();
    sender
        .send(lifecycle_event(portal.handle(), EventName::ConnectionError))
        .await
        .unwrap();
    let status = queue.sync().await.unwrap();

    assert_eq!(status.dropped, 1);
    assert_eq!(status.dispatched, 1);
    assert_eq!(portal.state(), PortalState::Listening);
    assert_eq!(
        callbacks.session_events(),
        vec![(EventName::ConnectionError, EventReason::Success)]
    );

    assert!(queue.shutdown(task).await);
}

#[tokio::test]
async fn test_panicking_callback_leaves_queue_running() {
    let boundary = MockBoundary::new();
    let (queue, task) = spawn_queue(&boundary);
    let portal = Portal::listen(&queue, "rdma://0.0.0.0:9999", Arc::new(PanickingPortalCallbacks)).unwrap();

    let sender = queue.event_sender();
    sender
        .send(new_session_event(portal.handle(), 0x77, "rdma://1.2.3.4:5000", "1.2.3.4"))
        .await
        .unwrap();
    sender
        .send(lifecycle_event(portal.handle(), EventName::ConnectionError))
        .await
        .unwrap();

    let status = queue.sync().await.unwrap();
    assert_eq!(status.dispatched, 2);
    assert_eq!(status.registered, 1);
    assert!(!queue.is_stopped());

    assert!(queue.shutdown(task).await);
}

#[tokio::test]
async fn test_portal_closed_event_keeps_later_portals_working() {
    let boundary = MockBoundary::new().with_terminal_events();
    let (queue, task) = spawn_queue(&boundary);
    let (callbacks, _rx) = RecordingPortalCallbacks::new();

    let first = Portal::listen(&queue, "rdma://0.0.0.0:1", callbacks.clone()).unwrap();
    let second = Portal::listen(&queue, "rdma://0.0.0.0:2", callbacks.clone()).unwrap();
    assert!(first.close());
    queue.sync().await.unwrap();

    queue
        .event_sender()
        .send(new_session_event(second.handle(), 0x99, "rdma://5.6.7.8:1", "5.6.7.8"))
        .await
        .unwrap();
    queue.sync().await.unwrap();

    assert_eq!(first.state(), PortalState::Closed);
    assert_eq!(second.state(), PortalState::Listening);
    assert_eq!(callbacks.new_sessions().len(), 1);

    assert!(queue.shutdown(task).await);
}

#[tokio::test]
async fn test_client_session_lifecycle() {
    let boundary = MockBoundary::new().with_terminal_events();
    let (queue, task) = spawn_queue(&boundary);
    let callbacks = RecordingSessionCallbacks::new();

    let session = Session::connect(&queue, "rdma://10.0.0.1:7000", Some(callbacks.clone())).unwrap();

    assert_eq!(session.state(), SessionState::Connected);
    assert!(session.key().is_none());
    assert_eq!(session.queue_id(), Some(queue.id()));
    assert_eq!(queue.sync().await.unwrap().registered, 1);

    queue
        .event_sender()
        .send(lifecycle_event(session.handle(), EventName::ConnectionEstablished))
        .await
        .unwrap();
    queue.sync().await.unwrap();
    assert_eq!(session.state(), SessionState::Connected);

    assert!(session.close());
    assert!(!session.close());
    let status = queue.sync().await.unwrap();

    assert_eq!(status.registered, 0);
    assert_eq!(session.state(), SessionState::Closed);
    assert!(boundary.calls().contains(&BoundaryCall::CloseClientSession {
        session: session.handle()
    }));
    assert_eq!(
        callbacks.events(),
        vec![
            (EventName::ConnectionEstablished, EventReason::Success),
            (EventName::SessionClosed, EventReason::Success),
        ]
    );

    assert!(queue.shutdown(task).await);
}

#[tokio::test]
async fn test_client_connect_failures() {
    let boundary = MockBoundary::new().with_connect_failure();
    let (queue, task) = spawn_queue(&boundary);

    let refused = Session::connect(&queue, "rdma://10.0.0.1:7000", None).unwrap_err();
    assert!(matches!(refused, PortalError::ConnectFailed { .. }));
    assert_eq!(refused.kind(), ErrorKind::Resource);

    let bad_scheme = Session::connect(&queue, "udp://10.0.0.1:7000", None).unwrap_err();
    assert_eq!(bad_scheme.kind(), ErrorKind::Configuration);

    assert!(queue.shutdown(task).await);
}

#[tokio::test]
async fn test_peer_teardown_moves_session_to_closing() {
    let boundary = MockBoundary::new();
    let (queue, task) = spawn_queue(&boundary);
    let session = Session::connect(&queue, "rdma://10.0.0.1:7000", None).unwrap();

    queue
        .event_sender()
        .send(lifecycle_event(session.handle(), EventName::SessionTeardown))
        .await
        .unwrap();
    queue.sync().await.unwrap();

    assert_eq!(session.state(), SessionState::Closing);
    // Already closing: close is reported, not repeated
    assert!(!session.close());
    assert_eq!(boundary.session_close_count(), 0);

    assert!(queue.shutdown(task).await);
}
