//! Daemon session over the WebSocket transport against the stub daemon

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use panel_link::remote::{DaemonMessage, PanelMessage, STATUS_ERR};
use panel_link::{EventScope, LinkError, SessionPhase};

use crate::common::*;

#[tokio::test]
async fn correct_key_makes_session_available() {
    let daemon = start_daemon().await;
    let session = ready_session(&daemon).await;

    assert_eq!(session.phase(), SessionPhase::Ready);
    assert!(wait_until(WAIT, || daemon.connected_clients() == 1).await);
}

#[tokio::test]
async fn wrong_key_leaves_session_unavailable() {
    let daemon = start_daemon().await;
    let session = ws_session(node_config("node-1", &daemon, "wrong-key"));
    session.connect(None);

    assert_eq!(session.wait_settled(WAIT).await, SessionPhase::Unauthorized);
    assert!(!session.is_available());
    // Still connected
    assert_eq!(daemon.connected_clients(), 1);

    let err = session
        .call("echo", serde_json::json!(1), Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::ConnectionUnavailable { .. }));
}

#[tokio::test]
async fn key_rotation_recovers_availability() {
    let daemon = start_daemon().await;
    let session = ws_session(node_config("node-1", &daemon, "wrong-key"));
    session.connect(None);
    assert_eq!(session.wait_settled(WAIT).await, SessionPhase::Unauthorized);

    session.auth(Some(API_KEY)).await.unwrap();
    assert!(session.is_available());
    assert_eq!(session.config().api_key, API_KEY);
}

#[tokio::test]
async fn unreachable_daemon_stays_unavailable() {
    let session = ws_session(panel_link::NodeConfig::new(
        "node-1",
        "127.0.0.1",
        unused_port(),
        API_KEY,
    ));
    session.connect(None);

    assert_eq!(session.wait_settled(WAIT).await, SessionPhase::Idle);
    assert!(!session.is_available());
    assert_eq!(session.status().disconnects, 1);
}

#[tokio::test]
async fn call_returns_daemon_result() {
    let daemon = start_daemon().await;
    let session = ready_session(&daemon).await;

    let payload = serde_json::json!({"uuid": "abc", "lines": [1, 2, 3]});
    let result = session.call("echo", payload.clone(), WAIT).await.unwrap();
    assert_eq!(result, payload);
    assert_eq!(session.pending_calls(), 0);
}

#[tokio::test]
async fn concurrent_calls_are_correlated() {
    let daemon = start_daemon().await;
    let session = ready_session(&daemon).await;

    let calls = (0..20).map(|i| {
        let session = session.clone();
        tokio::spawn(async move { session.call("echo", serde_json::json!(i), WAIT).await })
    });
    let results = futures_util::future::join_all(calls).await;

    for (i, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap().unwrap(), serde_json::json!(i));
    }
}

#[tokio::test]
async fn unanswered_call_times_out() {
    let daemon = start_daemon().await;
    let session = ready_session(&daemon).await;

    let err = session
        .call("status", serde_json::json!({}), Duration::from_millis(300))
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::CallTimeout { ref event, .. } if event == "status"));
    assert_eq!(session.pending_calls(), 0);

    // The link is still usable
    assert!(session.is_available());
    let pong = session.call("ping", serde_json::Value::Null, WAIT).await.unwrap();
    assert_eq!(pong, serde_json::json!("pong"));
}

#[tokio::test]
async fn error_status_becomes_remote_error() {
    let daemon = start_daemon().await;
    let session = ready_session(&daemon).await;

    match session.call("fail", serde_json::Value::Null, WAIT).await {
        Err(LinkError::Remote { message, .. }) => assert_eq!(message, "instance not found"),
        other => panic!("Expected Remote error, got {:?}", other),
    }
}

#[tokio::test]
async fn daemon_closing_fails_pending_calls() {
    let daemon = start_daemon().await;
    let session = ready_session(&daemon).await;

    let pending: Vec<_> = (0..3)
        .map(|_| {
            let session = session.clone();
            tokio::spawn(async move {
                session
                    .call("never-answered", serde_json::Value::Null, Duration::from_secs(30))
                    .await
            })
        })
        .collect();
    assert!(wait_until(WAIT, || session.pending_calls() == 3).await);

    daemon.kick_all();
    for call in pending {
        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, LinkError::ConnectionLost { .. }));
    }
    assert_eq!(session.pending_calls(), 0);
    assert_eq!(session.wait_settled(WAIT).await, SessionPhase::Idle);
    assert!(!session.is_available());
}

#[tokio::test]
async fn events_are_routed_by_scope() {
    let daemon = start_daemon().await;
    let session = ready_session(&daemon).await;

    let mut instance = session.subscribe(EventScope::instance("inst-1"));
    let mut node = session.subscribe(EventScope::Node);

    daemon.broadcast(EventScope::instance("inst-2"), "stdout", serde_json::json!("other"));
    daemon.broadcast(EventScope::instance("inst-1"), "stdout", serde_json::json!("mine"));
    daemon.broadcast(EventScope::Node, "heartbeat", serde_json::json!({"beat": 1}));

    let event = tokio::time::timeout(WAIT, instance.recv()).await.unwrap().unwrap();
    assert_eq!(event.event, "stdout");
    assert_eq!(event.payload, serde_json::json!("mine"));

    let event = tokio::time::timeout(WAIT, node.recv()).await.unwrap().unwrap();
    assert_eq!(event.event, "heartbeat");
    assert!(instance.try_recv().is_none());
}

#[tokio::test]
async fn reconnect_keeps_subscriptions_and_single_delivery() {
    let daemon = start_daemon().await;
    let session = ready_session(&daemon).await;
    let mut sub = session.subscribe(EventScope::instance("inst-1"));

    // connect() on a ready session replaces the link
    session.connect(None);
    assert!(session.wait_available(WAIT).await);
    assert!(wait_until(WAIT, || daemon.connected_clients() == 1).await);

    daemon.broadcast(EventScope::instance("inst-1"), "stdout", serde_json::json!("once"));
    let event = tokio::time::timeout(WAIT, sub.recv()).await.unwrap().unwrap();
    assert_eq!(event.payload, serde_json::json!("once"));

    // Give a duplicate delivery the chance to show up
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(sub.try_recv().is_none());
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let daemon = start_daemon().await;
    let session = ready_session(&daemon).await;

    session.disconnect();
    session.disconnect();
    assert!(!session.is_available());
    assert_eq!(session.phase(), SessionPhase::Idle);
    assert!(wait_until(WAIT, || daemon.connected_clients() == 0).await);
}

#[tokio::test]
async fn stub_rejects_requests_before_auth() {
    let daemon = start_daemon().await;
    let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{}", daemon.port()))
        .await
        .unwrap();

    let request = PanelMessage::Request {
        id: 7,
        event: "echo".to_string(),
        payload: serde_json::json!("hi"),
    };
    ws.send(Message::Text(serde_json::to_string(&request).unwrap()))
        .await
        .unwrap();

    let frame = tokio::time::timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
    let text = match frame {
        Message::Text(text) => text,
        other => panic!("Expected text frame, got {:?}", other),
    };
    match serde_json::from_str::<DaemonMessage>(&text).unwrap() {
        DaemonMessage::Response { id, status, .. } => {
            assert_eq!(id, 7);
            assert_eq!(status, STATUS_ERR);
        }
        other => panic!("Expected Response, got {:?}", other),
    }
}
