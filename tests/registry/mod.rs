//! Registry and reconnect supervisor over the WebSocket transport

use std::sync::Arc;
use std::time::Duration;

use panel_link::config::ReconnectConfig;
use panel_link::{EventScope, LinkError, RegistryStats, SessionPhase, Supervisor};

use crate::common::*;

#[tokio::test]
async fn registry_tracks_available_nodes() {
    let daemon = start_daemon().await;
    let registry = ws_registry();
    registry.add_node(node_config("good", &daemon, API_KEY));
    registry.add_node(node_config("bad-key", &daemon, "nope"));

    registry.connect_all();
    let good = registry.get("good").unwrap();
    let bad = registry.get("bad-key").unwrap();
    assert!(good.wait_available(WAIT).await);
    assert_eq!(bad.wait_settled(WAIT).await, SessionPhase::Unauthorized);

    assert_eq!(
        registry.stats(),
        RegistryStats {
            total: 2,
            available: 1
        }
    );

    assert!(registry.remove_node("good"));
    assert!(matches!(
        registry.get("good"),
        Err(LinkError::UnknownNodeId { .. })
    ));
    assert!(!good.is_available());

    registry.disconnect_all();
    assert_eq!(registry.stats().available, 0);
}

#[tokio::test]
async fn edit_node_moves_session_to_new_daemon() {
    let first = start_daemon().await;
    let second = start_daemon().await;
    let registry = ws_registry();
    let session = registry.add_node(node_config("node-1", &first, API_KEY));
    session.connect(None);
    assert!(session.wait_available(WAIT).await);

    registry
        .edit_node(node_config("node-1", &second, API_KEY))
        .unwrap();
    assert!(session.wait_available(WAIT).await);
    assert!(wait_until(WAIT, || second.connected_clients() == 1).await);
    assert!(wait_until(WAIT, || first.connected_clients() == 0).await);
}

#[tokio::test]
async fn supervisor_restores_dropped_links() {
    let daemon = start_daemon().await;
    let registry = Arc::new(ws_registry());
    let session = registry.add_node(node_config("node-1", &daemon, API_KEY));
    let mut sub = session.subscribe(EventScope::instance("inst-1"));

    let policy = ReconnectConfig {
        base_ms: 50,
        max_ms: 200,
        check_interval_ms: 20,
    };
    let supervisor = Supervisor::new(registry.clone(), &policy).spawn();

    // The supervisor makes the first connection too
    assert!(session.wait_available(WAIT).await);

    daemon.kick_all();
    assert!(wait_until(WAIT, || session.status().disconnects >= 1).await);
    assert!(session.wait_available(WAIT).await);

    daemon.broadcast(EventScope::instance("inst-1"), "stdout", serde_json::json!("back"));
    let event = tokio::time::timeout(WAIT, sub.recv()).await.unwrap().unwrap();
    assert_eq!(event.payload, serde_json::json!("back"));

    supervisor.shutdown().await;
    registry.disconnect_all();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(session.phase(), SessionPhase::Idle);
}
