//! Stub daemon and session fixtures

use std::sync::Arc;
use std::time::Duration;

use panel_link::daemon_stub::StubDaemon;
use panel_link::remote::WsConnector;
use panel_link::{DaemonSession, NodeConfig, SessionRegistry, SessionSettings};

pub const API_KEY: &str = "integration-key";

/// Upper bound for anything that should happen "soon"
pub const WAIT: Duration = Duration::from_secs(5);

/// Start a stub daemon answering `echo`, `ping` and `fail`.
/// Any other request is left unanswered.
pub async fn start_daemon() -> StubDaemon {
    StubDaemon::builder(API_KEY)
        .handle("echo", |payload| Ok(payload))
        .handle("ping", |_| Ok(serde_json::json!("pong")))
        .handle("fail", |_| Err("instance not found".to_string()))
        .bind("127.0.0.1:0")
        .await
        .expect("failed to bind stub daemon")
}

/// Short timeouts so failure paths finish quickly
pub fn test_settings() -> SessionSettings {
    SessionSettings {
        call_timeout: Duration::from_secs(2),
        auth_timeout: Duration::from_secs(2),
        connect_timeout: Duration::from_secs(2),
        event_queue_capacity: 64,
    }
}

pub fn node_config(id: &str, daemon: &StubDaemon, api_key: &str) -> NodeConfig {
    NodeConfig::new(id, "127.0.0.1", daemon.port(), api_key)
}

pub fn ws_session(config: NodeConfig) -> DaemonSession {
    DaemonSession::new(config, Arc::new(WsConnector), test_settings())
}

pub fn ws_registry() -> SessionRegistry {
    SessionRegistry::new(Arc::new(WsConnector), test_settings())
}

/// Connected and authenticated session against `daemon`
pub async fn ready_session(daemon: &StubDaemon) -> DaemonSession {
    let session = ws_session(node_config("node-1", daemon, API_KEY));
    session.connect(None);
    assert!(
        session.wait_available(WAIT).await,
        "session did not become available: {:?}",
        session.status()
    );
    session
}

/// A localhost port nobody listens on
pub fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind throwaway listener");
    listener.local_addr().expect("listener address").port()
}

/// Poll `condition` every 10ms until it holds or `timeout` passes
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
