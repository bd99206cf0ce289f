//! panel-link: remote daemon session layer
//!
//! A panel manages a fleet of daemon nodes. This library keeps one persistent
//! WebSocket link per node, authenticates it with the node's API key, and
//! carries two kinds of traffic over it:
//!
//! - correlated calls (`DaemonSession::call`), matched to their responses by id
//!   and bounded by a timeout
//! - scoped events pushed by the daemon, fanned out to subscribers
//!
//! # Example
//!
//! ```ignore
//! use panel_link::{PanelConfig, SessionRegistry, EventScope};
//! use std::time::Duration;
//!
//! let config = PanelConfig::load()?;
//! let registry = SessionRegistry::from_config(&config);
//! registry.connect_all();
//!
//! let node = registry.get("node-1")?;
//! node.wait_available(Duration::from_secs(10)).await;
//! let info = node.call("info", serde_json::json!({}), Duration::from_secs(5)).await?;
//!
//! let mut events = node.subscribe(EventScope::instance("8f3a..."));
//! while let Some(event) = events.recv().await {
//!     println!("{}: {}", event.event, event.payload);
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod daemon_stub;
pub mod error;
pub mod remote;

// Re-export commonly used types
pub use config::{ConnectOptions, NodeConfig, PanelConfig};
pub use error::{LinkError, Result};
pub use remote::{
    CallOptions, DaemonSession, EventScope, NodeEvent, RegistryStats, SessionPhase,
    SessionRegistry, SessionSettings, SessionStatus, Subscription, SubscriptionId, Supervisor,
    SupervisorHandle,
};
