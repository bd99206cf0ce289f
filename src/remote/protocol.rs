//! Panel <-> daemon wire message types
//!
//! Defines the JSON message format carried in WebSocket text frames.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Response status for a successfully handled request
pub const STATUS_OK: u16 = 200;
/// Response status for a request the daemon failed to handle
pub const STATUS_ERR: u16 = 500;

/// Wire value of the node-level wildcard scope
pub const NODE_SCOPE: &str = "*";

/// Event name of the authentication handshake
pub const AUTH_EVENT: &str = "auth";

/// Panel-to-daemon message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PanelMessage {
    /// Correlated request, answered by a `Response` echoing `id`
    Request {
        id: u64,
        event: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
    /// Fire-and-forget message, never answered
    Emit {
        event: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
}

/// Daemon-to-panel message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonMessage {
    /// Answer to a `Request`
    Response {
        id: u64,
        #[serde(default = "default_status")]
        status: u16,
        #[serde(default)]
        result: serde_json::Value,
    },
    /// Asynchronous event
    Event {
        scope: EventScope,
        event: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
}

fn default_status() -> u16 {
    STATUS_OK
}

/// Routing key for inbound events
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventScope {
    /// Node-level events not tied to any instance
    Node,
    /// Events of a single managed instance
    Instance(String),
}

impl EventScope {
    pub fn instance(id: impl Into<String>) -> Self {
        Self::Instance(id.into())
    }
}

impl From<String> for EventScope {
    fn from(s: String) -> Self {
        if s == NODE_SCOPE {
            Self::Node
        } else {
            Self::Instance(s)
        }
    }
}

impl From<&str> for EventScope {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<EventScope> for String {
    fn from(scope: EventScope) -> Self {
        match scope {
            EventScope::Node => NODE_SCOPE.to_string(),
            EventScope::Instance(id) => id,
        }
    }
}

impl fmt::Display for EventScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventScope::Node => write!(f, "{}", NODE_SCOPE),
            EventScope::Instance(id) => write!(f, "{}", id),
        }
    }
}

/// An event delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct NodeEvent {
    pub scope: EventScope,
    pub event: String,
    pub payload: serde_json::Value,
}
