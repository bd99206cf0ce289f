//! Panel configuration management.
//!
//! Handles the panel-link configuration file at:
//! - Linux: ~/.config/panel-link/config.toml
//! - macOS: ~/Library/Application Support/panel-link/config.toml
//! - Windows: %APPDATA%\panel-link\config.toml

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LinkError;

/// Panel configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PanelConfig {
    /// Call, auth and connect timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Reconnect supervisor policy
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Event delivery settings
    #[serde(default)]
    pub events: EventConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Configured daemon nodes
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

/// Timeout configuration (milliseconds)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_call_ms")]
    pub call_ms: u64,
    #[serde(default = "default_auth_ms")]
    pub auth_ms: u64,
    #[serde(default = "default_connect_ms")]
    pub connect_ms: u64,
}

fn default_call_ms() -> u64 {
    10_000
}

fn default_auth_ms() -> u64 {
    5_000
}

fn default_connect_ms() -> u64 {
    10_000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            call_ms: default_call_ms(),
            auth_ms: default_auth_ms(),
            connect_ms: default_connect_ms(),
        }
    }
}

/// Reconnect supervisor configuration (milliseconds)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// First retry delay after a failed attempt
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,
    /// Upper bound for the retry delay
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,
    /// How often idle sessions are checked
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
}

fn default_base_ms() -> u64 {
    5_000
}

fn default_max_ms() -> u64 {
    60_000
}

fn default_check_interval_ms() -> u64 {
    3_000
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_ms: default_base_ms(),
            max_ms: default_max_ms(),
            check_interval_ms: default_check_interval_ms(),
        }
    }
}

/// Event delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    /// Per-subscription queue size; events beyond it are dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    256
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// A single daemon node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    /// Host name or IP; may carry a `ws://` or `wss://` prefix
    pub address: String,
    pub port: u16,
    pub api_key: String,
    #[serde(default)]
    pub connect: ConnectOptions,
}

/// Per-node transport options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOptions {
    /// Overrides `timeouts.connect_ms` for this node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// URL path appended after `address:port`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl NodeConfig {
    pub fn new(
        id: impl Into<String>,
        address: impl Into<String>,
        port: u16,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            port,
            api_key: api_key.into(),
            connect: ConnectOptions::default(),
        }
    }

    /// WebSocket URL of the daemon.
    ///
    /// An address that already names a scheme is used as-is, otherwise `ws://` is prepended.
    pub fn url(&self) -> String {
        let base = if self.address.starts_with("wss://") || self.address.starts_with("ws://") {
            format!("{}:{}", self.address, self.port)
        } else {
            format!("ws://{}:{}", self.address, self.port)
        };
        match self.connect.path.as_deref() {
            Some(path) if !path.is_empty() => {
                format!("{}/{}", base, path.trim_start_matches('/'))
            }
            _ => base,
        }
    }

    /// `[id] [address:port]`, used as log context
    pub fn describe(&self) -> String {
        format!("[{}] [{}:{}]", self.id, self.address, self.port)
    }
}

impl PanelConfig {
    /// Default config file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("panel-link")
            .join("config.toml")
    }

    /// Load configuration from the default path
    pub fn load() -> Result<Self, LinkError> {
        Self::load_from(&Self::default_path())
    }

    /// Load configuration from a specific path; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self, LinkError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| LinkError::IoError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| LinkError::ConfigError {
            message: format!("Failed to parse config: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<(), LinkError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| LinkError::IoError {
                    path: parent.to_path_buf(),
                    message: e.to_string(),
                })?;
            }
        }

        let content = toml::to_string_pretty(self).map_err(|e| LinkError::ConfigError {
            message: format!("Failed to serialize config: {}", e),
        })?;

        // Atomic write
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &content).map_err(|e| LinkError::IoError {
            path: temp_path.clone(),
            message: e.to_string(),
        })?;

        fs::rename(&temp_path, path).map_err(|e| LinkError::IoError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        Ok(())
    }

    /// Reject configs with empty or duplicate node ids
    pub fn validate(&self) -> Result<(), LinkError> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.id.trim().is_empty() {
                return Err(LinkError::ConfigError {
                    message: format!("Node at {}:{} has an empty id", node.address, node.port),
                });
            }
            if !seen.insert(node.id.as_str()) {
                return Err(LinkError::ConfigError {
                    message: format!("Duplicate node id: {}", node.id),
                });
            }
        }
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(LinkError::ConfigError {
                message: format!("Invalid log level: {}", self.logging.level),
            });
        }
        Ok(())
    }

    pub fn node(&self, id: &str) -> Option<&NodeConfig> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Insert a node, replacing any node with the same id
    pub fn upsert_node(&mut self, node: NodeConfig) {
        match self.nodes.iter_mut().find(|n| n.id == node.id) {
            Some(existing) => *existing = node,
            None => self.nodes.push(node),
        }
    }

    /// Remove a node by id, returns true if it existed
    pub fn remove_node(&mut self, id: &str) -> bool {
        let before = self.nodes.len();
        self.nodes.retain(|n| n.id != id);
        self.nodes.len() != before
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.call_ms)
    }

    /// Get a configuration value by key path (e.g., "timeouts.call_ms")
    pub fn get(&self, key: &str) -> Option<String> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["timeouts", "call_ms"] => Some(self.timeouts.call_ms.to_string()),
            ["timeouts", "auth_ms"] => Some(self.timeouts.auth_ms.to_string()),
            ["timeouts", "connect_ms"] => Some(self.timeouts.connect_ms.to_string()),
            ["reconnect", "base_ms"] => Some(self.reconnect.base_ms.to_string()),
            ["reconnect", "max_ms"] => Some(self.reconnect.max_ms.to_string()),
            ["reconnect", "check_interval_ms"] => {
                Some(self.reconnect.check_interval_ms.to_string())
            }
            ["events", "queue_capacity"] => Some(self.events.queue_capacity.to_string()),
            ["logging", "level"] => Some(self.logging.level.clone()),
            _ => None,
        }
    }

    /// Set a configuration value by key path
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), LinkError> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["timeouts", "call_ms"] => self.timeouts.call_ms = parse_number(key, value)?,
            ["timeouts", "auth_ms"] => self.timeouts.auth_ms = parse_number(key, value)?,
            ["timeouts", "connect_ms"] => self.timeouts.connect_ms = parse_number(key, value)?,
            ["reconnect", "base_ms"] => self.reconnect.base_ms = parse_number(key, value)?,
            ["reconnect", "max_ms"] => self.reconnect.max_ms = parse_number(key, value)?,
            ["reconnect", "check_interval_ms"] => {
                self.reconnect.check_interval_ms = parse_number(key, value)?
            }
            ["events", "queue_capacity"] => {
                let capacity: u64 = parse_number(key, value)?;
                if capacity == 0 {
                    return Err(LinkError::ConfigError {
                        message: "events.queue_capacity must be at least 1".to_string(),
                    });
                }
                self.events.queue_capacity = capacity as usize;
            }
            ["logging", "level"] => {
                if !LOG_LEVELS.contains(&value) {
                    return Err(LinkError::ConfigError {
                        message: format!(
                            "Invalid log level: {}. Must be one of: {}",
                            value,
                            LOG_LEVELS.join(", ")
                        ),
                    });
                }
                self.logging.level = value.to_string();
            }
            _ => {
                return Err(LinkError::ConfigError {
                    message: format!("Unknown configuration key: {}", key),
                });
            }
        }
        Ok(())
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64, LinkError> {
    value.parse().map_err(|_| LinkError::ConfigError {
        message: format!("{} expects a non-negative integer, got '{}'", key, value),
    })
}
