//! Error types and exit codes for panel-link

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use thiserror::Error;

/// Main error type for panel-link operations
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Daemon {node} is not available")]
    ConnectionUnavailable { node: String },

    #[error("Daemon {node} rejected the API key")]
    AuthRejected { node: String },

    #[error("Call '{event}' to daemon {node} timed out after {}ms", timeout.as_millis())]
    CallTimeout {
        node: String,
        event: String,
        timeout: Duration,
    },

    #[error("Connection to daemon {node} was lost")]
    ConnectionLost { node: String },

    #[error("Connecting to {url} timed out after {}ms", timeout.as_millis())]
    ConnectTimeout { url: String, timeout: Duration },

    #[error("Unknown daemon node: {id}")]
    UnknownNodeId { id: String },

    #[error("Daemon {node} answered '{event}' with an error: {message}")]
    Remote {
        node: String,
        event: String,
        message: String,
    },

    #[error("WebSocket error: {0}")]
    Transport(Box<tokio_tungstenite::tungstenite::Error>),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("IO error at {path}: {message}")]
    IoError { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for LinkError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(Box::new(err))
    }
}

impl LinkError {
    /// Convert error to an exit code for the CLI:
    /// - 1: IO / configuration problem
    /// - 2: Unknown node
    /// - 3: Node unreachable or connection dropped
    /// - 4: Authentication rejected
    /// - 5: Call timed out
    /// - 6: Daemon reported an error
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::ConfigError { .. } | Self::IoError { .. } | Self::Io(_) => ExitCode::from(1),
            Self::UnknownNodeId { .. } => ExitCode::from(2),
            Self::ConnectionUnavailable { .. }
            | Self::ConnectionLost { .. }
            | Self::ConnectTimeout { .. }
            | Self::Transport(_) => ExitCode::from(3),
            Self::AuthRejected { .. } => ExitCode::from(4),
            Self::CallTimeout { .. } => ExitCode::from(5),
            Self::Remote { .. } | Self::Json(_) => ExitCode::from(6),
        }
    }

    /// True for errors caused by the link going away rather than by the call itself
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionUnavailable { .. }
                | Self::ConnectionLost { .. }
                | Self::ConnectTimeout { .. }
                | Self::Transport(_)
        )
    }
}

/// Result type alias for panel-link operations
pub type Result<T> = std::result::Result<T, LinkError>;
