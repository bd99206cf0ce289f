//! Command modules for the panel-link CLI
//!
//! Each command module implements a single top-level command:
//! - `status` - Connect nodes and report their session state
//! - `call` - One correlated call against a node
//! - `watch` - Stream a node's events
//! - `config` - Inspect and edit the configuration file
//!
//! All command handlers take their respective `Args` struct from `cli.rs`
//! and a shared `CommandContext`.

pub mod call;
pub mod config;
pub mod status;
pub mod watch;

pub use call::run_call;
pub use config::run_config;
pub use status::run_status;
pub use watch::run_watch;

use std::path::PathBuf;
use std::time::Duration;

use crate::cli::OutputFormat;
use crate::config::PanelConfig;
use crate::error::{LinkError, Result};
use crate::remote::{DaemonSession, SessionPhase};

/// Shared context passed to all command handlers
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub format: OutputFormat,
    pub verbose: bool,
    /// Configuration file in use
    pub config_path: PathBuf,
}

impl CommandContext {
    pub fn new(format: OutputFormat, verbose: bool, config_path: Option<PathBuf>) -> Self {
        Self {
            format,
            verbose,
            config_path: config_path.unwrap_or_else(PanelConfig::default_path),
        }
    }

    pub fn load_config(&self) -> Result<PanelConfig> {
        PanelConfig::load_from(&self.config_path)
    }
}

/// Time a fresh connection gets to become available
pub(crate) fn handshake_window(config: &PanelConfig) -> Duration {
    Duration::from_millis(config.timeouts.connect_ms + config.timeouts.auth_ms)
}

/// Connect `session` and wait for the handshake, mapping a failed handshake to its error
pub(crate) async fn connect_ready(session: &DaemonSession, window: Duration) -> Result<()> {
    session.connect(None);
    match session.wait_settled(window).await {
        SessionPhase::Ready => Ok(()),
        SessionPhase::Unauthorized => Err(LinkError::AuthRejected {
            node: session.id().to_string(),
        }),
        _ => Err(LinkError::ConnectionUnavailable {
            node: session.id().to_string(),
        }),
    }
}
