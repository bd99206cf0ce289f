//! CLI argument definitions using clap with subcommand architecture

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Panel-side client for remote daemon nodes
#[derive(Parser, Debug)]
#[command(name = "panel-link")]
#[command(about = "Connect to daemon nodes, issue calls and watch their events")]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (applies to all commands)
    #[arg(short, long, default_value = "text", value_enum, global = true)]
    pub format: OutputFormat,

    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, global = true, env = "PANEL_LINK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Show verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

// ============================================
// Main Commands Enum
// ============================================

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect every configured node and report its state
    #[command(visible_alias = "st")]
    Status(StatusArgs),

    /// Issue one call to a node and print the result
    Call(CallArgs),

    /// Print a node's events until interrupted
    Watch(WatchArgs),

    /// Inspect or edit the configuration file
    Config(ConfigArgs),
}

// ============================================
// Status Subcommand
// ============================================

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Only report this node
    #[arg(value_name = "NODE")]
    pub node: Option<String>,

    /// How long to wait for connect and auth (milliseconds)
    #[arg(long, default_value = "5000")]
    pub wait_ms: u64,
}

// ============================================
// Call Subcommand
// ============================================

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Node id
    pub node: String,

    /// Event name (e.g., instance/info)
    pub event: String,

    /// JSON payload; plain text is sent as a string
    pub payload: Option<String>,

    /// Call timeout in milliseconds (defaults to timeouts.call_ms)
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

// ============================================
// Watch Subcommand
// ============================================

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Node id
    pub node: String,

    /// Event scope: an instance id, or `*` for node-level events
    #[arg(short, long, default_value = "*")]
    pub scope: String,

    /// Stop after this many events
    #[arg(long)]
    pub count: Option<usize>,
}

// ============================================
// Config Subcommand
// ============================================

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub operation: ConfigOperation,
}

#[derive(Subcommand, Debug)]
pub enum ConfigOperation {
    /// Show current configuration
    Show,

    /// Print the configuration file path
    Path,

    /// Get a configuration value
    Get {
        /// Configuration key (e.g., timeouts.call_ms, logging.level)
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., timeouts.call_ms, logging.level)
        key: String,
        /// Value to set
        value: String,
    },

    /// Add or replace a daemon node
    AddNode {
        /// Node id
        id: String,
        /// Host name or IP, optionally with ws:// or wss://
        address: String,
        /// Daemon port
        port: u16,
        /// API key
        #[arg(long, env = "PANEL_LINK_API_KEY")]
        api_key: String,
    },

    /// Remove a daemon node
    RemoveNode {
        /// Node id
        id: String,
    },
}

/// Output format options
#[derive(Clone, Copy, Debug, Default, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text (default for terminal)
    #[default]
    #[value(alias = "pretty")]
    Text,
    /// JSON for machine parsing
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_call() {
        let cli = Cli::parse_from([
            "panel-link",
            "call",
            "node-1",
            "instance/info",
            r#"{"uuid":"abc"}"#,
            "--timeout-ms",
            "2000",
        ]);
        match cli.command {
            Commands::Call(args) => {
                assert_eq!(args.node, "node-1");
                assert_eq!(args.event, "instance/info");
                assert_eq!(args.timeout_ms, Some(2000));
                assert!(args.payload.is_some());
            }
            other => panic!("Expected Call, got {:?}", other),
        }
        assert_eq!(cli.format, OutputFormat::Text);
    }

    #[test]
    fn test_parse_watch_defaults_to_node_scope() {
        let cli = Cli::parse_from(["panel-link", "watch", "node-1", "-f", "json"]);
        match cli.command {
            Commands::Watch(args) => {
                assert_eq!(args.scope, "*");
                assert_eq!(args.count, None);
            }
            other => panic!("Expected Watch, got {:?}", other),
        }
        assert_eq!(cli.format, OutputFormat::Json);
    }

    #[test]
    fn test_parse_config_set() {
        let cli = Cli::parse_from(["panel-link", "config", "set", "timeouts.call_ms", "2500"]);
        match cli.command {
            Commands::Config(ConfigArgs {
                operation: ConfigOperation::Set { key, value },
            }) => {
                assert_eq!(key, "timeouts.call_ms");
                assert_eq!(value, "2500");
            }
            other => panic!("Expected config set, got {:?}", other),
        }
    }
}
