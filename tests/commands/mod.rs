//! CLI command handlers against a stub daemon

use tempfile::TempDir;

use panel_link::cli::{CallArgs, OutputFormat, StatusArgs};
use panel_link::commands::{run_call, run_status, CommandContext};
use panel_link::{LinkError, PanelConfig};

use crate::common::*;

fn write_config(dir: &TempDir, nodes: Vec<panel_link::NodeConfig>) -> CommandContext {
    let path = dir.path().join("config.toml");
    let mut config = PanelConfig::default();
    config.timeouts.call_ms = 2000;
    config.timeouts.auth_ms = 2000;
    config.timeouts.connect_ms = 2000;
    config.nodes = nodes;
    config.save_to(&path).unwrap();
    CommandContext::new(OutputFormat::Json, false, Some(path))
}

#[tokio::test]
async fn call_command_prints_result() {
    let daemon = start_daemon().await;
    let dir = TempDir::new().unwrap();
    let ctx = write_config(&dir, vec![node_config("node-1", &daemon, API_KEY)]);

    let args = CallArgs {
        node: "node-1".to_string(),
        event: "echo".to_string(),
        payload: Some(r#"{"uuid":"abc"}"#.to_string()),
        timeout_ms: None,
    };
    let output = run_call(&args, &ctx).await.unwrap();
    let value: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert_eq!(value["result"]["uuid"], "abc");
    assert_eq!(value["node"], "node-1");
}

#[tokio::test]
async fn call_command_reports_rejected_key() {
    let daemon = start_daemon().await;
    let dir = TempDir::new().unwrap();
    let ctx = write_config(&dir, vec![node_config("node-1", &daemon, "bad")]);

    let args = CallArgs {
        node: "node-1".to_string(),
        event: "echo".to_string(),
        payload: None,
        timeout_ms: None,
    };
    let err = run_call(&args, &ctx).await.unwrap_err();
    assert!(matches!(err, LinkError::AuthRejected { .. }));
}

#[tokio::test]
async fn call_command_unknown_node() {
    let dir = TempDir::new().unwrap();
    let ctx = write_config(&dir, Vec::new());
    let args = CallArgs {
        node: "ghost".to_string(),
        event: "echo".to_string(),
        payload: None,
        timeout_ms: None,
    };
    let err = run_call(&args, &ctx).await.unwrap_err();
    assert!(matches!(err, LinkError::UnknownNodeId { .. }));
}

#[tokio::test]
async fn status_command_counts_available_nodes() {
    let daemon = start_daemon().await;
    let dir = TempDir::new().unwrap();
    let ctx = write_config(
        &dir,
        vec![
            node_config("good", &daemon, API_KEY),
            node_config("bad", &daemon, "nope"),
            panel_link::NodeConfig::new("gone", "127.0.0.1", unused_port(), API_KEY),
        ],
    );

    let args = StatusArgs {
        node: None,
        wait_ms: 5000,
    };
    let output = run_status(&args, &ctx).await.unwrap();
    let value: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert_eq!(value["total"], 3);
    assert_eq!(value["available"], 1);

    let nodes = value["nodes"].as_array().unwrap();
    let phase_of = |id: &str| {
        nodes
            .iter()
            .find(|n| n["id"] == id)
            .map(|n| n["phase"].clone())
            .unwrap()
    };
    assert_eq!(phase_of("good"), "ready");
    assert_eq!(phase_of("bad"), "unauthorized");
    assert_eq!(phase_of("gone"), "idle");
}
