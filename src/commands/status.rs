//! Status command handler - Connect nodes and report their session state

use std::time::Duration;

use futures_util::future::join_all;

use crate::cli::{OutputFormat, StatusArgs};
use crate::commands::CommandContext;
use crate::error::Result;
use crate::remote::{SessionRegistry, SessionStatus};

/// Run the status command
pub async fn run_status(args: &StatusArgs, ctx: &CommandContext) -> Result<String> {
    let config = ctx.load_config()?;
    let registry = SessionRegistry::from_config(&config);

    let sessions = match &args.node {
        Some(id) => vec![registry.get(id)?],
        None => registry.sessions(),
    };

    let wait = Duration::from_millis(args.wait_ms);
    for session in &sessions {
        session.connect(None);
    }
    join_all(sessions.iter().map(|s| s.wait_settled(wait))).await;

    let statuses: Vec<SessionStatus> = sessions.iter().map(|s| s.status()).collect();
    let available = statuses.iter().filter(|s| s.available).count();
    registry.disconnect_all();

    let output = match ctx.format {
        OutputFormat::Json => {
            let json_value = serde_json::json!({
                "_type": "node_status",
                "total": statuses.len(),
                "available": available,
                "nodes": statuses,
            });
            serde_json::to_string_pretty(&json_value)?
        }
        OutputFormat::Text => format_status_table(&statuses, available, ctx.verbose),
    };
    Ok(output)
}

fn format_status_table(statuses: &[SessionStatus], available: usize, verbose: bool) -> String {
    let mut output = String::new();
    output.push_str("═══════════════════════════════════════════════════════\n");
    output.push_str("  DAEMON NODES\n");
    output.push_str("═══════════════════════════════════════════════════════\n\n");

    if statuses.is_empty() {
        output.push_str("No nodes configured. Add one with `panel-link config add-node`.\n");
        return output;
    }

    let id_width = statuses.iter().map(|s| s.id.len()).max().unwrap_or(2).max(2);
    output.push_str(&format!(
        "{:<id_width$}  {:<28}  {:<14}  {}\n",
        "ID",
        "ADDRESS",
        "PHASE",
        "AVAILABLE",
        id_width = id_width
    ));
    for status in statuses {
        output.push_str(&format!(
            "{:<id_width$}  {:<28}  {:<14}  {}\n",
            status.id,
            format!("{}:{}", status.address, status.port),
            status.phase.to_string(),
            if status.available { "yes" } else { "no" },
            id_width = id_width
        ));
        if verbose {
            output.push_str(&format!(
                "    last_change: {}  disconnects: {}\n",
                status.last_change, status.disconnects
            ));
        }
    }
    output.push_str(&format!("\n{}/{} available\n", available, statuses.len()));
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::SessionPhase;

    fn status(id: &str, phase: SessionPhase, available: bool) -> SessionStatus {
        SessionStatus {
            id: id.to_string(),
            address: "10.0.0.1".to_string(),
            port: 24444,
            phase,
            available,
            pending_calls: 0,
            subscriptions: 0,
            disconnects: 0,
            last_change: "2026-01-01T00:00:00+00:00".to_string(),
        }
    }

    #[test]
    fn test_table_lists_every_node() {
        let statuses = vec![
            status("alpha", SessionPhase::Ready, true),
            status("beta", SessionPhase::Unauthorized, false),
        ];
        let table = format_status_table(&statuses, 1, false);
        assert!(table.contains("alpha"));
        assert!(table.contains("unauthorized"));
        assert!(table.contains("10.0.0.1:24444"));
        assert!(table.contains("1/2 available"));
        assert!(!table.contains("last_change"));
    }

    #[test]
    fn test_empty_table_hints_at_config() {
        let table = format_status_table(&[], 0, false);
        assert!(table.contains("No nodes configured"));
    }
}
