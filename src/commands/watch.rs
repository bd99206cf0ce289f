//! Watch command handler - Stream a node's events
//!
//! The reconnect supervisor keeps the link alive while watching; the
//! subscription survives reconnects, so events resume once the node is back.

use std::sync::Arc;

use crate::cli::{OutputFormat, WatchArgs};
use crate::commands::CommandContext;
use crate::error::{LinkError, Result};
use crate::remote::{
    EventScope, NodeEvent, SessionRegistry, SessionSettings, Supervisor, WsConnector,
};

/// Run the watch command
pub async fn run_watch(args: &WatchArgs, ctx: &CommandContext) -> Result<String> {
    let config = ctx.load_config()?;
    let node = config
        .node(&args.node)
        .cloned()
        .ok_or_else(|| LinkError::UnknownNodeId {
            id: args.node.clone(),
        })?;

    // Only the watched node is supervised
    let registry = Arc::new(SessionRegistry::new(
        Arc::new(WsConnector),
        SessionSettings::from(&config),
    ));
    let session = registry.add_node(node);
    let scope = EventScope::from(args.scope.as_str());
    let mut subscription = session.subscribe(scope.clone());
    let supervisor = Supervisor::new(registry.clone(), &config.reconnect).spawn();

    if ctx.verbose {
        eprintln!("Watching {} on scope {} (Ctrl-C to stop)", args.node, scope);
    }

    let mut seen = 0usize;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = subscription.recv() => {
                let Some(event) = event else { break };
                println!("{}", format_event(&event, ctx.format)?);
                seen += 1;
                if args.count.is_some_and(|count| seen >= count) {
                    break;
                }
            }
        }
    }

    supervisor.shutdown().await;
    registry.disconnect_all();

    Ok(match ctx.format {
        OutputFormat::Text if ctx.verbose => format!("{} event(s) received\n", seen),
        _ => String::new(),
    })
}

fn format_event(event: &NodeEvent, format: OutputFormat) -> Result<String> {
    let now = chrono::Utc::now().to_rfc3339();
    Ok(match format {
        OutputFormat::Json => serde_json::to_string(&serde_json::json!({
            "time": now,
            "scope": event.scope.to_string(),
            "event": event.event,
            "payload": event.payload,
        }))?,
        OutputFormat::Text => format!(
            "{} [{}] {}: {}",
            now,
            event.scope,
            event.event,
            serde_json::to_string(&event.payload)?
        ),
    })
}
