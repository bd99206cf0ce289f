//! Call command handler - One correlated call against a node

use std::time::Duration;

use crate::cli::{CallArgs, OutputFormat};
use crate::commands::{connect_ready, handshake_window, CommandContext};
use crate::error::Result;
use crate::remote::SessionRegistry;

/// Run the call command
pub async fn run_call(args: &CallArgs, ctx: &CommandContext) -> Result<String> {
    let config = ctx.load_config()?;
    let registry = SessionRegistry::from_config(&config);
    let session = registry.get(&args.node)?;

    let payload = parse_payload(args.payload.as_deref());
    let timeout = args
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.call_timeout());

    if ctx.verbose {
        eprintln!("Connecting to {} ({})", args.node, session.config().url());
    }
    connect_ready(&session, handshake_window(&config)).await?;

    let result = session.call(&args.event, payload, timeout).await;
    session.disconnect();
    let result = result?;

    let output = match ctx.format {
        OutputFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
            "_type": "call_result",
            "node": args.node,
            "event": args.event,
            "result": result,
        }))?,
        OutputFormat::Text => serde_json::to_string_pretty(&result)?,
    };
    Ok(output)
}

/// JSON if it parses, otherwise the raw text as a JSON string
fn parse_payload(raw: Option<&str>) -> serde_json::Value {
    match raw {
        None => serde_json::Value::Null,
        Some(text) => serde_json::from_str(text)
            .unwrap_or_else(|_| serde_json::Value::String(text.to_string())),
    }
}
