//! Stub daemon binary
//!
//! Serves the panel protocol for local testing: answers `auth`, `ping`
//! and `echo`, and emits a node-level `heartbeat` event on an interval.
//!
//! # Usage
//!
//! ```bash
//! panel-link-stub --port 24444 --api-key secret
//! panel-link-stub --host 0.0.0.0 --port 24444 --api-key secret --heartbeat-secs 0
//! ```

use std::time::Duration;

use clap::Parser;

use panel_link::daemon_stub::StubDaemon;
use panel_link::remote::EventScope;

/// Stub daemon node for panel-link
#[derive(Parser, Debug)]
#[command(name = "panel-link-stub")]
#[command(about = "Minimal daemon endpoint speaking the panel protocol")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "24444")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// API key panels must present
    #[arg(long, env = "PANEL_LINK_STUB_KEY")]
    api_key: String,

    /// Seconds between heartbeat events (0 disables them)
    #[arg(long, default_value = "5")]
    heartbeat_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("panel_link=info".parse()?)
                .add_directive("panel_link_stub=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let started = chrono::Utc::now();

    let daemon = StubDaemon::builder(args.api_key)
        .handle("ping", |_| Ok(serde_json::json!("pong")))
        .handle("echo", |payload| Ok(payload))
        .handle("info", move |_| {
            Ok(serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "started": started.to_rfc3339(),
            }))
        })
        .bind(&format!("{}:{}", args.host, args.port))
        .await?;

    let mut heartbeat = (args.heartbeat_secs > 0)
        .then(|| tokio::time::interval(Duration::from_secs(args.heartbeat_secs)));
    let mut beats: u64 = 0;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
            _ = async {
                match heartbeat.as_mut() {
                    Some(interval) => { interval.tick().await; }
                    None => std::future::pending::<()>().await,
                }
            } => {
                beats += 1;
                let sent = daemon.broadcast(
                    EventScope::Node,
                    "heartbeat",
                    serde_json::json!({ "beat": beats }),
                );
                tracing::debug!("Heartbeat {} queued for {} panel(s)", beats, sent);
            }
        }
    }

    daemon.shutdown().await;
    Ok(())
}
