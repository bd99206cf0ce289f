//! panel-link CLI entry point

use std::process::ExitCode;

use clap::Parser;

use panel_link::cli::{Cli, Commands};
use panel_link::commands::{run_call, run_config, run_status, run_watch, CommandContext};
use panel_link::config::PanelConfig;
use panel_link::LinkError;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let ctx = CommandContext::new(cli.format, cli.verbose, cli.config.clone());
    init_logging(&ctx, cli.verbose);

    match run(&cli, &ctx).await {
        Ok(output) => {
            print!("{}", output);
            if !output.is_empty() && !output.ends_with('\n') {
                println!();
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<LinkError>()
                .map(LinkError::exit_code)
                .unwrap_or(ExitCode::FAILURE)
        }
    }
}

async fn run(cli: &Cli, ctx: &CommandContext) -> anyhow::Result<String> {
    let output = match &cli.command {
        Commands::Status(args) => run_status(args, ctx).await?,
        Commands::Call(args) => run_call(args, ctx).await?,
        Commands::Watch(args) => run_watch(args, ctx).await?,
        Commands::Config(args) => run_config(args, ctx)?,
    };
    Ok(output)
}

/// Log to stderr so command output on stdout stays machine-readable.
/// `RUST_LOG` wins over the configured level.
fn init_logging(ctx: &CommandContext, verbose: bool) {
    let level = if verbose {
        "debug".to_string()
    } else {
        // A broken config file is reported by the command itself
        ctx.load_config()
            .map(|config| config.logging.level)
            .unwrap_or_else(|_| PanelConfig::default().logging.level)
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("panel_link={}", level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
