//! Config command handler - Inspect and edit the configuration file

use crate::cli::{ConfigArgs, ConfigOperation, OutputFormat};
use crate::commands::CommandContext;
use crate::config::{NodeConfig, PanelConfig};
use crate::error::{LinkError, Result};

/// Run the config command
pub fn run_config(args: &ConfigArgs, ctx: &CommandContext) -> Result<String> {
    match &args.operation {
        ConfigOperation::Show => run_config_show(ctx),
        ConfigOperation::Path => Ok(format!("{}\n", ctx.config_path.display())),
        ConfigOperation::Get { key } => {
            let config = ctx.load_config()?;
            config
                .get(key)
                .map(|value| format!("{}\n", value))
                .ok_or_else(|| LinkError::ConfigError {
                    message: format!("Unknown configuration key: {}", key),
                })
        }
        ConfigOperation::Set { key, value } => {
            let mut config = ctx.load_config()?;
            config.set(key, value)?;
            config.save_to(&ctx.config_path)?;
            Ok(format!("{} = {}\n", key, value))
        }
        ConfigOperation::AddNode {
            id,
            address,
            port,
            api_key,
        } => {
            let mut config = ctx.load_config()?;
            let replaced = config.node(id).is_some();
            config.upsert_node(NodeConfig::new(
                id.clone(),
                address.clone(),
                *port,
                api_key.clone(),
            ));
            config.validate()?;
            config.save_to(&ctx.config_path)?;
            let verb = if replaced { "Updated" } else { "Added" };
            Ok(format!("{} node {} ({}:{})\n", verb, id, address, port))
        }
        ConfigOperation::RemoveNode { id } => {
            let mut config = ctx.load_config()?;
            if !config.remove_node(id) {
                return Err(LinkError::UnknownNodeId { id: id.clone() });
            }
            config.save_to(&ctx.config_path)?;
            Ok(format!("Removed node {}\n", id))
        }
    }
}

fn run_config_show(ctx: &CommandContext) -> Result<String> {
    let config = redacted(ctx.load_config()?);
    match ctx.format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&config)?),
        OutputFormat::Text => {
            let body = toml::to_string_pretty(&config).map_err(|e| LinkError::ConfigError {
                message: format!("Failed to serialize config: {}", e),
            })?;
            Ok(format!("# {}\n{}", ctx.config_path.display(), body))
        }
    }
}

/// API keys are never printed
fn redacted(mut config: PanelConfig) -> PanelConfig {
    for node in &mut config.nodes {
        if !node.api_key.is_empty() {
            node.api_key = "********".to_string();
        }
    }
    config
}
