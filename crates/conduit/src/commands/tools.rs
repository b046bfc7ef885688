//! `conduit tools` - connect to servers and list their tools.

use anyhow::Result;
use clap::Args;
use conduit_mcp::{McpManager, ToolInfo};
use serde_json::json;

use super::{Context, truncate};

/// Arguments for `conduit tools`.
#[derive(Args, Debug)]
pub struct ToolsArgs {
    /// Only this server (default: every enabled server)
    pub server: Option<String>,

    /// Show full tool schemas
    #[arg(long)]
    pub full: bool,
}

/// Run `conduit tools`.
pub async fn run(args: ToolsArgs, ctx: &Context) -> Result<()> {
    let mut manager = match &args.server {
        Some(name) => {
            let mut manager = McpManager::new();
            manager.add_server(ctx.find_server(name)?);
            manager.connect_server(name).await?;
            manager
        }
        None => {
            let mut manager = McpManager::with_configs(ctx.load_servers()?);
            let connected = manager.connect_all().await;
            if connected < manager.config_count() && !ctx.json_output {
                eprintln!(
                    "Connected to {connected} of {} servers (run with --verbose for details)",
                    manager.config_count()
                );
            }
            manager
        }
    };

    let all = manager.list_all_tools().await;

    if ctx.json_output {
        let output: serde_json::Map<_, _> = all
            .iter()
            .map(|(server, tools)| (server.clone(), json!(tools)))
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for (server, tools) in &all {
            println!("{server} ({} tools)", tools.len());
            for tool in tools {
                print_tool(tool, args.full)?;
            }
            println!();
        }
    }

    manager.shutdown_all().await;
    Ok(())
}

fn print_tool(tool: &ToolInfo, full: bool) -> Result<()> {
    let description = tool.description.as_deref().unwrap_or("");
    if full {
        println!("  - {}", tool.name);
        if !description.is_empty() {
            println!("    {description}");
        }
        if let Some(schema) = &tool.input_schema {
            for line in serde_json::to_string_pretty(schema)?.lines() {
                println!("      {line}");
            }
        }
    } else {
        println!("  - {:<30} {}", tool.name, truncate(description, 60));
    }
    Ok(())
}
