//! `conduit servers` - list configured MCP servers.

use anyhow::Result;
use clap::Args;
use serde_json::json;

use super::{Context, target, truncate};

/// Arguments for `conduit servers`.
#[derive(Args, Debug)]
pub struct ServersArgs {
    /// Include disabled servers
    #[arg(long)]
    pub all: bool,
}

/// Run `conduit servers`.
pub async fn run(args: ServersArgs, ctx: &Context) -> Result<()> {
    let servers: Vec<_> = ctx
        .load_servers()?
        .into_iter()
        .filter(|s| args.all || s.enabled)
        .collect();

    if ctx.json_output {
        let output: Vec<_> = servers
            .iter()
            .map(|s| {
                json!({
                    "name": s.name,
                    "transport": s.transport.label(),
                    "enabled": s.enabled,
                    "target": target(s),
                    "prefix_tool_names": s.prefix_tool_names,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if servers.is_empty() {
        println!("No MCP servers configured.");
        if let Some(path) = &ctx.config_path {
            println!();
            println!("Add [[servers]] entries to {}", path.display());
        }
        return Ok(());
    }

    println!(
        "{:<20} {:<16} {:<10} {:<40}",
        "NAME", "TRANSPORT", "STATUS", "TARGET"
    );
    println!("{}", "-".repeat(86));

    for server in &servers {
        let status = if server.enabled { "enabled" } else { "disabled" };
        println!(
            "{:<20} {:<16} {:<10} {:<40}",
            truncate(&server.name, 20),
            server.transport.label(),
            status,
            truncate(&target(server), 40)
        );

        if ctx.verbose {
            if !server.env.is_empty() {
                println!("  Environment:");
                for key in server.env.keys() {
                    println!("    {key}=***");
                }
            }
            if !server.container_args.is_empty() {
                println!("  Docker args: {}", conduit_mcp::redact::container_args(&server.container_args).join(" "));
            }
            if !server.headers.is_empty() {
                println!("  Headers:");
                for key in server.headers.keys() {
                    println!("    {key}: ***");
                }
            }
            println!("  Timeout: {}s", server.timeout_secs);
            if server.transport.is_http() {
                println!("  Retries: {}", server.retries);
            }
        }
    }

    Ok(())
}
