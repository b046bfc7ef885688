//! `conduit check` - test the connection to one server.

use std::time::Instant;

use anyhow::Result;
use clap::Args;
use conduit_mcp::McpClient;
use serde_json::json;

use super::{Context, target};

/// Arguments for `conduit check`.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Name of the MCP server to test
    pub name: String,
}

/// Run `conduit check`.
pub async fn run(args: CheckArgs, ctx: &Context) -> Result<()> {
    let config = ctx.find_server(&args.name)?;

    if !ctx.json_output {
        println!("Testing connection to MCP server: {}", config.name);
        println!("  Transport: {}", config.transport);
        println!("  Target: {}", target(&config));
        println!();
    }

    let client = McpClient::new(config);
    let started = Instant::now();
    if let Err(e) = client.connect().await {
        if ctx.json_output {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "status": "error",
                    "phase": "connect",
                    "error": e.to_string(),
                }))?
            );
        } else {
            println!("✗ Connection failed");
            println!("  {e}");
        }
        return Err(e.into());
    }
    let elapsed = started.elapsed();

    let tools = client.list_tools().await;
    let info = client.server_info().unwrap_or_default();
    client.disconnect().await;
    let tools = tools?;

    if ctx.json_output {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "status": "connected",
                "server": info.name,
                "version": info.version,
                "connect_ms": elapsed.as_millis() as u64,
                "tools": tools.iter().map(|t| &t.name).collect::<Vec<_>>(),
            }))?
        );
    } else {
        println!("✓ Connected in {} ms", elapsed.as_millis());
        println!("  Server: {} {}", info.name, info.version);
        println!("  Tools: {}", tools.len());
        for tool in &tools {
            println!("    - {}", tool.name);
        }
    }
    Ok(())
}
