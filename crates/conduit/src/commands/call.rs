//! `conduit call` - invoke a tool on a server.

use anyhow::{Context as _, Result, bail};
use clap::Args;
use conduit_mcp::{McpClient, ToolContent};
use serde_json::Value;

use super::Context;

/// Arguments for `conduit call`.
#[derive(Args, Debug)]
pub struct CallArgs {
    /// Server name
    pub server: String,

    /// Tool name (bare or `server__tool`)
    pub tool: String,

    /// Tool arguments as a JSON object
    #[arg(short, long, default_value = "{}")]
    pub args: String,
}

/// Run `conduit call`.
pub async fn run(args: CallArgs, ctx: &Context) -> Result<()> {
    let arguments: Value = serde_json::from_str(&args.args)
        .with_context(|| format!("invalid --args JSON: {}", args.args))?;
    if !arguments.is_object() {
        bail!("--args must be a JSON object");
    }

    let client = McpClient::new(ctx.find_server(&args.server)?);
    client.connect().await?;
    let result = client.call_tool(&args.tool, arguments).await;
    client.disconnect().await;
    let result = result?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        for content in &result.content {
            match content {
                ToolContent::Text { text, .. } => println!("{text}"),
                other => println!("{}", serde_json::to_string(other)?),
            }
        }
    }

    if result.is_error() {
        bail!("tool '{}' reported an error", args.tool);
    }
    Ok(())
}
