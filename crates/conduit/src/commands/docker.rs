//! `conduit docker-hosts` - show Docker daemon candidates.

use anyhow::Result;
use clap::Args;
use conduit_docker::{HostResolver, Platform};
use serde_json::json;

use super::Context;

/// Arguments for `conduit docker-hosts`.
#[derive(Args, Debug)]
pub struct DockerHostsArgs {
    /// Explicit host to try first (same syntax as `docker_host`)
    #[arg(long)]
    pub host: Option<String>,

    /// Only list candidates, do not contact any daemon
    #[arg(long)]
    pub no_connect: bool,
}

/// Run `conduit docker-hosts`.
pub async fn run(args: DockerHostsArgs, ctx: &Context) -> Result<()> {
    let mut resolver = HostResolver::for_current_host(args.host.as_deref())?;
    let candidates = resolver.candidates().to_vec();

    let resolved = if args.no_connect {
        None
    } else {
        Some(resolver.resolve().await)
    };

    if ctx.json_output {
        let (connected, error) = match &resolved {
            Some(Ok(host)) => (Some(host.candidate.description.clone()), None),
            Some(Err(e)) => (None, Some(e.to_string())),
            None => (None, None),
        };
        let output = json!({
            "platform": Platform::detect().name(),
            "candidates": candidates
                .iter()
                .map(|c| json!({
                    "endpoint": c.endpoint.to_string(),
                    "source": c.source.label(),
                }))
                .collect::<Vec<_>>(),
            "connected": connected,
            "error": error,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Platform: {}", Platform::detect());
    println!("Candidates (in order):");
    for (i, candidate) in candidates.iter().enumerate() {
        println!("  {}. {}", i + 1, candidate.description);
    }

    match resolved {
        None => {}
        Some(Ok(host)) => {
            println!();
            println!("✓ Connected: {}", host.candidate.description);
        }
        Some(Err(e)) => {
            println!();
            println!("✗ No Docker daemon reachable");
            println!("  {e}");
            return Err(e.into());
        }
    }
    Ok(())
}
