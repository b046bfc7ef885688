//! `conduit`: inspect and drive MCP servers from the shell.
//!
//! Servers come from a TOML file (see `conduit servers --help`); each
//! subcommand connects only to the servers it needs and disconnects before
//! exiting.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

mod commands;

use commands::{Context, call, check, docker, servers, tools};

/// Connect to MCP servers over uvx, npx, Docker and HTTP
#[derive(Parser)]
#[command(name = "conduit", version, about)]
#[command(propagate_version = true)]
struct Cli {
    /// Log connection progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    /// Server file to read instead of <config dir>/conduit/servers.toml
    #[arg(short, long, global = true, env = "CONDUIT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the configured servers
    Servers(servers::ServersArgs),
    /// List the tools each server exposes
    Tools(tools::ToolsArgs),
    /// Invoke one tool and print its result
    Call(call::CallArgs),
    /// Connect to one server and report what it advertises
    Check(check::CheckArgs),
    /// Show Docker daemon candidates and which one answers
    DockerHosts(docker::DockerHostsArgs),
}

/// Human-readable logs on stderr plus JSON lines in a daily file.
///
/// The returned guard flushes the file writer when dropped.
fn init_logging(verbose: bool) -> WorkerGuard {
    let console = if verbose {
        "conduit=debug,conduit_mcp=debug,conduit_docker=debug,rmcp=info,warn"
    } else {
        "conduit=warn,conduit_mcp=warn,conduit_docker=warn,error"
    };
    let dir = commands::config_dir().map_or_else(|| PathBuf::from("logs"), |d| d.join("logs"));
    let (file, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "conduit.log"));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(EnvFilter::new(console)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(file)
                .with_filter(EnvFilter::new("conduit=trace,conduit_mcp=trace,conduit_docker=debug,info")),
        )
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _flush = init_logging(cli.verbose);

    let ctx = Context {
        config_path: cli.config.or_else(commands::default_config_path),
        json_output: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Command::Servers(args) => servers::run(args, &ctx).await,
        Command::Tools(args) => tools::run(args, &ctx).await,
        Command::Call(args) => call::run(args, &ctx).await,
        Command::Check(args) => check::run(args, &ctx).await,
        Command::DockerHosts(args) => docker::run(args, &ctx).await,
    }
}
