//! CLI command handlers.

pub mod call;
pub mod check;
pub mod docker;
pub mod servers;
pub mod tools;

use std::path::PathBuf;

use anyhow::{Context as _, Result, anyhow};
use conduit_mcp::{ServerConfig, load_config};

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Server configuration file, if one could be located.
    pub config_path: Option<PathBuf>,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// Load every configured server.
    pub fn load_servers(&self) -> Result<Vec<ServerConfig>> {
        let path = self
            .config_path
            .as_ref()
            .ok_or_else(|| anyhow!("no configuration directory found; pass --config"))?;
        load_config(path).with_context(|| format!("failed to load {}", path.display()))
    }

    /// Load one server by name.
    pub fn find_server(&self, name: &str) -> Result<ServerConfig> {
        self.load_servers()?
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| {
                anyhow!(
                    "MCP server '{}' not found. Use 'conduit servers' to see configured servers.",
                    name
                )
            })
    }
}

/// `<config dir>/conduit`.
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("conduit"))
}

/// `<config dir>/conduit/servers.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("servers.toml"))
}

/// Truncate a string for table display.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

/// Where a server lives, for display.
pub fn target(server: &ServerConfig) -> String {
    if server.transport.is_http() {
        return server
            .endpoint()
            .map(|u| conduit_mcp::redact::url(u.as_str()))
            .unwrap_or_else(|_| "(invalid url)".to_string());
    }
    if server.transport.is_process() {
        let command = server.command.as_deref().unwrap_or("");
        return conduit_mcp::redact::command_line(command, &server.args);
    }
    server.image.clone().unwrap_or_default()
}
