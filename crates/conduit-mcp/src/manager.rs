//! Several servers behind one handle.
//!
//! [`McpManager`] keeps a configuration per server name and one
//! [`McpClient`] per server it managed to connect. Connecting fans out
//! concurrently; a server that fails is logged and left out rather than
//! failing the batch.
//!
//! ```rust,ignore
//! use conduit_mcp::{McpManager, ServerConfig};
//!
//! let mut manager = McpManager::with_configs([
//!     ServerConfig::uvx("fetch", "mcp-server-fetch"),
//!     ServerConfig::docker("db", "mcp/sqlite"),
//! ]);
//! let connected = manager.connect_all().await;
//! for (server, tool) in manager.all_tools_flat().await {
//!     println!("{server}: {}", tool.name);
//! }
//! manager.shutdown_all().await;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::client::{McpClient, split_qualified};
use crate::config::ServerConfig;
use crate::error::{McpError, Result};
use crate::protocol::{CallToolResult, ToolInfo};

/// Configured servers and their live clients, keyed by server name.
#[derive(Default)]
pub struct McpManager {
    configs: BTreeMap<String, ServerConfig>,
    clients: BTreeMap<String, Arc<McpClient>>,
}

impl std::fmt::Debug for McpManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpManager")
            .field("configured", &self.configs.keys().collect::<Vec<_>>())
            .field("connected", &self.clients.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl McpManager {
    /// An empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// A manager holding `configs`, none connected yet.
    pub fn with_configs(configs: impl IntoIterator<Item = ServerConfig>) -> Self {
        let mut manager = Self::new();
        for config in configs {
            manager.add_server(config);
        }
        manager
    }

    /// Register a server. A configuration with the same name is replaced;
    /// a client already connected under that name keeps running until
    /// [`McpManager::connect_server`] or a shutdown replaces it.
    pub fn add_server(&mut self, config: ServerConfig) {
        debug!(server = %config.name, transport = %config.transport, "Registered MCP server");
        self.configs.insert(config.name.clone(), config);
    }

    /// Disconnect and forget a server. False when it was never registered.
    pub async fn remove_server(&mut self, name: &str) -> bool {
        self.shutdown_server(name).await;
        self.configs.remove(name).is_some()
    }

    /// Whether `name` has a live client.
    pub fn is_connected(&self, name: &str) -> bool {
        self.clients.get(name).is_some_and(|c| c.is_connected())
    }

    /// Registered servers.
    pub fn config_count(&self) -> usize {
        self.configs.len()
    }

    /// Servers with a client.
    pub fn connected_count(&self) -> usize {
        self.clients.len()
    }

    /// Connect every enabled server without a client, all at once.
    ///
    /// Returns how many connected in this call.
    pub async fn connect_all(&mut self) -> usize {
        let attempts: Vec<Arc<McpClient>> = self
            .configs
            .values()
            .filter(|config| config.enabled && !self.clients.contains_key(&config.name))
            .map(|config| Arc::new(McpClient::new(config.clone())))
            .collect();

        let outcomes = join_all(attempts.iter().map(|client| client.connect())).await;

        let mut connected = 0;
        for (client, outcome) in attempts.into_iter().zip(outcomes) {
            match outcome {
                Ok(()) => {
                    connected += 1;
                    self.clients.insert(client.name().to_string(), client);
                }
                Err(err) => {
                    warn!(server = %client.name(), error = %err.redacted(), "Skipping server that failed to connect");
                }
            }
        }

        info!(
            connected,
            live = self.clients.len(),
            configured = self.configs.len(),
            "Connected MCP servers"
        );
        connected
    }

    /// Connect one server, reusing its client when it is still live.
    pub async fn connect_server(&mut self, name: &str) -> Result<Arc<McpClient>> {
        if let Some(client) = self.clients.get(name).filter(|c| c.is_connected()) {
            return Ok(Arc::clone(client));
        }
        let config = self
            .configs
            .get(name)
            .cloned()
            .ok_or_else(|| McpError::configuration(format!("server '{name}' not configured")))?;

        let client = Arc::new(McpClient::new(config));
        client.connect().await?;
        if let Some(stale) = self.clients.insert(name.to_string(), Arc::clone(&client)) {
            stale.disconnect().await;
        }
        Ok(client)
    }

    /// Tools per connected server. A server whose listing fails is left out.
    pub async fn list_all_tools(&self) -> BTreeMap<String, Vec<ToolInfo>> {
        let listings = join_all(self.clients.iter().map(|(name, client)| async move {
            (name, client.list_tools().await)
        }))
        .await;

        listings
            .into_iter()
            .filter_map(|(name, listing)| match listing {
                Ok(tools) => Some((name.clone(), tools)),
                Err(err) => {
                    warn!(server = %name, error = %err.redacted(), "Could not list tools");
                    None
                }
            })
            .collect()
    }

    /// Every tool paired with the server exposing it.
    pub async fn all_tools_flat(&self) -> Vec<(String, ToolInfo)> {
        let mut flat = Vec::new();
        for (server, tools) in self.list_all_tools().await {
            flat.extend(tools.into_iter().map(|tool| (server.clone(), tool)));
        }
        flat
    }

    /// Invoke `tool` on `server`.
    pub async fn call_tool(&self, server: &str, tool: &str, arguments: Value) -> Result<CallToolResult> {
        match self.clients.get(server) {
            Some(client) => client.call_tool(tool, arguments).await,
            None => Err(McpError::NotConnected),
        }
    }

    /// Invoke a tool addressed as `server__tool`.
    pub async fn call_qualified(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        let Some((server, tool)) = split_qualified(name) else {
            return Err(McpError::configuration(format!(
                "'{name}' is not a qualified tool name"
            )));
        };
        self.call_tool(server, tool, arguments).await
    }

    /// Disconnect one server, keeping its configuration. False when it had no client.
    pub async fn shutdown_server(&mut self, name: &str) -> bool {
        let Some(client) = self.clients.remove(name) else {
            return false;
        };
        client.disconnect().await;
        info!(server = %name, "MCP server shut down");
        true
    }

    /// Disconnect every server, keeping their configurations.
    pub async fn shutdown_all(&mut self) {
        let clients = std::mem::take(&mut self.clients);
        if clients.is_empty() {
            return;
        }
        join_all(clients.values().map(|client| client.disconnect())).await;
        info!(count = clients.len(), "All MCP servers shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportKind;

    fn unreachable(name: &str) -> ServerConfig {
        ServerConfig::new(name, TransportKind::Uvx).with_command("conduit-no-such-binary-7f3a")
    }

    #[tokio::test]
    async fn test_register_replace_and_remove() {
        let mut manager = McpManager::with_configs([
            ServerConfig::uvx("fetch", "mcp-server-fetch"),
            ServerConfig::npx("fs", "@modelcontextprotocol/server-filesystem"),
        ]);
        manager.add_server(ServerConfig::uvx("fetch", "mcp-server-fetch==2"));
        assert_eq!(manager.config_count(), 2);
        assert!(format!("{manager:?}").contains("fetch"));

        assert!(manager.remove_server("fs").await);
        assert!(!manager.remove_server("fs").await);
        assert_eq!(manager.config_count(), 1);
    }

    #[tokio::test]
    async fn test_connect_all_counts_only_successes() {
        let mut manager = McpManager::new();
        assert_eq!(manager.connect_all().await, 0);

        let mut off = ServerConfig::uvx("off", "pkg");
        off.enabled = false;
        manager.add_server(off);
        manager.add_server(unreachable("gone"));

        assert_eq!(manager.connect_all().await, 0);
        assert_eq!(manager.connected_count(), 0);
        assert!(!manager.is_connected("gone"));
        assert!(!manager.is_connected("off"));
        assert_eq!(manager.config_count(), 2);
    }

    #[tokio::test]
    async fn test_connect_server_errors() {
        let mut manager = McpManager::with_configs([unreachable("gone")]);

        let missing = manager.connect_server("nope").await.unwrap_err();
        assert!(matches!(missing, McpError::Configuration(_)));

        let failed = manager.connect_server("gone").await.unwrap_err();
        assert!(failed.to_string().starts_with("gone (uvx): "), "{failed}");
        assert!(!manager.is_connected("gone"));
    }

    #[tokio::test]
    async fn test_routing_without_clients() {
        let mut manager = McpManager::with_configs([ServerConfig::uvx("fs", "pkg")]);
        assert!(matches!(
            manager.call_tool("fs", "read", Value::Null).await,
            Err(McpError::NotConnected)
        ));
        assert!(matches!(
            manager.call_qualified("fs__read", Value::Null).await,
            Err(McpError::NotConnected)
        ));
        assert!(matches!(
            manager.call_qualified("read", Value::Null).await,
            Err(McpError::Configuration(_))
        ));

        assert!(manager.list_all_tools().await.is_empty());
        assert!(!manager.shutdown_server("fs").await);
        manager.shutdown_all().await;
        assert_eq!(manager.config_count(), 1);
    }
}
