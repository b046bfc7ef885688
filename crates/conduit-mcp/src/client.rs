//! MCP client for one configured server.
//!
//! [`McpClient`] owns at most one live [`Transport`]. It tracks the
//! connection state, caches the tool list and applies tool name prefixing;
//! everything transport specific lives in [`crate::transport`].

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{ServerConfig, TOOL_NAME_SEPARATOR};
use crate::error::{McpError, Result};
use crate::protocol::{CallToolResult, InitializeResult, ServerInfo, ToolInfo};
use crate::redact;
use crate::transport::{Connected, Transport};

/// How long a fetched tool list is served from the cache.
pub const TOOL_CACHE_TTL: Duration = Duration::from_secs(5);

/// Lifecycle of a client's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No live connection.
    Disconnected,
    /// Spawning, creating or reaching the server.
    Connecting,
    /// The MCP handshake is running.
    Handshaking,
    /// Requests may be sent.
    Ready,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Ready => "ready",
        })
    }
}

#[derive(Debug, Clone)]
struct CachedTools {
    tools: Vec<ToolInfo>,
    fetched_at: Instant,
}

impl CachedTools {
    fn new(tools: Vec<ToolInfo>) -> Self {
        Self {
            tools,
            fetched_at: Instant::now(),
        }
    }

    fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < TOOL_CACHE_TTL
    }
}

/// `<server>__<tool>`.
pub fn qualified_name(server: &str, tool: &str) -> String {
    format!("{server}{TOOL_NAME_SEPARATOR}{tool}")
}

/// Split a qualified name at the first separator.
pub fn split_qualified(name: &str) -> Option<(&str, &str)> {
    name.split_once(TOOL_NAME_SEPARATOR)
        .filter(|(server, tool)| !server.is_empty() && !tool.is_empty())
}

/// The live transport, plus a counter bumped by every `disconnect()` so an
/// in-flight connect can tell it was cancelled.
#[derive(Default)]
struct Slot {
    transport: Option<Arc<Transport>>,
    epoch: u64,
}

type TransportSlot = Arc<Mutex<Slot>>;

/// An MCP client bound to a single server.
pub struct McpClient {
    config: ServerConfig,
    state: Arc<watch::Sender<ConnectionState>>,
    transport: TransportSlot,
    server_info: Mutex<Option<InitializeResult>>,
    tools: Mutex<Option<CachedTools>>,
    connect_lock: tokio::sync::Mutex<()>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("server", &self.config.name)
            .field("transport", &self.config.transport)
            .field("state", &self.state())
            .finish()
    }
}

impl McpClient {
    /// Create a disconnected client.
    pub fn new(config: ServerConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            state: Arc::new(state),
            transport: Arc::new(Mutex::new(Slot::default())),
            server_info: Mutex::new(None),
            tools: Mutex::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
            watcher: Mutex::new(None),
        }
    }

    /// Server name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// A copy of the configuration.
    pub fn config(&self) -> ServerConfig {
        self.config.clone()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Whether requests may be sent.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// The server's identity, once connected.
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.server_info
            .lock()
            .as_ref()
            .map(|r| r.server_info.clone())
    }

    /// The full initialize result, once connected.
    pub fn initialize_result(&self) -> Option<InitializeResult> {
        self.server_info.lock().clone()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(server = %self.config.name, from = %previous, to = %state, "Connection state changed");
        }
    }

    /// Connect and run the handshake.
    ///
    /// A no-op when already connected. A second call while one is running
    /// fails with [`McpError::ConnectInProgress`]. On failure every partially
    /// created resource has been released and the client is disconnected.
    pub async fn connect(&self) -> Result<()> {
        let Ok(_guard) = self.connect_lock.try_lock() else {
            return Err(McpError::ConnectInProgress);
        };
        if self.state() == ConnectionState::Ready {
            debug!(server = %self.config.name, "Already connected");
            return Ok(());
        }

        self.set_state(ConnectionState::Connecting);
        info!(
            server = %self.config.name,
            transport = %self.config.transport,
            "Connecting to MCP server"
        );
        let epoch = self.transport.lock().epoch;

        let state = Arc::clone(&self.state);
        let on_handshake = move || {
            state.send_replace(ConnectionState::Handshaking);
        };

        let connected = match Transport::connect(&self.config, &on_handshake).await {
            Ok(connected) => connected,
            Err(err) => {
                self.set_state(ConnectionState::Disconnected);
                let err = McpError::connect(&self.config.name, self.config.transport.label(), err);
                warn!(server = %self.config.name, error = %err.redacted(), "Failed to connect to MCP server");
                return Err(err);
            }
        };

        let Connected {
            transport,
            server,
            tools,
        } = connected;
        let transport = Arc::new(transport);
        let (remote, version) = (server.server_info.name.clone(), server.server_info.version.clone());
        let installed = {
            let mut slot = self.transport.lock();
            if slot.epoch == epoch {
                slot.transport = Some(Arc::clone(&transport));
                *self.server_info.lock() = Some(server);
                *self.tools.lock() = tools.map(CachedTools::new);
                self.set_state(ConnectionState::Ready);
                true
            } else {
                false
            }
        };
        if !installed {
            debug!(server = %self.config.name, "Disconnected while connecting, dropping transport");
            transport.shutdown().await;
            self.set_state(ConnectionState::Disconnected);
            return Err(McpError::connect(
                &self.config.name,
                self.config.transport.label(),
                McpError::closed("disconnected while connecting"),
            ));
        }

        info!(
            server = %self.config.name,
            transport = transport.label(),
            remote = %remote,
            version = %version,
            "MCP server connected"
        );
        // installed first, so a peer that died during the handshake is seen here
        self.spawn_watcher(&transport);
        Ok(())
    }

    /// Flip to `Disconnected` when the transport reports termination.
    fn spawn_watcher(&self, transport: &Arc<Transport>) {
        let Some(mut termination) = transport.subscribe_termination() else {
            return;
        };
        let current: Weak<Transport> = Arc::downgrade(transport);
        let slot = Arc::clone(&self.transport);
        let state = Arc::clone(&self.state);
        let server = self.config.name.clone();

        let handle = tokio::spawn(async move {
            let reason = loop {
                let ended = termination.borrow_and_update().clone();
                if let Some(t) = ended {
                    break t.reason;
                }
                if termination.changed().await.is_err() {
                    break "transport dropped".to_string();
                }
            };

            let lost = {
                let mut slot = slot.lock();
                let is_current = slot
                    .transport
                    .as_ref()
                    .is_some_and(|t| std::ptr::eq(Arc::as_ptr(t), current.as_ptr()));
                if is_current {
                    state.send_replace(ConnectionState::Disconnected);
                    slot.transport.take()
                } else {
                    None
                }
            };
            if lost.is_some() {
                warn!(server = %server, reason = %redact::error_text(&reason), "MCP server connection lost");
            }
        });

        if let Some(previous) = self.watcher.lock().replace(handle) {
            previous.abort();
        }
    }

    fn ready_transport(&self) -> Result<Arc<Transport>> {
        if self.state() != ConnectionState::Ready {
            return Err(McpError::NotConnected);
        }
        self.transport
            .lock()
            .transport
            .clone()
            .ok_or(McpError::NotConnected)
    }

    /// Send a raw JSON-RPC request and return its result.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let transport = self.ready_transport()?;
        transport.request(method, params).await
    }

    /// Tools exposed by the server, named as callers should address them.
    ///
    /// Served from the cache while it is fresh, or always for session
    /// transports whose handshake already fetched the list.
    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        let transport = self.ready_transport()?;

        let cached = {
            let cache = self.tools.lock();
            cache
                .as_ref()
                .filter(|c| transport.is_session() || c.is_fresh())
                .map(|c| c.tools.clone())
        };

        let tools = match cached {
            Some(tools) => tools,
            None => {
                let tools = transport.list_tools().await?;
                debug!(server = %self.config.name, tool_count = tools.len(), "Listed tools");
                *self.tools.lock() = Some(CachedTools::new(tools.clone()));
                tools
            }
        };
        Ok(self.present(tools))
    }

    fn present(&self, tools: Vec<ToolInfo>) -> Vec<ToolInfo> {
        if !self.config.prefix_tool_names {
            return tools;
        }
        tools
            .into_iter()
            .map(|tool| ToolInfo {
                name: qualified_name(&self.config.name, &tool.name),
                ..tool
            })
            .collect()
    }

    /// The server-side name for `name`, stripping this server's prefix.
    pub fn server_tool_name<'a>(&self, name: &'a str) -> &'a str {
        if !self.config.prefix_tool_names {
            return name;
        }
        match split_qualified(name) {
            Some((server, tool)) if server == self.config.name => tool,
            _ => name,
        }
    }

    /// Invoke a tool. Qualified and bare names are both accepted.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        let transport = self.ready_transport()?;
        let tool = self.server_tool_name(name);
        debug!(server = %self.config.name, tool = %tool, "Calling tool");

        let result = transport.call_tool(tool, arguments).await?;
        if result.is_error() {
            warn!(server = %self.config.name, tool = %tool, "Tool call returned error");
        } else {
            debug!(server = %self.config.name, tool = %tool, "Tool call succeeded");
        }
        Ok(result)
    }

    /// Tear the connection down. Safe to call at any time, any number of times.
    ///
    /// A connect still running when this is called fails instead of
    /// installing its transport.
    pub async fn disconnect(&self) {
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.abort();
        }
        let transport = {
            let mut slot = self.transport.lock();
            slot.epoch += 1;
            slot.transport.take()
        };
        self.tools.lock().take();

        if let Some(transport) = transport {
            info!(server = %self.config.name, "Disconnecting MCP server");
            transport.shutdown().await;
        }
        self.set_state(ConnectionState::Disconnected);
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.get_mut().take() {
            watcher.abort();
        }
        // containers are only cleaned up by an explicit shutdown
        if let Some(transport) = self.transport.lock().transport.take()
            && let Ok(runtime) = tokio::runtime::Handle::try_current()
        {
            runtime.spawn(async move { transport.shutdown().await });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportKind;

    #[test]
    fn test_qualified_names() {
        assert_eq!(qualified_name("fs", "read_file"), "fs__read_file");
        assert_eq!(split_qualified("fs__read_file"), Some(("fs", "read_file")));
        assert_eq!(split_qualified("fs__deep__name"), Some(("fs", "deep__name")));
        assert_eq!(split_qualified("plain"), None);
        assert_eq!(split_qualified("__tool"), None);
        assert_eq!(split_qualified("fs__"), None);
    }

    #[test]
    fn test_server_tool_name() {
        let client = McpClient::new(ServerConfig::uvx("fs", "pkg").with_prefix_tool_names(true));
        assert_eq!(client.server_tool_name("fs__read"), "read");
        assert_eq!(client.server_tool_name("read"), "read");
        assert_eq!(client.server_tool_name("other__read"), "other__read");

        let plain = McpClient::new(ServerConfig::uvx("fs", "pkg"));
        assert_eq!(plain.server_tool_name("fs__read"), "fs__read");
    }

    #[test]
    fn test_present_prefixes() {
        let client = McpClient::new(ServerConfig::uvx("fs", "pkg").with_prefix_tool_names(true));
        let tools = client.present(vec![ToolInfo {
            name: "read".into(),
            description: Some("Read a file".into()),
            input_schema: None,
        }]);
        assert_eq!(tools[0].name, "fs__read");
        assert_eq!(tools[0].description.as_deref(), Some("Read a file"));
    }

    #[tokio::test]
    async fn test_requests_before_connect() {
        let client = McpClient::new(ServerConfig::http("h", "http://127.0.0.1:1/mcp"));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(matches!(client.list_tools().await, Err(McpError::NotConnected)));
        assert!(matches!(
            client.call_tool("x", Value::Null).await,
            Err(McpError::NotConnected)
        ));
        assert!(matches!(
            client.request("ping", None).await,
            Err(McpError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_when_never_connected() {
        let client = McpClient::new(ServerConfig::http("h", "http://127.0.0.1:1/mcp"));
        client.disconnect().await;
        client.disconnect().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_configuration_error_is_tagged() {
        let client = McpClient::new(ServerConfig::new("broken", TransportKind::Npx));
        let err = client.connect().await.unwrap_err();
        assert!(err.to_string().starts_with("broken (npx): "));
        assert!(matches!(err.root(), McpError::Configuration(_)));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_config_is_a_copy() {
        let client = McpClient::new(ServerConfig::uvx("fs", "pkg"));
        let mut copy = client.config();
        copy.name = "changed".into();
        assert_eq!(client.name(), "fs");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_freshness() {
        let cache = CachedTools::new(Vec::new());
        assert!(cache.is_fresh());
        tokio::time::advance(TOOL_CACHE_TTL).await;
        assert!(!cache.is_fresh());
    }
}
