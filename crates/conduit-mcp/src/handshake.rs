//! The MCP handshake: `initialize`, `notifications/initialized`, `tools/list`.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::error::{McpError, Result};
use crate::protocol::{InitializeParams, InitializeResult, ListToolsResult, ToolInfo, methods};

/// Most `tools/list` pages followed before giving up on a cursor loop.
const MAX_TOOL_PAGES: usize = 64;

/// A channel that can carry correlated requests and notifications.
#[async_trait]
pub trait RpcChannel: Send + Sync {
    /// Send a request and wait for its result.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value>;

    /// Send a notification.
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()>;
}

/// What a completed handshake learned about the server.
#[derive(Debug, Clone)]
pub struct HandshakeOutcome {
    /// The initialize result.
    pub server: InitializeResult,
    /// Tools listed right after initialization.
    pub tools: Vec<ToolInfo>,
}

/// Send `initialize` and return the parsed result.
pub async fn initialize(channel: &dyn RpcChannel) -> Result<InitializeResult> {
    let params = serde_json::to_value(InitializeParams::default())?;
    let result = channel.request(methods::INITIALIZE, Some(params)).await?;
    let server: InitializeResult = serde_json::from_value(result)
        .map_err(|e| McpError::protocol(format!("invalid initialize result: {e}")))?;
    debug!(
        server = %server.server_info.name,
        version = %server.server_info.version,
        protocol = %server.protocol_version,
        "Initialize acknowledged"
    );
    Ok(server)
}

/// Fetch every page of `tools/list`.
pub async fn list_tools(channel: &dyn RpcChannel) -> Result<Vec<ToolInfo>> {
    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;

    for _ in 0..MAX_TOOL_PAGES {
        let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
        let result = channel.request(methods::TOOLS_LIST, params).await?;
        let page: ListToolsResult = serde_json::from_value(result)
            .map_err(|e| McpError::protocol(format!("invalid tools/list result: {e}")))?;
        tools.extend(page.tools);

        match page.next_cursor {
            Some(next) if !next.is_empty() && cursor.as_deref() != Some(next.as_str()) => {
                cursor = Some(next)
            }
            _ => return Ok(tools),
        }
    }
    Err(McpError::protocol("tools/list pagination did not terminate"))
}

/// Run the full handshake once.
pub async fn perform(channel: &dyn RpcChannel) -> Result<HandshakeOutcome> {
    let server = initialize(channel).await?;
    channel.notify(methods::INITIALIZED, None).await?;
    let tools = list_tools(channel).await?;
    info!(
        server = %server.server_info.name,
        tools = tools.len(),
        "Handshake complete"
    );
    Ok(HandshakeOutcome { server, tools })
}
