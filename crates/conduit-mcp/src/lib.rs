//! Multi-transport MCP (Model Context Protocol) client for Conduit.
//!
//! This crate connects to MCP servers over five transports and exposes a
//! single client surface for discovering and invoking their tools.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  McpManager                                                 │
//! │  - One McpClient per configured server                      │
//! │  - Concurrent connect, aggregated tools, routed calls        │
//! └─────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  McpClient                                                  │
//! │  - Connection state, tool cache, tool name prefixing        │
//! └─────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Transport                                                  │
//! │  - uvx / npx child process   ─┐                             │
//! │  - Docker container          ─┴─ StdioChannel (ndjson)      │
//! │  - one-shot HTTP POST                                       │
//! │  - streamable HTTP session (rmcp)                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use conduit_mcp::{McpClient, ServerConfig};
//! use serde_json::json;
//!
//! let client = McpClient::new(ServerConfig::uvx("fetch", "mcp-server-fetch"));
//! client.connect().await?;
//!
//! for tool in client.list_tools().await? {
//!     println!("Tool: {} - {:?}", tool.name, tool.description);
//! }
//!
//! let result = client
//!     .call_tool("fetch", json!({"url": "https://example.com"}))
//!     .await?;
//! println!("Result: {:?}", result.text());
//!
//! client.disconnect().await;
//! ```
//!
//! # MCP Protocol
//!
//! Stdio transports carry one JSON-RPC 2.0 message per line. The
//! handshake is:
//! 1. Client sends `initialize` with capabilities
//! 2. Server responds with its capabilities
//! 3. Client sends `notifications/initialized`
//! 4. Client calls `tools/list`, after which `tools/call` may be used

pub mod client;
pub mod config;
pub mod correlation;
pub mod error;
pub mod framer;
pub mod handshake;
pub mod manager;
pub mod output;
pub mod protocol;
pub mod redact;
pub mod transport;

// Re-export main types
pub use client::{ConnectionState, McpClient, TOOL_CACHE_TTL, qualified_name, split_qualified};
pub use config::{AuthConfig, ServerConfig, TransportKind, load_config, parse_config};
pub use error::{McpError, Result};
pub use manager::McpManager;
pub use protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, JsonRpcError,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsResult, ServerCapabilities,
    ServerInfo, ToolContent, ToolInfo, ToolsCapability,
};
pub use transport::{Termination, Transport};
