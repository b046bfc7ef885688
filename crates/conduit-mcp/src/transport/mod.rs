//! Transports for MCP communication.
//!
//! Local servers speak newline-delimited JSON-RPC over stdio, either as a
//! spawned process ([`process`]) or inside a Docker container ([`docker`]);
//! both share [`stdio::StdioChannel`]. Remote servers are reached with
//! one-shot HTTP POSTs ([`http`]) or a streamable HTTP session
//! ([`streamable`]).

pub mod docker;
pub mod http;
pub mod process;
pub mod stdio;
pub mod streamable;

use serde_json::{Value, json};
use tokio::sync::watch;

use crate::config::{ServerConfig, TransportKind};
use crate::error::{McpError, Result};
use crate::handshake::{self, RpcChannel};
use crate::protocol::{CallToolParams, CallToolResult, InitializeResult, ToolInfo, methods};

pub use docker::DockerTransport;
pub use http::HttpTransport;
pub use process::ProcessTransport;
pub use stdio::{StdioChannel, Termination};
pub use streamable::StreamableHttpTransport;

/// Called once the substrate is up and the MCP handshake begins.
pub type HandshakeHook<'a> = &'a (dyn Fn() + Send + Sync);

/// A live connection to one server.
#[derive(Debug)]
pub enum Transport {
    /// `uvx` or `npx` child process.
    Process(ProcessTransport),
    /// Docker container.
    Docker(DockerTransport),
    /// One-shot HTTP.
    Http(HttpTransport),
    /// Streamable HTTP session.
    StreamableHttp(StreamableHttpTransport),
}

/// What a successful connect produced.
#[derive(Debug)]
pub struct Connected {
    /// The live transport.
    pub transport: Transport,
    /// The server's initialize result.
    pub server: InitializeResult,
    /// Tools listed during the handshake, when the transport lists them.
    pub tools: Option<Vec<ToolInfo>>,
}

impl Transport {
    /// Connect with the transport selected by `config` and run its handshake.
    pub async fn connect(config: &ServerConfig, on_handshake: HandshakeHook<'_>) -> Result<Connected> {
        config.validate()?;
        match config.transport {
            TransportKind::Uvx | TransportKind::Npx => {
                let (transport, outcome) = ProcessTransport::connect(config, on_handshake).await?;
                Ok(Connected {
                    transport: Self::Process(transport),
                    server: outcome.server,
                    tools: Some(outcome.tools),
                })
            }
            TransportKind::Docker => {
                let (transport, outcome) = DockerTransport::connect(config, on_handshake).await?;
                Ok(Connected {
                    transport: Self::Docker(transport),
                    server: outcome.server,
                    tools: Some(outcome.tools),
                })
            }
            TransportKind::Http => {
                let (transport, server) = HttpTransport::connect(config, on_handshake).await?;
                Ok(Connected {
                    transport: Self::Http(transport),
                    server,
                    tools: None,
                })
            }
            TransportKind::StreamableHttp => {
                let (transport, outcome) = StreamableHttpTransport::connect(config, on_handshake).await?;
                Ok(Connected {
                    transport: Self::StreamableHttp(transport),
                    server: outcome.server,
                    tools: Some(outcome.tools),
                })
            }
        }
    }

    /// Transport label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Process(_) => "process",
            Self::Docker(_) => "docker",
            Self::Http(_) => "http",
            Self::StreamableHttp(_) => "streamable-http",
        }
    }

    /// Whether the transport keeps a session that owns the tool list.
    pub fn is_session(&self) -> bool {
        matches!(self, Self::StreamableHttp(_))
    }

    fn rpc(&self) -> Option<&dyn RpcChannel> {
        match self {
            Self::Process(t) => Some(t.channel()),
            Self::Docker(t) => Some(t.channel()),
            Self::Http(t) => Some(t),
            Self::StreamableHttp(_) => None,
        }
    }

    /// Send a correlated request.
    ///
    /// Session transports only expose tool operations and reject this with
    /// [`McpError::UseSpecificMethods`].
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        match self.rpc() {
            Some(rpc) => rpc.request(method, params).await,
            None => Err(McpError::UseSpecificMethods),
        }
    }

    /// Send a notification.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        match self.rpc() {
            Some(rpc) => rpc.notify(method, params).await,
            None => Err(McpError::UseSpecificMethods),
        }
    }

    /// Fetch the live tool list.
    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        match self {
            Self::StreamableHttp(t) => t.list_tools().await,
            _ => match self.rpc() {
                Some(rpc) => handshake::list_tools(rpc).await,
                None => Err(McpError::UseSpecificMethods),
            },
        }
    }

    /// Invoke a tool by its server-side name.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        if let Self::StreamableHttp(t) = self {
            return t.call_tool(name, arguments).await;
        }

        let arguments = match arguments {
            Value::Null => json!({}),
            other => other,
        };
        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments: Some(arguments),
        })?;
        let result = self.request(methods::TOOLS_CALL, Some(params)).await?;
        serde_json::from_value(result)
            .map_err(|e| McpError::protocol(format!("invalid tools/call result: {e}")))
    }

    /// Watch for the connection ending. One-shot HTTP never ends on its own.
    pub fn subscribe_termination(&self) -> Option<watch::Receiver<Option<Termination>>> {
        match self {
            Self::Process(t) => Some(t.channel().subscribe_termination()),
            Self::Docker(t) => Some(t.channel().subscribe_termination()),
            Self::Http(_) => None,
            Self::StreamableHttp(t) => Some(t.subscribe_termination()),
        }
    }

    /// Tear the connection down.
    pub async fn shutdown(&self) {
        match self {
            Self::Process(t) => t.shutdown().await,
            Self::Docker(t) => t.shutdown().await,
            Self::Http(t) => t.shutdown(),
            Self::StreamableHttp(t) => t.shutdown().await,
        }
    }
}
