//! Error types for MCP operations.

use std::time::Duration;

use conduit_docker::DockerError;
use thiserror::Error;

use crate::redact;

/// Result type for MCP operations.
pub type Result<T> = std::result::Result<T, McpError>;

/// Error type for MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// The server configuration is missing or has an invalid field.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Failed to spawn the MCP server process.
    #[error("failed to spawn MCP server: {0}")]
    SpawnFailed(String),

    /// Failed to communicate with the MCP server.
    #[error("transport error: {0}")]
    Transport(String),

    /// The HTTP endpoint answered with a non-success status.
    #[error("HTTP {status} from {endpoint}")]
    HttpStatus {
        /// Status code.
        status: u16,
        /// Endpoint as origin and path, never with a query string.
        endpoint: String,
    },

    /// JSON-RPC protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Server returned an error response.
    #[error("server error {code}: {message}")]
    ServerError {
        /// Error code from the server.
        code: i64,
        /// Error message from the server.
        message: String,
        /// Optional additional data.
        data: Option<serde_json::Value>,
    },

    /// No response arrived in time. The outcome of the call is unknown.
    #[error("request '{method}' timed out after {after:?}")]
    Timeout {
        /// Method of the request.
        method: String,
        /// Timeout that elapsed.
        after: Duration,
    },

    /// The connection closed while the request was outstanding.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// The client has no live connection.
    #[error("not connected - call connect() first")]
    NotConnected,

    /// Another `connect()` is already running on this client.
    #[error("a connection attempt is already in progress")]
    ConnectInProgress,

    /// Generic requests are not available on session transports.
    #[error("generic requests are not supported on this transport, use list_tools/call_tool")]
    UseSpecificMethods,

    /// The server process exited before it became ready.
    #[error("{}", exited_message(.code, .stderr))]
    ProcessExited {
        /// Exit code, if the process exited normally.
        code: Option<i32>,
        /// Recent stderr output.
        stderr: String,
    },

    /// The server failed to come up.
    #[error("{}", startup_message(.message, .recent_output))]
    Startup {
        /// What went wrong.
        message: String,
        /// Recent output captured from the server.
        recent_output: String,
    },

    /// Docker host, image or container failure.
    #[error(transparent)]
    Docker(#[from] DockerError),

    /// A `connect()` failure, tagged with the server and transport.
    #[error("{server} ({transport}): {source}")]
    Connect {
        /// Server name.
        server: String,
        /// Transport label.
        transport: String,
        /// Underlying error.
        #[source]
        source: Box<McpError>,
    },
}

fn exited_message(code: &Option<i32>, stderr: &str) -> String {
    let status = match code {
        Some(code) => format!("server process exited with code {code}"),
        None => "server process was terminated by a signal".to_string(),
    };
    if stderr.trim().is_empty() {
        status
    } else {
        format!("{status}\n--- recent stderr ---\n{stderr}")
    }
}

fn startup_message(message: &str, recent_output: &str) -> String {
    if recent_output.trim().is_empty() {
        format!("server failed to start: {message}")
    } else {
        format!("server failed to start: {message}\n--- recent output ---\n{recent_output}")
    }
}

impl McpError {
    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a spawn failed error.
    pub fn spawn_failed(msg: impl Into<String>) -> Self {
        Self::SpawnFailed(msg.into())
    }

    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a connection closed error.
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed(reason.into())
    }

    /// Create a server error from an error response.
    pub fn server_error(
        code: i64,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self::ServerError {
            code,
            message: message.into(),
            data,
        }
    }

    /// Create a startup error.
    pub fn startup(message: impl Into<String>, recent_output: impl Into<String>) -> Self {
        Self::Startup {
            message: message.into(),
            recent_output: recent_output.into(),
        }
    }

    /// Tag an error with the server and transport it came from.
    ///
    /// Already tagged errors are returned unchanged.
    pub fn connect(server: impl Into<String>, transport: impl Into<String>, err: McpError) -> Self {
        match err {
            tagged @ Self::Connect { .. } => tagged,
            other => Self::Connect {
                server: server.into(),
                transport: transport.into(),
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, looking through [`McpError::Connect`].
    pub fn root(&self) -> &McpError {
        match self {
            Self::Connect { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether this is a request timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Self::Timeout { .. })
    }

    /// Display text fit for logs: HTML collapsed, at most
    /// [`redact::MAX_ERROR_CHARS`] characters.
    pub fn redacted(&self) -> String {
        redact::error_text(&self.to_string())
    }
}
