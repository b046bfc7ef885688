//! Server configuration and the TOML loader.
//!
//! A configuration file lists servers as `[[servers]]` tables:
//!
//! ```toml
//! [[servers]]
//! name = "fetch"
//! transport = "uvx"
//! command = "uvx"
//! args = ["mcp-server-fetch"]
//!
//! [[servers]]
//! name = "search"
//! transport = "streamable-http"
//! url = "https://search.example.com/mcp"
//! auth = { type = "bearer", token = "..." }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{McpError, Result};
use crate::redact;

/// Separator between server and tool in qualified tool names.
pub const TOOL_NAME_SEPARATOR: &str = "__";

/// How to reach a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Python package run through `uvx`.
    Uvx,
    /// Node package run through `npx`.
    Npx,
    /// Docker container.
    Docker,
    /// Independent JSON-RPC POSTs.
    Http,
    /// Stateful streamable HTTP session.
    StreamableHttp,
}

impl TransportKind {
    /// Label used in logs and errors.
    pub fn label(self) -> &'static str {
        match self {
            Self::Uvx => "uvx",
            Self::Npx => "npx",
            Self::Docker => "docker",
            Self::Http => "http",
            Self::StreamableHttp => "streamable-http",
        }
    }

    /// Whether the server is a spawned local process.
    pub fn is_process(self) -> bool {
        matches!(self, Self::Uvx | Self::Npx)
    }

    /// Whether the server is reached over HTTP.
    pub fn is_http(self) -> bool {
        matches!(self, Self::Http | Self::StreamableHttp)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// HTTP authentication.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthConfig {
    /// `Authorization: Bearer <token>`.
    Bearer {
        /// Token.
        token: String,
    },
    /// `Authorization: Basic <base64(user:password)>`.
    Basic {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bearer { .. } => f.debug_struct("Bearer").field("token", &"***").finish(),
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"***")
                .finish(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

/// Longest accepted per-request timeout, one day.
pub const MAX_TIMEOUT_SECS: u64 = 86_400;

fn default_retries() -> u32 {
    3
}

fn default_startup_retries() -> u32 {
    3
}

/// Description of one MCP server.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Unique server name.
    pub name: String,
    /// Transport kind.
    pub transport: TransportKind,

    /// Program to run (process transports).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Program arguments, or the container command for Docker.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Environment overlay (process transports).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Image reference (Docker).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// `docker run` flags (Docker).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub container_args: Vec<String>,
    /// Docker daemon address, overriding discovery (Docker).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_host: Option<String>,
    /// Container name; enables reuse (Docker).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    /// Reuse a matching named container (Docker).
    #[serde(default = "default_true")]
    pub reuse_container: bool,
    /// Remove the container on disconnect (Docker).
    #[serde(default)]
    pub remove_on_exit: bool,

    /// Endpoint URL (HTTP transports).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Extra request headers (HTTP transports).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Authentication (HTTP transports).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Send retries (HTTP).
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Delay before the first handshake attempt (Docker).
    #[serde(default)]
    pub startup_delay_ms: u64,
    /// Handshake attempts.
    #[serde(default = "default_startup_retries")]
    pub startup_retries: u32,
    /// Expose tools as `<server>__<tool>`.
    #[serde(default)]
    pub prefix_tool_names: bool,
    /// Whether the manager connects this server.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Keys kept, values masked.
fn masked<'a>(map: &'a BTreeMap<String, String>) -> BTreeMap<&'a str, &'static str> {
    map.keys().map(|k| (k.as_str(), redact::MASK)).collect()
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("name", &self.name)
            .field("transport", &self.transport)
            .field("command", &self.command)
            .field("args", &redact::args(&self.args))
            .field("env", &masked(&self.env))
            .field("image", &self.image)
            .field("container_args", &redact::container_args(&self.container_args))
            .field("docker_host", &self.docker_host)
            .field("container_name", &self.container_name)
            .field("reuse_container", &self.reuse_container)
            .field("remove_on_exit", &self.remove_on_exit)
            .field("url", &self.url.as_deref().map(redact::url))
            .field("headers", &masked(&self.headers))
            .field("auth", &self.auth)
            .field("timeout_secs", &self.timeout_secs)
            .field("retries", &self.retries)
            .field("startup_delay_ms", &self.startup_delay_ms)
            .field("startup_retries", &self.startup_retries)
            .field("prefix_tool_names", &self.prefix_tool_names)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl ServerConfig {
    /// Create a configuration with defaults for every knob.
    pub fn new(name: impl Into<String>, transport: TransportKind) -> Self {
        Self {
            name: name.into(),
            transport,
            command: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            image: None,
            container_args: Vec::new(),
            docker_host: None,
            container_name: None,
            reuse_container: true,
            remove_on_exit: false,
            url: None,
            headers: BTreeMap::new(),
            auth: None,
            timeout_secs: default_timeout_secs(),
            retries: default_retries(),
            startup_delay_ms: 0,
            startup_retries: default_startup_retries(),
            prefix_tool_names: false,
            enabled: true,
        }
    }

    /// Python package server run with `uvx <package>`.
    pub fn uvx(name: impl Into<String>, package: impl Into<String>) -> Self {
        Self::new(name, TransportKind::Uvx)
            .with_command("uvx")
            .with_arg(package)
    }

    /// Node package server run with `npx -y <package>`.
    pub fn npx(name: impl Into<String>, package: impl Into<String>) -> Self {
        Self::new(name, TransportKind::Npx)
            .with_command("npx")
            .with_arg("-y")
            .with_arg(package)
    }

    /// Docker container server.
    pub fn docker(name: impl Into<String>, image: impl Into<String>) -> Self {
        let mut config = Self::new(name, TransportKind::Docker);
        config.image = Some(image.into());
        config
    }

    /// One-shot HTTP server.
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        let mut config = Self::new(name, TransportKind::Http);
        config.url = Some(url.into());
        config
    }

    /// Streamable HTTP session server.
    pub fn streamable_http(name: impl Into<String>, url: impl Into<String>) -> Self {
        let mut config = Self::new(name, TransportKind::StreamableHttp);
        config.url = Some(url.into());
        config
    }

    /// Set the program to run.
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Add an argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Replace the arguments.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Replace the `docker run` flags.
    pub fn with_container_args(mut self, args: Vec<String>) -> Self {
        self.container_args = args;
        self
    }

    /// Set the container name.
    pub fn with_container_name(mut self, name: impl Into<String>) -> Self {
        self.container_name = Some(name.into());
        self
    }

    /// Enable or disable container reuse.
    pub fn with_reuse_container(mut self, reuse: bool) -> Self {
        self.reuse_container = reuse;
        self
    }

    /// Remove the container on disconnect.
    pub fn with_remove_on_exit(mut self, remove: bool) -> Self {
        self.remove_on_exit = remove;
        self
    }

    /// Set the Docker daemon address.
    pub fn with_docker_host(mut self, host: impl Into<String>) -> Self {
        self.docker_host = Some(host.into());
        self
    }

    /// Add an HTTP header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set authentication.
    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Set the request timeout. Sub-second timeouts round up to one second.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Set the send retries.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set the delay before the first handshake.
    pub fn with_startup_delay_ms(mut self, delay: u64) -> Self {
        self.startup_delay_ms = delay;
        self
    }

    /// Set the handshake attempts.
    pub fn with_startup_retries(mut self, retries: u32) -> Self {
        self.startup_retries = retries;
        self
    }

    /// Expose tools under qualified names.
    pub fn with_prefix_tool_names(mut self, prefix: bool) -> Self {
        self.prefix_tool_names = prefix;
        self
    }

    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Handshake attempts, at least one.
    pub fn handshake_attempts(&self) -> u32 {
        self.startup_retries.max(1)
    }

    /// Check that every field the transport needs is present and well formed.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(McpError::configuration("server name must not be empty"));
        }
        if self.prefix_tool_names && self.name.contains(TOOL_NAME_SEPARATOR) {
            return Err(McpError::configuration(format!(
                "server '{}': name must not contain '{TOOL_NAME_SEPARATOR}' when prefix_tool_names is set",
                self.name
            )));
        }
        if self.timeout_secs == 0 || self.timeout_secs > MAX_TIMEOUT_SECS {
            return Err(McpError::configuration(format!(
                "server '{}': timeout_secs must be between 1 and {MAX_TIMEOUT_SECS}",
                self.name
            )));
        }

        match self.transport {
            TransportKind::Uvx | TransportKind::Npx => {
                if self.command.as_deref().is_none_or(|c| c.trim().is_empty()) {
                    return Err(self.missing("command"));
                }
            }
            TransportKind::Docker => {
                if self.image.as_deref().is_none_or(|i| i.trim().is_empty()) {
                    return Err(self.missing("image"));
                }
            }
            TransportKind::Http | TransportKind::StreamableHttp => {
                self.endpoint()?;
            }
        }
        Ok(())
    }

    /// Parsed endpoint URL (HTTP transports).
    pub fn endpoint(&self) -> Result<Url> {
        let raw = self
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| self.missing("url"))?;
        let url = Url::parse(raw).map_err(|e| {
            McpError::configuration(format!(
                "server '{}': invalid url '{}': {e}",
                self.name,
                crate::redact::url(raw)
            ))
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(McpError::configuration(format!(
                "server '{}': unsupported url scheme '{other}'",
                self.name
            ))),
        }
    }

    fn missing(&self, field: &str) -> McpError {
        McpError::configuration(format!(
            "server '{}': '{field}' is required for the {} transport",
            self.name, self.transport
        ))
    }
}

/// Top-level layout of a configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Configured servers.
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

/// Parse and validate configuration text.
pub fn parse_config(text: &str) -> Result<Vec<ServerConfig>> {
    let file: ConfigFile = toml::from_str(text)
        .map_err(|e| McpError::configuration(format!("failed to parse config: {e}")))?;

    let mut seen = HashSet::new();
    for server in &file.servers {
        server.validate()?;
        if !seen.insert(server.name.as_str()) {
            return Err(McpError::configuration(format!(
                "duplicate server name '{}'",
                server.name
            )));
        }
    }
    Ok(file.servers)
}

/// Read, parse and validate a configuration file.
pub fn load_config(path: &Path) -> Result<Vec<ServerConfig>> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        McpError::configuration(format!(
            "failed to read config file '{}': {e}",
            path.display()
        ))
    })?;
    parse_config(&text)
}

/// Serialize servers back into configuration text.
pub fn to_toml(servers: &[ServerConfig]) -> Result<String> {
    let file = ConfigFile {
        servers: servers.to_vec(),
    };
    toml::to_string_pretty(&file)
        .map_err(|e| McpError::configuration(format!("failed to serialize config: {e}")))
}
