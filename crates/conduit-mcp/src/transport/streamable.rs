//! Streamable HTTP sessions, delegated to the `rmcp` session client.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use parking_lot::Mutex;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use rmcp::ServiceExt;
use rmcp::model::CallToolRequestParam;
use rmcp::service::{Peer, RoleClient, RunningService, ServiceError};
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::transport::streamable_http_client::{
    StreamableHttpClientTransportConfig, StreamableHttpError,
};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::HandshakeHook;
use super::http::{default_headers, describe_error};
use super::stdio::Termination;
use crate::config::{AuthConfig, ServerConfig};
use crate::error::{McpError, Result};
use crate::handshake::HandshakeOutcome;
use crate::protocol::{CallToolResult, InitializeResult, ToolInfo};
use crate::redact;

type Session = RunningService<RoleClient, ()>;

/// How often the session's liveness is checked.
const SESSION_POLL: Duration = Duration::from_millis(250);

/// A live streamable HTTP session.
pub struct StreamableHttpTransport {
    server: String,
    endpoint: String,
    timeout: Duration,
    peer: Peer<RoleClient>,
    session: tokio::sync::Mutex<Option<Session>>,
    termination: Arc<watch::Sender<Option<Termination>>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for StreamableHttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamableHttpTransport")
            .field("server", &self.server)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Build the reqwest client carrying configured headers and auth.
fn session_client(config: &ServerConfig) -> Result<reqwest::Client> {
    let mut headers = default_headers(config)?;
    // the session client negotiates content types itself
    headers.remove(CONTENT_TYPE);
    headers.remove(ACCEPT);

    if let Some(auth) = &config.auth {
        let mut value = match auth {
            AuthConfig::Bearer { token } => HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| {
                    McpError::configuration(format!("server '{}': invalid bearer token", config.name))
                })?,
            AuthConfig::Basic { username, password } => basic_credentials(username, password)?,
        };
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    reqwest::Client::builder()
        .default_headers(headers)
        .build()
        .map_err(|e| McpError::transport(format!("failed to build HTTP client: {}", describe_error(e))))
}

/// `Basic` authorization value for the given credentials.
fn basic_credentials(username: &str, password: &str) -> Result<HeaderValue> {
    let encoded = STANDARD.encode(format!("{username}:{password}"));
    HeaderValue::from_str(&format!("Basic {encoded}"))
        .map_err(|_| McpError::configuration("invalid basic credentials"))
}

/// Convert between our protocol types and the session client's through JSON.
fn convert<T: DeserializeOwned>(value: impl serde::Serialize, what: &str) -> Result<T> {
    let value = serde_json::to_value(value)?;
    serde_json::from_value(value)
        .map_err(|e| McpError::protocol(format!("unexpected {what} from session: {e}")))
}

fn map_service_error(err: ServiceError) -> McpError {
    match err {
        ServiceError::McpError(data) => McpError::server_error(
            i64::from(data.code.0),
            data.message.to_string(),
            data.data,
        ),
        other => McpError::transport(redact::error_text(&other.to_string())),
    }
}

/// Why a failed call means the session itself is gone, if it does.
fn session_lost(err: &ServiceError) -> Option<&'static str> {
    match err {
        ServiceError::TransportClosed => Some("session transport closed"),
        ServiceError::TransportSend(e) => {
            match e.error.downcast_ref::<StreamableHttpError<reqwest::Error>>()? {
                StreamableHttpError::Client(client) if client.status() == Some(StatusCode::NOT_FOUND) => {
                    Some("session expired (HTTP 404)")
                }
                StreamableHttpError::TransportChannelClosed => Some("session transport closed"),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Record the end of the session. Only the first call has an effect.
fn end_session(termination: &watch::Sender<Option<Termination>>, reason: &str) -> bool {
    termination.send_if_modified(|current| {
        if current.is_some() {
            return false;
        }
        *current = Some(Termination::new(reason, None));
        true
    })
}

/// Watch for the session task finishing underneath us.
fn spawn_monitor(
    server: String,
    peer: Peer<RoleClient>,
    termination: Arc<watch::Sender<Option<Termination>>>,
) -> JoinHandle<()> {
    let mut ended = termination.subscribe();
    tokio::spawn(async move {
        let mut poll = tokio::time::interval(SESSION_POLL);
        loop {
            tokio::select! {
                _ = ended.changed() => return,
                _ = poll.tick() => {
                    if peer.is_transport_closed() {
                        if end_session(&termination, "session closed by server") {
                            warn!(server = %server, "Streamable HTTP session ended");
                        }
                        return;
                    }
                }
            }
        }
    })
}

impl StreamableHttpTransport {
    /// Open the session and fetch the tool list.
    pub async fn connect(
        config: &ServerConfig,
        on_handshake: HandshakeHook<'_>,
    ) -> Result<(Self, HandshakeOutcome)> {
        let url = config.endpoint()?;
        let endpoint = redact::url(url.as_str());
        debug!(server = %config.name, endpoint = %endpoint, "Opening streamable HTTP session");

        let transport = StreamableHttpClientTransport::with_client(
            session_client(config)?,
            StreamableHttpClientTransportConfig::with_uri(url.to_string()),
        );

        on_handshake();
        let session = tokio::time::timeout(config.timeout(), ().serve(transport))
            .await
            .map_err(|_| McpError::Timeout {
                method: "initialize".to_string(),
                after: config.timeout(),
            })?
            .map_err(|e| {
                McpError::transport(format!(
                    "session with {endpoint} failed to initialize: {}",
                    redact::error_text(&e.to_string())
                ))
            })?;

        let server: InitializeResult = match session.peer_info() {
            Some(info) => convert(info, "initialize result")?,
            None => InitializeResult::default(),
        };

        let (termination, _) = watch::channel(None);
        let termination = Arc::new(termination);
        let peer = session.peer().clone();
        let monitor = spawn_monitor(config.name.clone(), peer.clone(), Arc::clone(&termination));
        let transport = Self {
            server: config.name.clone(),
            endpoint,
            timeout: config.timeout(),
            peer,
            session: tokio::sync::Mutex::new(Some(session)),
            termination,
            monitor: Mutex::new(Some(monitor)),
        };

        match transport.list_tools().await {
            Ok(tools) => {
                info!(
                    server = %config.name,
                    session_server = %server.server_info.name,
                    tools = tools.len(),
                    "Streamable HTTP session ready"
                );
                Ok((transport, HandshakeOutcome { server, tools }))
            }
            Err(err) => {
                transport.shutdown().await;
                Err(err)
            }
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.termination.borrow().as_ref() {
            Some(t) => Err(McpError::closed(t.reason.clone())),
            None => Ok(()),
        }
    }

    async fn with_timeout<T, F>(&self, method: &str, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, ServiceError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                if let Some(reason) = session_lost(&err)
                    && end_session(&self.termination, reason)
                {
                    warn!(server = %self.server, reason, "Streamable HTTP session lost");
                    return Err(McpError::closed(reason));
                }
                Err(map_service_error(err))
            }
            Err(_) => Err(McpError::Timeout {
                method: method.to_string(),
                after: self.timeout,
            }),
        }
    }

    /// Every tool the session exposes.
    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        self.ensure_open()?;
        let tools = self
            .with_timeout("tools/list", self.peer.list_all_tools())
            .await?;
        convert(tools, "tool list")
    }

    /// Invoke a tool.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        self.ensure_open()?;
        let arguments = match arguments {
            Value::Null => None,
            other => Some(other),
        };
        let param: CallToolRequestParam =
            convert(json!({ "name": name, "arguments": arguments }), "tool call")?;
        let result = self.with_timeout("tools/call", self.peer.call_tool(param)).await?;
        convert(result, "tool result")
    }

    /// Watch for the session ending.
    pub fn subscribe_termination(&self) -> watch::Receiver<Option<Termination>> {
        self.termination.subscribe()
    }

    /// Cancel the session. Safe to call after the session ended on its own.
    pub async fn shutdown(&self) {
        end_session(&self.termination, "disconnected");
        if let Some(monitor) = self.monitor.lock().take() {
            monitor.abort();
        }
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            if let Err(e) = session.cancel().await {
                debug!(server = %self.server, error = %redact::error_text(&e.to_string()), "Session did not stop cleanly");
            }
            debug!(server = %self.server, endpoint = %self.endpoint, "Streamable HTTP session closed");
        }
    }
}

impl Drop for StreamableHttpTransport {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.get_mut().take() {
            monitor.abort();
        }
    }
}
