//! One-shot HTTP transport: every JSON-RPC request is its own POST.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tracing::{debug, trace, warn};
use url::Url;

use super::HandshakeHook;
use crate::config::{AuthConfig, ServerConfig};
use crate::correlation::{Correlator, Dispatch};
use crate::error::{McpError, Result};
use crate::handshake::{self, RpcChannel};
use crate::protocol::{
    InitializeResult, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, methods,
};
use crate::redact;

/// Base delay between send retries, multiplied by the attempt number.
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

const ACCEPT_VALUE: &str = "application/json, text/event-stream";

/// A JSON-RPC endpoint reached with independent POST requests.
pub struct HttpTransport {
    server: String,
    client: reqwest::Client,
    endpoint: Url,
    display: String,
    auth: Option<AuthConfig>,
    retries: u32,
    timeout: Duration,
    correlator: Correlator,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("server", &self.server)
            .field("endpoint", &self.display)
            .field("retries", &self.retries)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Default headers for every request: content negotiation plus configured headers.
pub fn default_headers(config: &ServerConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_VALUE));

    for (key, value) in &config.headers {
        let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
            McpError::configuration(format!(
                "server '{}': invalid header name '{key}': {e}",
                config.name
            ))
        })?;
        let mut value = HeaderValue::from_str(value).map_err(|_| {
            McpError::configuration(format!(
                "server '{}': invalid value for header '{key}'",
                config.name
            ))
        })?;
        value.set_sensitive(true);
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Apply configured authentication to a request.
pub fn authorize(request: reqwest::RequestBuilder, auth: Option<&AuthConfig>) -> reqwest::RequestBuilder {
    match auth {
        Some(AuthConfig::Bearer { token }) => request.bearer_auth(token),
        Some(AuthConfig::Basic { username, password }) => {
            request.basic_auth(username, Some(password))
        }
        None => request,
    }
}

/// Whether re-sending `method` cannot repeat a side effect.
pub fn is_idempotent(method: &str) -> bool {
    matches!(method, methods::INITIALIZE | methods::TOOLS_LIST | "ping")
}

/// Whether a failed send may be retried. Connection failures never reached
/// the server; anything else may have, so only idempotent methods retry.
fn should_retry(method: &str, err: &reqwest::Error) -> bool {
    err.is_connect() || is_idempotent(method)
}

/// Describe a reqwest error without its URL.
pub fn describe_error(err: reqwest::Error) -> String {
    redact::error_text(&err.without_url().to_string())
}

impl HttpTransport {
    /// Build the transport. No request is sent.
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let endpoint = config.endpoint()?;
        let client = reqwest::Client::builder()
            .default_headers(default_headers(config)?)
            .timeout(config.timeout())
            .pool_max_idle_per_host(5)
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| McpError::transport(format!("failed to build HTTP client: {}", describe_error(e))))?;

        Ok(Self {
            server: config.name.clone(),
            client,
            display: redact::url(endpoint.as_str()),
            endpoint,
            auth: config.auth.clone(),
            retries: config.retries,
            timeout: config.timeout(),
            correlator: Correlator::new(),
        })
    }

    /// Build the transport and run the one-shot handshake.
    ///
    /// `notifications/initialized` is fire-and-forget: a failure is logged
    /// and the connection still counts as established.
    pub async fn connect(
        config: &ServerConfig,
        on_handshake: HandshakeHook<'_>,
    ) -> Result<(Self, InitializeResult)> {
        let transport = Self::new(config)?;
        debug!(server = %transport.server, endpoint = %transport.display, "Connecting over HTTP");
        on_handshake();

        let server = handshake::initialize(&transport).await?;
        if let Err(e) = transport.notify(methods::INITIALIZED, None).await {
            debug!(server = %transport.server, error = %e.redacted(), "initialized notification failed");
        }
        Ok((transport, server))
    }

    /// Endpoint as origin and path.
    pub fn endpoint(&self) -> &str {
        &self.display
    }

    /// Reject outstanding requests and refuse new ones.
    pub fn shutdown(&self) {
        self.correlator.fail_all("disconnected");
    }

    /// POST `body`, retrying send failures that are safe to repeat.
    async fn post(&self, method: &str, body: Vec<u8>) -> Result<reqwest::Response> {
        let mut attempt = 0;
        loop {
            let request = authorize(
                self.client.post(self.endpoint.clone()).body(body.clone()),
                self.auth.as_ref(),
            );
            match request.send().await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_timeout() => {
                    return Err(McpError::Timeout {
                        method: method.to_string(),
                        after: self.timeout,
                    });
                }
                Err(err) if attempt < self.retries && should_retry(method, &err) => {
                    attempt += 1;
                    warn!(
                        server = %self.server,
                        endpoint = %self.display,
                        error = %describe_error(err),
                        attempt,
                        retries = self.retries,
                        "HTTP request failed, retrying"
                    );
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                Err(err) => {
                    return Err(McpError::transport(format!(
                        "request to {} failed: {}",
                        self.display,
                        describe_error(err)
                    )));
                }
            }
        }
    }

    /// POST a message and decode every JSON-RPC message in the reply.
    async fn exchange(&self, method: &str, body: Vec<u8>) -> Result<Vec<JsonRpcMessage>> {
        let response = self.post(method, body).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(McpError::HttpStatus {
                status: status.as_u16(),
                endpoint: self.display.clone(),
            });
        }

        let event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.trim_start().starts_with("text/event-stream"));
        let text = response.text().await.map_err(|e| {
            McpError::transport(format!(
                "failed to read response from {}: {}",
                self.display,
                describe_error(e)
            ))
        })?;
        trace!(server = %self.server, body = %text, "HTTP response");

        if event_stream {
            Ok(parse_event_stream(&text))
        } else {
            parse_json_body(&text)
        }
    }
}

#[async_trait]
impl RpcChannel for HttpTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let pending = self.correlator.register(method, self.timeout)?;
        let id = pending.id;

        let messages = match serde_json::to_vec(&JsonRpcRequest::new(id, method, params)) {
            Ok(body) => self.exchange(method, body).await,
            Err(e) => Err(e.into()),
        };
        let messages = match messages {
            Ok(messages) => messages,
            Err(err) => {
                self.correlator.cancel(id);
                return Err(err);
            }
        };

        for message in messages {
            match self.correlator.dispatch(message) {
                Dispatch::ServerRequest { method, .. } => {
                    debug!(server = %self.server, method = %method, "Ignoring server request in HTTP reply");
                }
                Dispatch::Notification { method } => {
                    debug!(server = %self.server, method = %method, "Server notification");
                }
                Dispatch::Resolved(_) | Dispatch::Unknown(_) | Dispatch::Invalid => {}
            }
        }

        if self.correlator.cancel(id) {
            return Err(McpError::protocol(format!(
                "response from {} did not answer request {id} ({method})",
                self.display
            )));
        }
        self.correlator.wait(pending).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        if let Some(reason) = self.correlator.closed_reason() {
            return Err(McpError::closed(reason));
        }
        let body = serde_json::to_vec(&JsonRpcNotification::new(method, params))?;
        let response = self.post(method, body).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(McpError::HttpStatus {
                status: status.as_u16(),
                endpoint: self.display.clone(),
            });
        }
        Ok(())
    }
}

/// Decode a JSON body holding one message or a batch. An empty body holds none.
pub fn parse_json_body(text: &str) -> Result<Vec<JsonRpcMessage>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }
    let value: Value = serde_json::from_str(text).map_err(|e| {
        McpError::protocol(format!(
            "invalid JSON-RPC response ({e}): {}",
            redact::error_text(text)
        ))
    })?;
    messages_from_value(value)
        .ok_or_else(|| McpError::protocol(format!("unexpected response: {}", redact::error_text(text))))
}

fn messages_from_value(value: Value) -> Option<Vec<JsonRpcMessage>> {
    match value {
        Value::Array(items) => Some(
            items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
        ),
        value @ Value::Object(_) => serde_json::from_value(value).ok().map(|m| vec![m]),
        _ => None,
    }
}

/// Decode the `data:` payloads of a server-sent event stream.
///
/// Multi-line data fields are joined with newlines. Events whose data is not
/// JSON-RPC are skipped.
pub fn parse_event_stream(text: &str) -> Vec<JsonRpcMessage> {
    let mut messages = Vec::new();
    let mut data: Vec<&str> = Vec::new();

    let mut flush = |data: &mut Vec<&str>| {
        if data.is_empty() {
            return;
        }
        let payload = data.join("\n");
        data.clear();
        match serde_json::from_str::<Value>(&payload)
            .ok()
            .and_then(messages_from_value)
        {
            Some(found) => messages.extend(found),
            None => debug!(payload = %redact::error_text(&payload), "Skipping non JSON-RPC event"),
        }
    };

    for line in text.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            flush(&mut data);
        } else if let Some(rest) = line.strip_prefix("data:") {
            data.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    flush(&mut data);
    messages
}
