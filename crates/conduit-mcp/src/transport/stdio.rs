//! JSON-RPC over a byte stream pair, shared by the process and Docker transports.
//!
//! The owner of the stream pumps stdout and stderr chunks into the channel and
//! calls [`StdioChannel::terminate`] once the peer is gone. Everything else
//! (framing, correlation, diagnostics, readiness) lives here.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::correlation::{Correlator, Dispatch};
use crate::error::{McpError, Result};
use crate::framer::{Frame, MessageFramer};
use crate::handshake::{self, HandshakeOutcome, RpcChannel};
use crate::output::{OutputBuffer, clip_line};
use crate::protocol::{JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// Boxed writer for the peer's stdin.
pub type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Why the peer went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Termination {
    /// Human readable reason, also used to reject pending requests.
    pub reason: String,
    /// Exit code, when the peer reported one.
    pub exit_code: Option<i64>,
}

impl Termination {
    /// Create a termination record.
    pub fn new(reason: impl Into<String>, exit_code: Option<i64>) -> Self {
        Self {
            reason: reason.into(),
            exit_code,
        }
    }
}

/// Result of [`StdioChannel::wait_for_output`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputWait {
    /// New output arrived.
    Output,
    /// The peer terminated first.
    Terminated(Termination),
    /// Neither happened within the grace period.
    GraceElapsed,
}

struct Core {
    server: String,
    timeout: Duration,
    framer: Mutex<MessageFramer>,
    correlator: Correlator,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    output: OutputBuffer,
    output_seen: watch::Sender<u64>,
    termination: watch::Sender<Option<Termination>>,
}

/// A framed, correlated JSON-RPC channel over stdio-like streams.
#[derive(Clone)]
pub struct StdioChannel {
    core: Arc<Core>,
}

impl std::fmt::Debug for StdioChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioChannel")
            .field("server", &self.core.server)
            .field("correlator", &self.core.correlator)
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

impl StdioChannel {
    /// Create a channel writing requests to `writer`.
    pub fn new(server: impl Into<String>, writer: BoxedWriter, timeout: Duration) -> Self {
        let (output_seen, _) = watch::channel(0);
        let (termination, _) = watch::channel(None);
        Self {
            core: Arc::new(Core {
                server: server.into(),
                timeout,
                framer: Mutex::new(MessageFramer::new()),
                correlator: Correlator::new(),
                writer: tokio::sync::Mutex::new(Some(writer)),
                output: OutputBuffer::default(),
                output_seen,
                termination,
            }),
        }
    }

    /// Server name used in logs.
    pub fn server(&self) -> &str {
        &self.core.server
    }

    /// Feed a chunk of the peer's stdout.
    pub async fn on_stdout(&self, chunk: &[u8]) {
        self.core.output_seen.send_modify(|n| *n += 1);
        let frames = self.core.framer.lock().push(chunk);

        for frame in frames {
            match frame {
                Frame::Malformed(line) => {
                    let line = clip_line(line);
                    debug!(server = %self.core.server, line = %line, "Dropping non JSON-RPC stdout line");
                    self.core.output.push_line(line);
                }
                Frame::Message(message) => match self.core.correlator.dispatch(message) {
                    Dispatch::ServerRequest { id, method } => {
                        debug!(server = %self.core.server, method = %method, "Rejecting server request");
                        let reply =
                            JsonRpcResponse::error(id, JsonRpcError::method_not_found(&method));
                        if let Err(e) = self.send(&reply).await {
                            debug!(server = %self.core.server, error = %e.redacted(), "Failed to answer server request");
                        }
                    }
                    Dispatch::Notification { method } => {
                        debug!(server = %self.core.server, method = %method, "Server notification");
                    }
                    Dispatch::Invalid => {
                        debug!(server = %self.core.server, "Ignoring message without id or method");
                    }
                    Dispatch::Resolved(_) | Dispatch::Unknown(_) => {}
                },
            }
        }
    }

    /// Feed a chunk of the peer's stderr.
    pub fn on_stderr(&self, chunk: &[u8]) {
        self.core.output_seen.send_modify(|n| *n += 1);
        for line in self.core.output.push(chunk) {
            debug!(server = %self.core.server, line = %line, "stderr");
        }
    }

    /// Mark the peer gone. Pending requests are rejected with `reason`.
    ///
    /// Only the first call has an effect.
    pub fn terminate(&self, termination: Termination) {
        let first = self.core.termination.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(termination.clone());
            true
        });
        if first {
            let rejected = self.core.correlator.fail_all(&termination.reason);
            debug!(
                server = %self.core.server,
                reason = %termination.reason,
                exit_code = ?termination.exit_code,
                rejected,
                "Channel terminated"
            );
        }
    }

    /// The termination record, once terminated.
    pub fn termination(&self) -> Option<Termination> {
        self.core.termination.borrow().clone()
    }

    /// Whether the peer is gone.
    pub fn is_terminated(&self) -> bool {
        self.core.termination.borrow().is_some()
    }

    /// Watch for termination.
    pub fn subscribe_termination(&self) -> watch::Receiver<Option<Termination>> {
        self.core.termination.subscribe()
    }

    /// Wait until the peer terminates.
    pub async fn wait_terminated(&self) -> Termination {
        let mut rx = self.core.termination.subscribe();
        loop {
            let ended = rx.borrow_and_update().clone();
            if let Some(termination) = ended {
                return termination;
            }
            if rx.changed().await.is_err() {
                return Termination::new("channel dropped", None);
            }
        }
    }

    /// Number of output chunks seen so far.
    pub fn output_count(&self) -> u64 {
        *self.core.output_seen.borrow()
    }

    /// Recent stderr and non-protocol stdout lines.
    pub fn recent_output(&self) -> String {
        self.core.output.render()
    }

    /// Drop the writer, closing the peer's stdin.
    pub async fn close_input(&self) {
        if let Some(mut writer) = self.core.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }

    /// Wait until more than `since` output chunks were seen, the peer
    /// terminates, or `grace` elapses.
    pub async fn wait_for_output(&self, since: u64, grace: Duration) -> OutputWait {
        let mut seen = self.core.output_seen.subscribe();
        let mut terminated = self.core.termination.subscribe();
        let deadline = Instant::now() + grace;

        loop {
            let ended = terminated.borrow_and_update().clone();
            if let Some(termination) = ended {
                return OutputWait::Terminated(termination);
            }
            if *seen.borrow_and_update() > since {
                return OutputWait::Output;
            }
            tokio::select! {
                _ = seen.changed() => {}
                _ = terminated.changed() => {}
                _ = tokio::time::sleep_until(deadline) => return OutputWait::GraceElapsed,
            }
        }
    }

    /// Run the handshake up to `attempts` times.
    ///
    /// Between attempts the channel waits for fresh output (bounded by
    /// `grace`). A terminated peer ends the retries immediately.
    pub async fn handshake_with_retry(
        &self,
        attempts: u32,
        grace: Duration,
    ) -> Result<HandshakeOutcome> {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            let since = self.output_count();
            match handshake::perform(self).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) if attempt >= attempts || self.is_terminated() => return Err(err),
                Err(err) => {
                    warn!(
                        server = %self.core.server,
                        attempt,
                        attempts,
                        error = %err.redacted(),
                        "Handshake failed, retrying"
                    );
                    if let OutputWait::Terminated(t) = self.wait_for_output(since, grace).await {
                        return Err(McpError::closed(t.reason));
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn send<T: serde::Serialize>(&self, message: &T) -> Result<()> {
        let bytes = MessageFramer::encode(message)?;
        self.write(&bytes).await
    }

    async fn write(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.core.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| McpError::closed("stdin closed"))?;
        writer
            .write_all(bytes)
            .await
            .map_err(|e| McpError::transport(format!("failed to write to server: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| McpError::transport(format!("failed to flush server input: {e}")))?;
        trace!(server = %self.core.server, bytes = bytes.len(), "Wrote message");
        Ok(())
    }
}

#[async_trait]
impl RpcChannel for StdioChannel {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let pending = self.core.correlator.register(method, self.core.timeout)?;
        let sent = match MessageFramer::encode(&JsonRpcRequest::new(pending.id, method, params)) {
            Ok(bytes) => self.write(&bytes).await,
            Err(e) => Err(e),
        };
        if let Err(err) = sent {
            self.core.correlator.cancel(pending.id);
            return Err(err);
        }
        self.core.correlator.wait(pending).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        if let Some(t) = self.termination() {
            return Err(McpError::closed(t.reason));
        }
        self.send(&JsonRpcNotification::new(method, params)).await
    }
}
