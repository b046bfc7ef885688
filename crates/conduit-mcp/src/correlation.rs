//! Request correlation: id allocation, the pending table and timeouts.
//!
//! A request is registered before it is written so a fast response can never
//! arrive ahead of its table entry. Entries leave the table when their
//! response arrives, when they time out, when the write fails, or when the
//! connection terminates. After termination every registration fails.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{McpError, Result};
use crate::protocol::{JsonRpcMessage, MessageKind};

struct PendingEntry {
    method: String,
    sender: oneshot::Sender<Result<Value>>,
}

#[derive(Default)]
struct PendingTable {
    entries: HashMap<u64, PendingEntry>,
    closed: Option<String>,
}

/// A registered request awaiting its response.
#[derive(Debug)]
pub struct PendingRequest {
    /// Request id.
    pub id: u64,
    /// Request method.
    pub method: String,
    /// When the request times out.
    pub deadline: Instant,
    timeout: Duration,
    receiver: oneshot::Receiver<Result<Value>>,
}

/// What [`Correlator::dispatch`] did with a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// A pending request was resolved or rejected.
    Resolved(u64),
    /// A response whose id is not pending.
    Unknown(Option<Value>),
    /// A request from the server.
    ServerRequest {
        /// Id to answer with.
        id: Value,
        /// Requested method.
        method: String,
    },
    /// A notification from the server.
    Notification {
        /// Notification method.
        method: String,
    },
    /// Neither a request, response nor notification.
    Invalid,
}

/// Pending-request table for one connection.
pub struct Correlator {
    next_id: AtomicU64,
    table: Mutex<PendingTable>,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("next_id", &self.next_id.load(Ordering::SeqCst))
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl Correlator {
    /// Create a table whose first id is 1.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            table: Mutex::new(PendingTable::default()),
        }
    }

    /// Allocate an id and register a pending entry for it.
    pub fn register(&self, method: &str, timeout: Duration) -> Result<PendingRequest> {
        let mut table = self.table.lock();
        if let Some(reason) = &table.closed {
            return Err(McpError::closed(reason.clone()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = oneshot::channel();
        table.entries.insert(
            id,
            PendingEntry {
                method: method.to_string(),
                sender,
            },
        );
        trace!(id, method = %method, "Registered request");

        Ok(PendingRequest {
            id,
            method: method.to_string(),
            deadline: deadline_after(timeout),
            timeout,
            receiver,
        })
    }

    /// Route an incoming message.
    pub fn dispatch(&self, message: JsonRpcMessage) -> Dispatch {
        match message.kind() {
            MessageKind::Response => self.resolve(message),
            MessageKind::Request => Dispatch::ServerRequest {
                id: message.id.unwrap_or(Value::Null),
                method: message.method.unwrap_or_default(),
            },
            MessageKind::Notification => Dispatch::Notification {
                method: message.method.unwrap_or_default(),
            },
            MessageKind::Invalid => Dispatch::Invalid,
        }
    }

    fn resolve(&self, message: JsonRpcMessage) -> Dispatch {
        let entry = message
            .numeric_id()
            .and_then(|id| self.table.lock().entries.remove(&id).map(|e| (id, e)));

        let Some((id, entry)) = entry else {
            debug!(id = ?message.id, "Ignoring response for unknown request id");
            return Dispatch::Unknown(message.id);
        };

        let outcome = match message.error {
            Some(error) => Err(McpError::server_error(error.code, error.message, error.data)),
            None => Ok(message.result.unwrap_or(Value::Null)),
        };
        trace!(id, method = %entry.method, ok = outcome.is_ok(), "Resolved request");
        // the caller may have timed out in the meantime
        let _ = entry.sender.send(outcome);
        Dispatch::Resolved(id)
    }

    /// Drop a pending entry. Returns whether it was still pending.
    pub fn cancel(&self, id: u64) -> bool {
        self.table.lock().entries.remove(&id).is_some()
    }

    /// Reject every pending request and refuse new ones.
    ///
    /// Returns how many requests were rejected. Only the first reason sticks.
    pub fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<(u64, PendingEntry)> = {
            let mut table = self.table.lock();
            if table.closed.is_none() {
                table.closed = Some(reason.to_string());
            }
            table.entries.drain().collect()
        };

        let count = drained.len();
        for (id, entry) in drained {
            debug!(id, method = %entry.method, reason = %reason, "Rejecting pending request");
            let _ = entry.sender.send(Err(McpError::closed(reason)));
        }
        count
    }

    /// Termination reason, once closed.
    pub fn closed_reason(&self) -> Option<String> {
        self.table.lock().closed.clone()
    }

    /// Number of outstanding requests.
    pub fn pending_count(&self) -> usize {
        self.table.lock().entries.len()
    }

    /// Whether `id` is outstanding.
    pub fn is_pending(&self, id: u64) -> bool {
        self.table.lock().entries.contains_key(&id)
    }

    /// Wait for the response to `pending`, removing the entry on timeout.
    pub async fn wait(&self, pending: PendingRequest) -> Result<Value> {
        let PendingRequest {
            id,
            method,
            deadline,
            timeout,
            receiver,
        } = pending;

        match tokio::time::timeout_at(deadline, receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(McpError::closed(
                self.closed_reason()
                    .unwrap_or_else(|| "response channel dropped".to_string()),
            )),
            Err(_) => {
                self.cancel(id);
                debug!(id, method = %method, ?timeout, "Request timed out");
                Err(McpError::Timeout {
                    method,
                    after: timeout,
                })
            }
        }
    }
}

/// `now + timeout`, saturating at roughly thirty years out.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(86400 * 365 * 30))
}
