//! Newline-delimited JSON-RPC framing for stdio transports.
//!
//! Each message is one line of JSON. Bytes are buffered until a newline
//! arrives, so a message split across reads is parsed once complete. Lines
//! that are not JSON-RPC are handed back as [`Frame::Malformed`] and never
//! affect the messages around them.

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::protocol::JsonRpcMessage;

/// Bytes buffered without a newline before the buffer is discarded.
pub const MAX_LINE_BYTES: usize = 64 * 1024 * 1024;

/// One decoded line.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A JSON-RPC message.
    Message(JsonRpcMessage),
    /// A non-empty line that is not a JSON-RPC message.
    Malformed(String),
}

/// Incremental line decoder.
#[derive(Debug, Default)]
pub struct MessageFramer {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to hold no newline.
    scanned: usize,
}

impl MessageFramer {
    /// Create an empty framer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.buffer[from..].iter().position(|&b| b == b'\n') {
            let end = from + offset;
            decode_line(&self.buffer[start..end], &mut frames);
            start = end + 1;
            from = start;
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();

        if self.buffer.len() > MAX_LINE_BYTES {
            self.scanned = 0;
            let dropped = std::mem::take(&mut self.buffer);
            frames.push(Frame::Malformed(format!(
                "<{} bytes without a newline discarded>",
                dropped.len()
            )));
        }
        frames
    }

    /// Bytes waiting for a newline.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Encode a message as one line.
    pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec(message)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

fn decode_line(raw: &[u8], frames: &mut Vec<Frame>) {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    if text.is_empty() {
        return;
    }

    match serde_json::from_str::<Value>(text) {
        // batches are unpacked into individual messages
        Ok(Value::Array(items)) => {
            for item in items {
                frames.push(to_frame(item, text));
            }
        }
        Ok(value) => frames.push(to_frame(value, text)),
        Err(_) => frames.push(Frame::Malformed(text.to_string())),
    }
}

fn to_frame(value: Value, line: &str) -> Frame {
    if !value.is_object() {
        return Frame::Malformed(line.to_string());
    }
    match serde_json::from_value::<JsonRpcMessage>(value) {
        Ok(message) => Frame::Message(message),
        Err(_) => Frame::Malformed(line.to_string()),
    }
}
