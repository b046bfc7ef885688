//! Bounded buffer of recent server output lines.

use std::collections::VecDeque;

use parking_lot::Mutex;

/// Lines kept by default.
pub const DEFAULT_CAPACITY: usize = 100;

/// Longest line kept, in bytes. Longer partial lines are flushed at this
/// size and longer complete lines are cut.
pub const MAX_LINE_BYTES: usize = 8 * 1024;

/// Cut `line` to at most [`MAX_LINE_BYTES`] on a character boundary.
pub fn clip_line(mut line: String) -> String {
    if line.len() > MAX_LINE_BYTES {
        let mut cut = MAX_LINE_BYTES;
        while !line.is_char_boundary(cut) {
            cut -= 1;
        }
        line.truncate(cut);
        line.push_str(" [truncated]");
    }
    line
}

#[derive(Debug, Default)]
struct Inner {
    lines: VecDeque<String>,
    partial: String,
}

/// Ring buffer of the most recent output lines.
#[derive(Debug)]
pub struct OutputBuffer {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl OutputBuffer {
    /// Create a buffer keeping `capacity` lines.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Append raw bytes, returning the lines they completed.
    pub fn push(&self, chunk: &[u8]) -> Vec<String> {
        let text = String::from_utf8_lossy(chunk);
        let mut inner = self.inner.lock();
        let mut completed = Vec::new();

        for piece in text.split_inclusive('\n') {
            inner.partial.push_str(piece);
            let ends_line = piece.ends_with('\n');
            if ends_line || inner.partial.len() >= MAX_LINE_BYTES {
                let line = std::mem::take(&mut inner.partial);
                let line = clip_line(line.trim_end_matches(['\n', '\r']).to_string());
                completed.push(line.clone());
                self.store(&mut inner, line);
            }
        }
        completed
    }

    /// Append one complete line, cut to [`MAX_LINE_BYTES`].
    pub fn push_line(&self, line: impl Into<String>) {
        let line = clip_line(line.into());
        let mut inner = self.inner.lock();
        self.store(&mut inner, line);
    }

    fn store(&self, inner: &mut Inner, line: String) {
        if inner.lines.len() == self.capacity {
            inner.lines.pop_front();
        }
        inner.lines.push_back(line);
    }

    /// Buffered lines, oldest first, including any unterminated tail.
    pub fn lines(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let mut lines: Vec<String> = inner.lines.iter().cloned().collect();
        if !inner.partial.is_empty() {
            lines.push(inner.partial.clone());
        }
        lines
    }

    /// Buffered lines joined with newlines.
    pub fn render(&self) -> String {
        self.lines().join("\n")
    }

    /// Whether nothing has been captured.
    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock();
        inner.lines.is_empty() && inner.partial.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_split_across_chunks() {
        let buffer = OutputBuffer::default();
        assert!(buffer.push(b"hel").is_empty());
        assert_eq!(buffer.push(b"lo\r\nwor"), vec!["hello"]);
        assert_eq!(buffer.lines(), vec!["hello", "wor"]);
        assert_eq!(buffer.push(b"ld\n"), vec!["world"]);
        assert_eq!(buffer.render(), "hello\nworld");
    }

    #[test]
    fn test_capacity_keeps_most_recent() {
        let buffer = OutputBuffer::new(3);
        for i in 0..10 {
            buffer.push_line(format!("line {i}"));
        }
        assert_eq!(buffer.lines(), vec!["line 7", "line 8", "line 9"]);
    }

    #[test]
    fn test_long_partial_is_flushed() {
        let buffer = OutputBuffer::new(5);
        let completed = buffer.push(&vec![b'a'; MAX_LINE_BYTES + 10]);
        assert_eq!(completed.len(), 1);
        assert!(!buffer.is_empty());
    }

    #[test]
    fn test_oversized_complete_line_is_cut() {
        let buffer = OutputBuffer::new(5);
        buffer.push_line("é".repeat(MAX_LINE_BYTES));
        let lines = buffer.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].len() <= MAX_LINE_BYTES + " [truncated]".len());
        assert!(lines[0].ends_with("[truncated]"));
        assert!(lines[0].starts_with('é'));
    }

    #[test]
    fn test_clip_line_keeps_short_lines() {
        assert_eq!(clip_line("short".into()), "short");
    }

    #[test]
    fn test_empty() {
        let buffer = OutputBuffer::default();
        assert!(buffer.is_empty());
        assert_eq!(buffer.render(), "");
    }
}
