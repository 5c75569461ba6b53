//! Bounded run log that keeps only the most recent bytes.

use std::collections::VecDeque;

/// Maximum retained log size per run (5 MiB).
pub const DEFAULT_LOG_CAP: usize = 5 * 1024 * 1024;

/// Append-only text buffer capped at a fixed number of bytes.
///
/// When an append pushes the buffer past its cap, the oldest bytes are
/// dropped. The front of the buffer always starts on a UTF-8 character
/// boundary, so a truncation can leave it slightly shorter than the cap.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    bytes: VecDeque<u8>,
    cap: usize,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::with_cap(DEFAULT_LOG_CAP)
    }

    pub fn with_cap(cap: usize) -> Self {
        Self {
            bytes: VecDeque::new(),
            cap,
        }
    }

    pub fn push(&mut self, chunk: &str) {
        let chunk = chunk.as_bytes();
        if chunk.len() >= self.cap {
            self.bytes.clear();
            self.bytes.extend(&chunk[chunk.len() - self.cap..]);
        } else {
            self.bytes.extend(chunk);
            let excess = self.bytes.len().saturating_sub(self.cap);
            self.bytes.drain(..excess);
        }

        // Drop continuation bytes left over from a character split by truncation.
        while self.bytes.front().is_some_and(|b| b & 0xC0 == 0x80) {
            self.bytes.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Copy the retained log out as text.
    pub fn contents(&self) -> String {
        let (head, tail) = self.bytes.as_slices();
        let mut out = Vec::with_capacity(self.bytes.len());
        out.extend_from_slice(head);
        out.extend_from_slice(tail);
        String::from_utf8(out).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}
