//! Server-Sent Events framing
//!
//! Incremental parser: feed it body bytes as they arrive and pull complete
//! event payloads out. Only `data` fields matter here; `event`, `id` and
//! `retry` are accepted and ignored.

use std::collections::VecDeque;

/// Incremental SSE parser
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    data: Vec<String>,
    ready: VecDeque<String>,
}

impl SseParser {
    /// Create an empty parser
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append body bytes
    ///
    /// Bytes may split lines, events or UTF-8 sequences anywhere.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);

        let mut consumed = 0;
        while let Some(offset) = self.buffer[consumed..].iter().position(|&b| b == b'\n') {
            let end = consumed + offset;
            let mut line = &self.buffer[consumed..end];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            let line = String::from_utf8_lossy(line).into_owned();
            consumed = end + 1;
            self.process_line(&line);
        }
        self.buffer.drain(..consumed);
    }

    /// Next complete event payload, if any
    pub fn next_event(&mut self) -> Option<String> {
        self.ready.pop_front()
    }

    /// Drain every complete event payload
    pub fn drain(&mut self) -> Vec<String> {
        self.ready.drain(..).collect()
    }

    fn process_line(&mut self, line: &str) {
        if line.is_empty() {
            if !self.data.is_empty() {
                self.ready.push_back(self.data.join("\n"));
                self.data.clear();
            }
            return;
        }

        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        if field == "data" {
            self.data.push(value.to_string());
        } else {
            tracing::trace!(field, "ignoring sse field");
        }
    }
}
