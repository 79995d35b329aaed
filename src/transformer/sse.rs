//! Server-Sent Events codec.
//!
//! [`SseParser`] turns an upstream byte stream into [`SseEvent`]s;
//! [`SseFrame`] is what transcoders emit towards the client.

use bytes::Bytes;
use serde_json::Value;

// ============================================================================
// SSE Parser
// ============================================================================

/// SSE event parsed from an upstream stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    /// `data:` lines joined by `\n`
    pub data: String,
}

impl SseEvent {
    pub fn new(event: Option<&str>, data: impl Into<String>) -> Self {
        Self {
            event: event.map(str::to_string),
            data: data.into(),
        }
    }

    /// OpenAI stream terminator.
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }

    /// Parse the data payload as JSON. `None` for `[DONE]`, empty or malformed data.
    pub fn json(&self) -> Option<Value> {
        if self.data.is_empty() || self.is_done() {
            return None;
        }
        match serde_json::from_str(&self.data) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, data = %truncate(&self.data, 200), "Skipping malformed SSE data");
                None
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Incremental SSE parser.
///
/// Bytes are buffered until a blank line closes an event, so events and
/// multi-byte characters may be split across network chunks.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and return the events they complete.
    pub fn parse(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some((end, sep_len)) = find_boundary(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..end + sep_len).take(end).collect();
            if let Some(event) = parse_block(&String::from_utf8_lossy(&block)) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing event that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if self.buffer.is_empty() {
            return None;
        }
        let block = std::mem::take(&mut self.buffer);
        parse_block(&String::from_utf8_lossy(&block))
    }

    /// Bytes waiting for an event boundary.
    pub fn remaining(&self) -> &[u8] {
        &self.buffer
    }
}

/// Position and length of the first blank-line separator.
fn find_boundary(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| (p, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data: Option<String> = None;

    for line in block.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.to_string()),
            "data" => match data {
                Some(ref mut d) => {
                    d.push('\n');
                    d.push_str(value);
                }
                None => data = Some(value.to_string()),
            },
            _ => {}
        }
    }

    if event.is_none() && data.is_none() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data.unwrap_or_default(),
    })
}

// ============================================================================
// SSE Serializer
// ============================================================================

/// One event written to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    Event { event: Option<String>, data: Value },
    /// `data: [DONE]`
    Done,
}

impl SseFrame {
    /// Data-only frame (OpenAI and Gemini style).
    pub fn data(data: Value) -> Self {
        SseFrame::Event { event: None, data }
    }

    /// Named frame (Claude style).
    pub fn named(event: &str, data: Value) -> Self {
        SseFrame::Event {
            event: Some(event.to_string()),
            data,
        }
    }

    pub fn event_name(&self) -> Option<&str> {
        match self {
            SseFrame::Event { event, .. } => event.as_deref(),
            SseFrame::Done => None,
        }
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            SseFrame::Event { data, .. } => Some(data),
            SseFrame::Done => None,
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.to_string())
    }
}

impl std::fmt::Display for SseFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SseFrame::Event { event, data } => {
                if let Some(name) = event {
                    writeln!(f, "event: {}", name)?;
                }
                write!(f, "data: {}\n\n", data)
            }
            SseFrame::Done => write!(f, "data: [DONE]\n\n"),
        }
    }
}
