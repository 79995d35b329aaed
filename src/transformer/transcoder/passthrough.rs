//! Same-protocol streams: bytes are forwarded untouched, events are only
//! inspected for usage.

use super::Transcoder;
use crate::transformer::mapping::constants::EVENT_MESSAGE_STOP;
use crate::transformer::sse::{SseEvent, SseFrame};
use crate::transformer::{Protocol, TokenUsage};
use serde_json::Value;

pub struct PassthroughTranscoder {
    protocol: Protocol,
    usage: TokenUsage,
    saw_terminator: bool,
    ended: bool,
}

impl PassthroughTranscoder {
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            usage: TokenUsage::default(),
            saw_terminator: false,
            ended: false,
        }
    }

    /// Whether the protocol's own terminal event was seen in the stream.
    pub fn saw_terminator(&self) -> bool {
        self.saw_terminator
    }
}

impl Transcoder for PassthroughTranscoder {
    fn stream_chunk(&mut self, event: &SseEvent) -> Vec<SseFrame> {
        if event.is_done() {
            self.saw_terminator = true;
            return Vec::new();
        }
        if let Some(value) = event.json() {
            if let Some(usage) = TokenUsage::from_value(&value) {
                self.usage.merge(usage);
            }
            if self.protocol == Protocol::Claude
                && value.get("type").and_then(Value::as_str) == Some(EVENT_MESSAGE_STOP)
            {
                self.saw_terminator = true;
            }
        }
        Vec::new()
    }

    fn stream_end(&mut self) -> Vec<SseFrame> {
        self.ended = true;
        Vec::new()
    }

    fn usage(&self) -> TokenUsage {
        self.usage
    }

    /// The client receives the upstream's own terminator, so a clean end of
    /// the upstream stream is a complete response.
    fn is_complete(&self) -> bool {
        self.saw_terminator || self.ended
    }

    fn forwards_raw_bytes(&self) -> bool {
        true
    }
}
