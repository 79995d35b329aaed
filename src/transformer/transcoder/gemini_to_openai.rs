//! Gemini streamGenerateContent chunks → OpenAI chat chunks.

use super::{unwrap_gemini_envelope, Transcoder};
use crate::transformer::mapping::constants::*;
use crate::transformer::mapping::{
    gemini_finish_to_openai, new_chat_completion_id, new_tool_call_id, unix_timestamp,
};
use crate::transformer::sse::{SseEvent, SseFrame};
use crate::transformer::TokenUsage;
use serde_json::{json, Value};

/// OpenAI client reading a Gemini upstream.
///
/// Gemini streams have no terminator, so a clean end of stream completes
/// the response.
pub struct GeminiToOpenAi {
    id: String,
    model: String,
    created: i64,
    role_sent: bool,
    next_tool_index: u64,
    finish_sent: bool,
    usage: TokenUsage,
    finished: bool,
}

impl GeminiToOpenAi {
    pub fn new(model: &str) -> Self {
        Self {
            id: new_chat_completion_id(),
            model: model.to_string(),
            created: unix_timestamp(),
            role_sent: false,
            next_tool_index: 0,
            finish_sent: false,
            usage: TokenUsage::default(),
            finished: false,
        }
    }

    fn chunk(&self, delta: Value, finish_reason: Option<&str>) -> Value {
        json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{"index": 0, "delta": delta, "finish_reason": finish_reason}]
        })
    }

    /// Translate one Gemini chunk into OpenAI chunk values.
    pub(crate) fn on_chunk(&mut self, chunk: &Value) -> Vec<Value> {
        let chunk = unwrap_gemini_envelope(chunk);
        if let Some(usage) = TokenUsage::from_value(chunk) {
            self.usage.merge(usage);
        }
        if let Some(model) = chunk.get("modelVersion").and_then(Value::as_str) {
            self.model = model.to_string();
        }

        let Some(candidate) = chunk
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
        else {
            return Vec::new();
        };

        let mut out = Vec::new();
        let parts = candidate
            .pointer("/content/parts")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for part in parts {
            let delta = if let Some(call) = part.get("functionCall") {
                let index = self.next_tool_index;
                self.next_tool_index += 1;
                let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
                json!({
                    "tool_calls": [{
                        "index": index,
                        "id": call.get("id").and_then(Value::as_str).map(str::to_string).unwrap_or_else(new_tool_call_id),
                        "type": TOOL_FUNCTION,
                        TOOL_FUNCTION: {
                            "name": call.get("name").cloned().unwrap_or(Value::Null),
                            "arguments": args.to_string()
                        }
                    }]
                })
            } else if let Some(text) = part.get("text").and_then(Value::as_str) {
                if text.is_empty() {
                    continue;
                }
                if part.get("thought").and_then(Value::as_bool) == Some(true) {
                    json!({"reasoning_content": text})
                } else {
                    json!({"content": text})
                }
            } else {
                continue;
            };
            out.push(self.with_role(delta));
        }

        if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
            let finish_reason = if self.next_tool_index > 0 {
                FINISH_TOOL_CALLS.to_string()
            } else {
                gemini_finish_to_openai(reason)
            };
            self.finish_sent = true;
            out.push(self.chunk(json!({}), Some(finish_reason.as_str())));
        }
        out
    }

    /// Closing chunks: a finish chunk if none was seen, then usage.
    pub(crate) fn finish_chunks(&mut self) -> Vec<Value> {
        let mut out = Vec::new();
        if !self.finish_sent {
            self.finish_sent = true;
            out.push(self.chunk(json!({}), Some(FINISH_STOP)));
        }
        out.push(json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [],
            "usage": {
                "prompt_tokens": self.usage.prompt_tokens,
                "completion_tokens": self.usage.completion_tokens,
                "total_tokens": self.usage.total()
            }
        }));
        out
    }

    /// The first delta carries the assistant role.
    fn with_role(&mut self, mut delta: Value) -> Value {
        if !self.role_sent {
            self.role_sent = true;
            delta["role"] = json!(ROLE_ASSISTANT);
        }
        self.chunk(delta, None)
    }
}

impl Transcoder for GeminiToOpenAi {
    fn stream_chunk(&mut self, event: &SseEvent) -> Vec<SseFrame> {
        if self.finished {
            return Vec::new();
        }
        match event.json() {
            Some(chunk) => self.on_chunk(&chunk).into_iter().map(SseFrame::data).collect(),
            None => Vec::new(),
        }
    }

    fn stream_end(&mut self) -> Vec<SseFrame> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        let mut frames: Vec<SseFrame> = self.finish_chunks().into_iter().map(SseFrame::data).collect();
        frames.push(SseFrame::Done);
        frames
    }

    fn usage(&self) -> TokenUsage {
        self.usage
    }

    fn is_complete(&self) -> bool {
        self.finished
    }
}
