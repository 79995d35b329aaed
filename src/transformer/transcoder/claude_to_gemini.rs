//! Anthropic Messages stream → Gemini streamGenerateContent chunks.

use super::{gemini_chunk, gemini_terminal_chunk, Transcoder};
use crate::transformer::mapping::constants::*;
use crate::transformer::mapping::{claude_stop_to_openai, openai_finish_to_gemini, parse_arguments};
use crate::transformer::sse::{SseEvent, SseFrame};
use crate::transformer::TokenUsage;
use serde_json::{json, Value};
use std::collections::HashMap;

#[derive(Debug, Default)]
struct ToolBlock {
    name: String,
    input_json: String,
}

/// Gemini client reading a Claude upstream.
pub struct ClaudeToGemini {
    model: String,
    /// Open tool_use blocks by Claude block index
    tool_blocks: HashMap<u64, ToolBlock>,
    stop_reason: Option<String>,
    usage: TokenUsage,
    finished: bool,
}

impl ClaudeToGemini {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            tool_blocks: HashMap::new(),
            stop_reason: None,
            usage: TokenUsage::default(),
            finished: false,
        }
    }

    fn on_event(&mut self, event_type: &str, data: &Value) -> Vec<SseFrame> {
        let index = data.get("index").and_then(Value::as_u64).unwrap_or(0);
        match event_type {
            EVENT_MESSAGE_START => {
                if let Some(usage) = TokenUsage::from_value(data) {
                    self.usage.merge(usage);
                }
                if let Some(model) = data.pointer("/message/model").and_then(Value::as_str) {
                    self.model = model.to_string();
                }
                Vec::new()
            }
            EVENT_CONTENT_BLOCK_START => {
                let block = data.get("content_block").unwrap_or(&Value::Null);
                if block.get("type").and_then(Value::as_str) == Some(CONTENT_TOOL_USE) {
                    let name = block.get("name").and_then(Value::as_str).unwrap_or_default();
                    self.tool_blocks.insert(
                        index,
                        ToolBlock {
                            name: name.to_string(),
                            input_json: String::new(),
                        },
                    );
                }
                Vec::new()
            }
            EVENT_CONTENT_BLOCK_DELTA => {
                let delta = data.get("delta").unwrap_or(&Value::Null);
                let text_of = |key: &str| delta.get(key).and_then(Value::as_str).unwrap_or_default();
                let part = match delta.get("type").and_then(Value::as_str) {
                    Some(DELTA_TEXT) => json!({"text": text_of("text")}),
                    Some(DELTA_THINKING) => json!({"text": text_of("thinking"), "thought": true}),
                    Some(DELTA_INPUT_JSON) => {
                        if let Some(block) = self.tool_blocks.get_mut(&index) {
                            block.input_json.push_str(text_of("partial_json"));
                        }
                        return Vec::new();
                    }
                    _ => return Vec::new(),
                };
                vec![SseFrame::data(gemini_chunk(vec![part]))]
            }
            EVENT_CONTENT_BLOCK_STOP => match self.tool_blocks.remove(&index) {
                Some(block) => vec![SseFrame::data(gemini_chunk(vec![json!({
                    "functionCall": {"name": block.name, "args": parse_arguments(&block.input_json)}
                })]))],
                None => Vec::new(),
            },
            EVENT_MESSAGE_DELTA => {
                if let Some(usage) = TokenUsage::from_value(data) {
                    self.usage.merge(usage);
                }
                if let Some(reason) = data.pointer("/delta/stop_reason").and_then(Value::as_str) {
                    self.stop_reason = Some(reason.to_string());
                }
                Vec::new()
            }
            EVENT_MESSAGE_STOP => self.finish(),
            _ => Vec::new(),
        }
    }

    fn finish(&mut self) -> Vec<SseFrame> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        let finish_reason = self
            .stop_reason
            .as_deref()
            .map(|r| openai_finish_to_gemini(&claude_stop_to_openai(r)))
            .unwrap_or_else(|| GEMINI_STOP.to_string());
        vec![SseFrame::data(gemini_terminal_chunk(
            &finish_reason,
            self.usage,
            &self.model,
        ))]
    }
}

impl Transcoder for ClaudeToGemini {
    fn stream_chunk(&mut self, event: &SseEvent) -> Vec<SseFrame> {
        if self.finished {
            return Vec::new();
        }
        let Some(data) = event.json() else {
            return Vec::new();
        };
        let event_type = data
            .get("type")
            .and_then(Value::as_str)
            .or(event.event.as_deref())
            .unwrap_or_default()
            .to_string();
        self.on_event(&event_type, &data)
    }

    fn stream_end(&mut self) -> Vec<SseFrame> {
        // No message_stop means the upstream cut the stream short
        Vec::new()
    }

    fn usage(&self) -> TokenUsage {
        self.usage
    }

    fn is_complete(&self) -> bool {
        self.finished
    }
}
