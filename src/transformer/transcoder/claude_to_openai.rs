//! Anthropic Messages stream → OpenAI chat chunks.

use super::Transcoder;
use crate::transformer::mapping::constants::*;
use crate::transformer::mapping::{claude_stop_to_openai, new_chat_completion_id, unix_timestamp};
use crate::transformer::sse::{SseEvent, SseFrame};
use crate::transformer::TokenUsage;
use serde_json::{json, Value};
use std::collections::HashMap;

/// OpenAI client reading a Claude upstream.
pub struct ClaudeToOpenAi {
    id: String,
    model: String,
    created: i64,
    /// Claude block index → OpenAI `tool_calls[].index`
    tool_indices: HashMap<u64, u64>,
    usage: TokenUsage,
    finish_sent: bool,
    done: bool,
}

impl ClaudeToOpenAi {
    pub fn new(model: &str) -> Self {
        Self {
            id: new_chat_completion_id(),
            model: model.to_string(),
            created: unix_timestamp(),
            tool_indices: HashMap::new(),
            usage: TokenUsage::default(),
            finish_sent: false,
            done: false,
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

    fn on_event(&mut self, event_type: &str, data: &Value) -> Vec<SseFrame> {
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
                if block.get("type").and_then(Value::as_str) != Some(CONTENT_TOOL_USE) {
                    return Vec::new();
                }
                let block_index = data.get("index").and_then(Value::as_u64).unwrap_or(0);
                let tool_index = self.tool_indices.len() as u64;
                self.tool_indices.insert(block_index, tool_index);
                let delta = json!({
                    "tool_calls": [{
                        "index": tool_index,
                        "id": block.get("id").cloned().unwrap_or(Value::Null),
                        "type": TOOL_FUNCTION,
                        TOOL_FUNCTION: {
                            "name": block.get("name").cloned().unwrap_or(Value::Null),
                            "arguments": ""
                        }
                    }]
                });
                vec![SseFrame::data(self.chunk(delta, None))]
            }
            EVENT_CONTENT_BLOCK_DELTA => self.on_block_delta(data),
            EVENT_MESSAGE_DELTA => {
                if let Some(usage) = TokenUsage::from_value(data) {
                    self.usage.merge(usage);
                }
                let finish_reason = data
                    .pointer("/delta/stop_reason")
                    .and_then(Value::as_str)
                    .map(claude_stop_to_openai)
                    .unwrap_or_else(|| FINISH_STOP.to_string());
                self.finish_sent = true;
                let mut chunk = self.chunk(json!({}), Some(finish_reason.as_str()));
                chunk["usage"] = json!({
                    "prompt_tokens": self.usage.prompt_tokens,
                    "completion_tokens": self.usage.completion_tokens,
                    "total_tokens": self.usage.total()
                });
                vec![SseFrame::data(chunk)]
            }
            EVENT_MESSAGE_STOP => {
                self.done = true;
                vec![SseFrame::Done]
            }
            EVENT_ERROR => {
                let error = data.get("error").cloned().unwrap_or_else(|| data.clone());
                vec![SseFrame::data(json!({"error": error}))]
            }
            _ => Vec::new(),
        }
    }

    fn on_block_delta(&mut self, data: &Value) -> Vec<SseFrame> {
        let delta = data.get("delta").unwrap_or(&Value::Null);
        let text_of = |key: &str| delta.get(key).and_then(Value::as_str).unwrap_or_default();

        let openai_delta = match delta.get("type").and_then(Value::as_str) {
            Some(DELTA_TEXT) => json!({"content": text_of("text")}),
            Some(DELTA_THINKING) => json!({"reasoning_content": text_of("thinking")}),
            Some(DELTA_INPUT_JSON) => {
                let block_index = data.get("index").and_then(Value::as_u64).unwrap_or(0);
                let Some(tool_index) = self.tool_indices.get(&block_index) else {
                    return Vec::new();
                };
                json!({
                    "tool_calls": [{
                        "index": tool_index,
                        TOOL_FUNCTION: {"arguments": text_of("partial_json")}
                    }]
                })
            }
            _ => return Vec::new(),
        };
        vec![SseFrame::data(self.chunk(openai_delta, None))]
    }
}

impl Transcoder for ClaudeToOpenAi {
    fn stream_chunk(&mut self, event: &SseEvent) -> Vec<SseFrame> {
        if self.done {
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
        // A message_delta without the closing message_stop still ends the answer
        if !self.done && self.finish_sent {
            self.done = true;
            return vec![SseFrame::Done];
        }
        Vec::new()
    }

    fn usage(&self) -> TokenUsage {
        self.usage
    }

    fn is_complete(&self) -> bool {
        self.done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformer::transcoder::test_support::*;

    fn payloads(frames: &[SseFrame]) -> Vec<&Value> {
        frames.iter().filter_map(SseFrame::payload).collect()
    }

    #[test]
    fn test_text_stream() {
        let mut t = ClaudeToOpenAi::new("route-model");
        let events = vec![
            claude_event(json!({"type": "message_start", "message": {"model": "claude-3", "usage": {"input_tokens": 12, "output_tokens": 1}}})),
            claude_event(json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}})),
            claude_event(json!({"type": "ping"})),
            claude_event(json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hi"}})),
            claude_event(json!({"type": "content_block_stop", "index": 0})),
            claude_event(json!({"type": "message_delta", "delta": {"stop_reason": "max_tokens"}, "usage": {"output_tokens": 7}})),
            claude_event(json!({"type": "message_stop"})),
        ];
        let frames = run(&mut t, &events);

        assert_eq!(frames.len(), 3);
        let chunks = payloads(&frames);
        assert_eq!(chunks[0]["choices"][0]["delta"]["content"], "Hi");
        assert_eq!(chunks[0]["model"], "claude-3");
        assert_eq!(chunks[0]["object"], "chat.completion.chunk");
        assert_eq!(chunks[1]["choices"][0]["finish_reason"], "length");
        assert_eq!(chunks[1]["usage"]["total_tokens"], 19);
        assert_eq!(frames[2], SseFrame::Done);
        assert_eq!(t.usage(), TokenUsage::new(12, 7));
        assert!(t.is_complete());
    }

    #[test]
    fn test_tool_use_and_thinking() {
        let mut t = ClaudeToOpenAi::new("m");
        let events = vec![
            claude_event(json!({"type": "content_block_start", "index": 0, "content_block": {"type": "thinking", "thinking": ""}})),
            claude_event(json!({"type": "content_block_delta", "index": 0, "delta": {"type": "thinking_delta", "thinking": "plan"}})),
            claude_event(json!({"type": "content_block_delta", "index": 0, "delta": {"type": "signature_delta", "signature": "sig"}})),
            claude_event(json!({"type": "content_block_stop", "index": 0})),
            claude_event(json!({"type": "content_block_start", "index": 1, "content_block": {"type": "tool_use", "id": "toolu_1", "name": "search", "input": {}}})),
            claude_event(json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "{\"q\":"}})),
            claude_event(json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "\"x\"}"}})),
            claude_event(json!({"type": "content_block_stop", "index": 1})),
            claude_event(json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 3}})),
            claude_event(json!({"type": "message_stop"})),
        ];
        let frames = run(&mut t, &events);
        let chunks = payloads(&frames);

        assert_eq!(chunks[0]["choices"][0]["delta"]["reasoning_content"], "plan");
        let call = &chunks[1]["choices"][0]["delta"]["tool_calls"][0];
        assert_eq!(call["index"], 0);
        assert_eq!(call["id"], "toolu_1");
        assert_eq!(call["function"]["name"], "search");
        let args: String = chunks[2..4]
            .iter()
            .map(|c| c["choices"][0]["delta"]["tool_calls"][0]["function"]["arguments"].as_str().unwrap())
            .collect();
        assert_eq!(args, "{\"q\":\"x\"}");
        assert_eq!(chunks[4]["choices"][0]["finish_reason"], "tool_calls");
    }

    #[test]
    fn test_truncated_stream_is_incomplete() {
        let mut t = ClaudeToOpenAi::new("m");
        let frames = run(
            &mut t,
            &[claude_event(json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "par"}}))],
        );
        assert_eq!(frames.len(), 1);
        assert!(!t.is_complete());
    }

    #[test]
    fn test_missing_message_stop_completes_after_delta() {
        let mut t = ClaudeToOpenAi::new("m");
        let frames = run(
            &mut t,
            &[claude_event(json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}}))],
        );
        assert_eq!(frames.last(), Some(&SseFrame::Done));
        assert!(t.is_complete());
    }

    #[test]
    fn test_error_event_forwarded() {
        let mut t = ClaudeToOpenAi::new("m");
        let frames = t.stream_chunk(&claude_event(
            json!({"type": "error", "error": {"type": "overloaded_error", "message": "busy"}}),
        ));
        assert_eq!(frames[0].payload().unwrap()["error"]["type"], "overloaded_error");
    }
}
