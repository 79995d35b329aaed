//! OpenAI chat chunks → Gemini streamGenerateContent chunks.

use super::{gemini_chunk, gemini_terminal_chunk, Transcoder};
use crate::transformer::mapping::constants::*;
use crate::transformer::mapping::{openai_finish_to_gemini, parse_arguments};
use crate::transformer::sse::{SseEvent, SseFrame};
use crate::transformer::TokenUsage;
use serde_json::{json, Value};
use std::collections::BTreeMap;

#[derive(Debug, Default)]
struct ToolCallState {
    name: String,
    arguments: String,
}

/// Gemini client reading an OpenAI upstream.
pub struct OpenAiToGemini {
    model: String,
    tools: BTreeMap<u64, ToolCallState>,
    finish_reason: Option<String>,
    usage: TokenUsage,
    finished: bool,
}

impl OpenAiToGemini {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            tools: BTreeMap::new(),
            finish_reason: None,
            usage: TokenUsage::default(),
            finished: false,
        }
    }

    fn on_chunk(&mut self, chunk: &Value) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        if let Some(usage) = chunk.get("usage").and_then(|_| TokenUsage::from_value(chunk)) {
            self.usage.merge(usage);
        }
        if let Some(model) = chunk.get("model").and_then(Value::as_str).filter(|m| !m.is_empty()) {
            self.model = model.to_string();
        }

        let Some(choice) = chunk
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
        else {
            return frames;
        };
        let delta = choice.get("delta").unwrap_or(&Value::Null);

        if let Some(reasoning) = delta
            .get("reasoning_content")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
        {
            frames.push(SseFrame::data(gemini_chunk(vec![
                json!({"text": reasoning, "thought": true}),
            ])));
        }

        if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
            for call in calls {
                let index = call.get("index").and_then(Value::as_u64).unwrap_or(0);
                let state = self.tools.entry(index).or_default();
                let function = call.get(TOOL_FUNCTION).unwrap_or(&Value::Null);
                if let Some(name) = function.get("name").and_then(Value::as_str) {
                    if state.name.is_empty() {
                        state.name = name.to_string();
                    }
                }
                if let Some(fragment) = function.get("arguments").and_then(Value::as_str) {
                    state.arguments.push_str(fragment);
                }
            }
        }

        if let Some(text) = delta
            .get("content")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
        {
            frames.push(SseFrame::data(gemini_chunk(vec![json!({"text": text})])));
        }

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            frames.extend(self.flush_tool_calls());
            self.finish_reason = Some(reason.to_string());
        }
        frames
    }

    /// Emit accumulated tool calls as one chunk of `functionCall` parts.
    fn flush_tool_calls(&mut self) -> Option<SseFrame> {
        if self.tools.is_empty() {
            return None;
        }
        let parts: Vec<Value> = std::mem::take(&mut self.tools)
            .into_values()
            .map(|call| {
                json!({"functionCall": {"name": call.name, "args": parse_arguments(&call.arguments)}})
            })
            .collect();
        Some(SseFrame::data(gemini_chunk(parts)))
    }

    fn finish(&mut self) -> Vec<SseFrame> {
        if self.finished {
            return Vec::new();
        }
        let mut frames: Vec<SseFrame> = self.flush_tool_calls().into_iter().collect();
        let finish_reason = openai_finish_to_gemini(self.finish_reason.as_deref().unwrap_or(FINISH_STOP));
        frames.push(SseFrame::data(gemini_terminal_chunk(
            &finish_reason,
            self.usage,
            &self.model,
        )));
        self.finished = true;
        frames
    }
}

impl Transcoder for OpenAiToGemini {
    fn stream_chunk(&mut self, event: &SseEvent) -> Vec<SseFrame> {
        if self.finished {
            return Vec::new();
        }
        if event.is_done() {
            return self.finish();
        }
        match event.json() {
            Some(chunk) => self.on_chunk(&chunk),
            None => Vec::new(),
        }
    }

    fn stream_end(&mut self) -> Vec<SseFrame> {
        self.finish()
    }

    fn usage(&self) -> TokenUsage {
        self.usage
    }

    fn is_complete(&self) -> bool {
        self.finished
    }
}
