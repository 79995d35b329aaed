//! OpenAI chat chunks → Anthropic Messages stream.

use super::Transcoder;
use crate::transformer::mapping::constants::*;
use crate::transformer::mapping::{new_message_id, new_tool_call_id, openai_finish_to_claude};
use crate::transformer::sse::{SseEvent, SseFrame};
use crate::transformer::TokenUsage;
use serde_json::{json, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    Thinking,
    /// Tool use for the given `tool_calls[].index`
    ToolUse(u64),
}

#[derive(Debug, Default)]
struct ToolCallState {
    id: String,
    name: String,
    arguments: String,
    /// Bytes of `arguments` already sent as input_json_delta
    emitted: usize,
    /// Set once the tool_use block has been opened
    opened: bool,
}

/// Claude client reading an OpenAI upstream.
pub struct OpenAiToClaude {
    model: String,
    message_id: Option<String>,
    open_block: Option<(BlockKind, usize)>,
    next_index: usize,
    tools: BTreeMap<u64, ToolCallState>,
    finish_reason: Option<String>,
    usage: TokenUsage,
    finished: bool,
}

impl OpenAiToClaude {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            message_id: None,
            open_block: None,
            next_index: 0,
            tools: BTreeMap::new(),
            finish_reason: None,
            usage: TokenUsage::default(),
            finished: false,
        }
    }

    /// Translate one parsed OpenAI chunk.
    pub(crate) fn on_chunk(&mut self, chunk: &Value) -> Vec<SseFrame> {
        if self.finished {
            return Vec::new();
        }
        let mut frames = Vec::new();
        self.ensure_started(chunk, &mut frames);

        if let Some(usage) = chunk.get("usage").and_then(|_| TokenUsage::from_value(chunk)) {
            self.usage.merge(usage);
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
            self.switch_block(BlockKind::Thinking, &mut frames);
            frames.push(self.block_delta(json!({"type": DELTA_THINKING, "thinking": reasoning})));
        }

        if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
            for call in calls {
                self.on_tool_call_delta(call, &mut frames);
            }
        }

        if let Some(text) = delta
            .get("content")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
        {
            self.switch_block(BlockKind::Text, &mut frames);
            frames.push(self.block_delta(json!({"type": DELTA_TEXT, "text": text})));
        }

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            if reason == FINISH_TOOL_CALLS {
                self.open_pending_tools(&mut frames);
                self.close_block(&mut frames);
            }
            self.finish_reason = Some(reason.to_string());
        }

        frames
    }

    /// Close the message. Idempotent.
    pub(crate) fn finish(&mut self) -> Vec<SseFrame> {
        if self.finished {
            return Vec::new();
        }
        let mut frames = Vec::new();
        self.ensure_started(&Value::Null, &mut frames);
        self.open_pending_tools(&mut frames);
        self.close_block(&mut frames);

        let stop_reason = self
            .finish_reason
            .as_deref()
            .map(openai_finish_to_claude)
            .unwrap_or_else(|| STOP_END_TURN.to_string());
        frames.push(SseFrame::named(
            EVENT_MESSAGE_DELTA,
            json!({
                "type": EVENT_MESSAGE_DELTA,
                "delta": {"stop_reason": stop_reason, "stop_sequence": null},
                "usage": {
                    "input_tokens": self.usage.prompt_tokens,
                    "output_tokens": self.usage.completion_tokens
                }
            }),
        ));
        frames.push(SseFrame::named(
            EVENT_MESSAGE_STOP,
            json!({"type": EVENT_MESSAGE_STOP}),
        ));
        self.finished = true;
        frames
    }

    pub(crate) fn set_usage(&mut self, usage: TokenUsage) {
        self.usage.merge(usage);
    }

    fn ensure_started(&mut self, chunk: &Value, frames: &mut Vec<SseFrame>) {
        if self.message_id.is_some() {
            return;
        }
        let id = new_message_id();
        let model = chunk
            .get("model")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.model)
            .to_string();
        frames.push(SseFrame::named(
            EVENT_MESSAGE_START,
            json!({
                "type": EVENT_MESSAGE_START,
                "message": {
                    "id": id,
                    "type": "message",
                    "role": ROLE_ASSISTANT,
                    "content": [],
                    "model": model,
                    "stop_reason": null,
                    "stop_sequence": null,
                    "usage": {"input_tokens": 0, "output_tokens": 0}
                }
            }),
        ));
        self.message_id = Some(id);
    }

    fn on_tool_call_delta(&mut self, call: &Value, frames: &mut Vec<SseFrame>) {
        let index = call.get("index").and_then(Value::as_u64).unwrap_or(0);
        let function = call.get(TOOL_FUNCTION).unwrap_or(&Value::Null);

        let state = self.tools.entry(index).or_default();
        if let Some(id) = call.get("id").and_then(Value::as_str).filter(|s| !s.is_empty()) {
            if state.id.is_empty() {
                state.id = id.to_string();
            }
        }
        if let Some(name) = function.get("name").and_then(Value::as_str) {
            if state.name.is_empty() {
                state.name = name.to_string();
            }
        }
        if let Some(fragment) = function.get("arguments").and_then(Value::as_str) {
            state.arguments.push_str(fragment);
        }
        let already_opened = state.opened;

        let kind = BlockKind::ToolUse(index);
        match self.open_block.map(|(k, _)| k) {
            Some(open) if open == kind => {}
            _ if already_opened => {
                // The block for this call was closed by a text or thinking block
                tracing::debug!(index, "Dropping late tool argument fragment");
                return;
            }
            // Another call is streaming; this one is flushed once that block closes
            Some(BlockKind::ToolUse(_)) => return,
            _ => self.switch_block(kind, frames),
        }
        self.flush_arguments(index, frames);
    }

    /// Send whatever part of the call's arguments the client has not seen yet.
    fn flush_arguments(&mut self, index: u64, frames: &mut Vec<SseFrame>) {
        let Some(state) = self.tools.get_mut(&index) else {
            return;
        };
        if state.emitted >= state.arguments.len() {
            return;
        }
        let pending = state.arguments[state.emitted..].to_string();
        state.emitted = state.arguments.len();
        frames.push(self.block_delta(json!({"type": DELTA_INPUT_JSON, "partial_json": pending})));
    }

    /// Open the buffered tool calls in index order, each with its full arguments.
    fn open_pending_tools(&mut self, frames: &mut Vec<SseFrame>) {
        let pending: Vec<u64> = self
            .tools
            .iter()
            .filter(|(_, state)| !state.opened)
            .map(|(index, _)| *index)
            .collect();
        for index in pending {
            self.switch_block(BlockKind::ToolUse(index), frames);
            self.flush_arguments(index, frames);
        }
    }

    /// Make `kind` the open block, closing any other one first.
    fn switch_block(&mut self, kind: BlockKind, frames: &mut Vec<SseFrame>) {
        if self.open_block.map(|(k, _)| k) == Some(kind) {
            return;
        }
        self.close_block(frames);

        let index = self.next_index;
        self.next_index += 1;
        let content_block = match kind {
            BlockKind::Text => json!({"type": CONTENT_TEXT, "text": ""}),
            BlockKind::Thinking => json!({"type": CONTENT_THINKING, "thinking": ""}),
            BlockKind::ToolUse(tool_index) => {
                let state = self.tools.entry(tool_index).or_default();
                if state.id.is_empty() {
                    state.id = new_tool_call_id();
                }
                state.opened = true;
                json!({"type": CONTENT_TOOL_USE, "id": state.id, "name": state.name, "input": {}})
            }
        };
        frames.push(SseFrame::named(
            EVENT_CONTENT_BLOCK_START,
            json!({"type": EVENT_CONTENT_BLOCK_START, "index": index, "content_block": content_block}),
        ));
        self.open_block = Some((kind, index));
    }

    fn close_block(&mut self, frames: &mut Vec<SseFrame>) {
        if let Some((_, index)) = self.open_block.take() {
            frames.push(SseFrame::named(
                EVENT_CONTENT_BLOCK_STOP,
                json!({"type": EVENT_CONTENT_BLOCK_STOP, "index": index}),
            ));
        }
    }

    fn block_delta(&self, delta: Value) -> SseFrame {
        let index = self.open_block.map(|(_, i)| i).unwrap_or(0);
        SseFrame::named(
            EVENT_CONTENT_BLOCK_DELTA,
            json!({"type": EVENT_CONTENT_BLOCK_DELTA, "index": index, "delta": delta}),
        )
    }
}

impl Transcoder for OpenAiToClaude {
    fn stream_chunk(&mut self, event: &SseEvent) -> Vec<SseFrame> {
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
