//! Gemini streamGenerateContent chunks → Anthropic Messages stream.
//!
//! Composed through the OpenAI pivot: Gemini chunks become OpenAI chunks,
//! which drive the OpenAI → Claude state machine.

use super::{GeminiToOpenAi, OpenAiToClaude, Transcoder};
use crate::transformer::sse::{SseEvent, SseFrame};
use crate::transformer::TokenUsage;

/// Claude client reading a Gemini upstream.
pub struct GeminiToClaude {
    inner: GeminiToOpenAi,
    outer: OpenAiToClaude,
}

impl GeminiToClaude {
    pub fn new(model: &str) -> Self {
        Self {
            inner: GeminiToOpenAi::new(model),
            outer: OpenAiToClaude::new(model),
        }
    }
}

impl Transcoder for GeminiToClaude {
    fn stream_chunk(&mut self, event: &SseEvent) -> Vec<SseFrame> {
        if self.outer.is_complete() {
            return Vec::new();
        }
        let Some(chunk) = event.json() else {
            return Vec::new();
        };
        self.inner
            .on_chunk(&chunk)
            .iter()
            .flat_map(|openai_chunk| self.outer.on_chunk(openai_chunk))
            .collect()
    }

    fn stream_end(&mut self) -> Vec<SseFrame> {
        if self.outer.is_complete() {
            return Vec::new();
        }
        let mut frames: Vec<SseFrame> = self
            .inner
            .finish_chunks()
            .iter()
            .flat_map(|openai_chunk| self.outer.on_chunk(openai_chunk))
            .collect();
        self.outer.set_usage(self.inner.usage());
        frames.extend(self.outer.finish());
        frames
    }

    fn usage(&self) -> TokenUsage {
        self.inner.usage()
    }

    fn is_complete(&self) -> bool {
        self.outer.is_complete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformer::transcoder::test_support::*;
    use serde_json::{json, Value};

    #[test]
    fn test_gemini_function_call_to_claude_tool_use() {
        let mut t = GeminiToClaude::new("gemini-pro");
        let events = vec![
            SseEvent::new(None, json!({"candidates": [{"content": {"parts": [{"text": "Checking"}]}}]}).to_string()),
            SseEvent::new(None, json!({
                "candidates": [{"content": {"parts": [{"functionCall": {"name": "search", "args": {"q": "x"}}}]}, "finishReason": "STOP"}],
                "usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 7}
            }).to_string()),
        ];
        let frames = run(&mut t, &events);

        assert_eq!(
            event_names(&frames),
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop"
            ]
        );
        let tool_start = frames[4].payload().unwrap();
        assert_eq!(tool_start["content_block"]["name"], "search");
        let args: Value = serde_json::from_str(
            frames[5].payload().unwrap()["delta"]["partial_json"].as_str().unwrap(),
        )
        .unwrap();
        assert_eq!(args, json!({"q": "x"}));

        let delta = frames[7].payload().unwrap();
        assert_eq!(delta["delta"]["stop_reason"], "tool_use");
        assert_eq!(delta["usage"]["output_tokens"], 7);
        assert!(t.is_complete());
        assert_eq!(t.usage(), TokenUsage::new(5, 7));
    }
}
