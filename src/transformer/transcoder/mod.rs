//! Streaming transcoders.
//!
//! A transcoder is a per-response state machine. The streaming driver feeds
//! it the parsed upstream [`SseEvent`]s and writes back whatever
//! [`SseFrame`]s it returns, in order.
//!
//! | client \ upstream | OpenAI | Claude | Gemini |
//! |---|---|---|---|
//! | OpenAI | passthrough | [`ClaudeToOpenAi`] | [`GeminiToOpenAi`] |
//! | Claude | [`OpenAiToClaude`] | passthrough | [`GeminiToClaude`] |
//! | Gemini | [`OpenAiToGemini`] | [`ClaudeToGemini`] | passthrough |

mod claude_to_gemini;
mod claude_to_openai;
mod gemini_to_claude;
mod gemini_to_openai;
mod openai_to_claude;
mod openai_to_gemini;
mod passthrough;

pub use claude_to_gemini::ClaudeToGemini;
pub use claude_to_openai::ClaudeToOpenAi;
pub use gemini_to_claude::GeminiToClaude;
pub use gemini_to_openai::GeminiToOpenAi;
pub use openai_to_claude::OpenAiToClaude;
pub use openai_to_gemini::OpenAiToGemini;
pub use passthrough::PassthroughTranscoder;

use super::mapping::constants::ROLE_MODEL;
use super::sse::{SseEvent, SseFrame};
use super::{Protocol, TokenUsage};
use serde_json::{json, Value};

/// Streaming state machine for one upstream response.
pub trait Transcoder: Send {
    /// Frames to write before any upstream event is read.
    fn stream_start(&mut self) -> Vec<SseFrame> {
        Vec::new()
    }

    /// Translate one upstream event.
    fn stream_chunk(&mut self, event: &SseEvent) -> Vec<SseFrame>;

    /// Called once when the upstream closed cleanly.
    fn stream_end(&mut self) -> Vec<SseFrame>;

    /// Token usage accumulated so far.
    fn usage(&self) -> TokenUsage;

    /// Whether the client-protocol terminal event has been produced.
    fn is_complete(&self) -> bool;

    /// Raw upstream bytes should be forwarded instead of the returned frames.
    fn forwards_raw_bytes(&self) -> bool {
        false
    }
}

/// Pick the transcoder for a (client, upstream) pair.
///
/// `model` is the upstream model name, used when chunks do not carry one.
pub fn build_transcoder(client: Protocol, upstream: Protocol, model: &str) -> Box<dyn Transcoder> {
    match (client, upstream) {
        (Protocol::Claude, Protocol::OpenAI) => Box::new(OpenAiToClaude::new(model)),
        (Protocol::Gemini, Protocol::OpenAI) => Box::new(OpenAiToGemini::new(model)),
        (Protocol::OpenAI, Protocol::Claude) => Box::new(ClaudeToOpenAi::new(model)),
        (Protocol::Gemini, Protocol::Claude) => Box::new(ClaudeToGemini::new(model)),
        (Protocol::OpenAI, Protocol::Gemini) => Box::new(GeminiToOpenAi::new(model)),
        (Protocol::Claude, Protocol::Gemini) => Box::new(GeminiToClaude::new(model)),
        (protocol, _) => Box::new(PassthroughTranscoder::new(protocol)),
    }
}

/// Some Gemini-compatible gateways wrap chunks as `{code, data}`.
pub(crate) fn unwrap_gemini_envelope(value: &Value) -> &Value {
    match value.get("data") {
        Some(inner) if value.get("code").is_some() && inner.is_object() => inner,
        _ => value,
    }
}

/// Gemini streaming chunk with a single model turn.
pub(crate) fn gemini_chunk(parts: Vec<Value>) -> Value {
    json!({
        "candidates": [{
            "content": {"role": ROLE_MODEL, "parts": parts},
            "index": 0
        }]
    })
}

/// Final Gemini chunk, wrapped as `{code:200, data:{...}}`.
pub(crate) fn gemini_terminal_chunk(finish_reason: &str, usage: TokenUsage, model: &str) -> Value {
    json!({
        "code": 200,
        "data": {
            "candidates": [{"finishReason": finish_reason, "index": 0}],
            "usageMetadata": {
                "promptTokenCount": usage.prompt_tokens,
                "candidatesTokenCount": usage.completion_tokens,
                "totalTokenCount": usage.total()
            },
            "modelVersion": model
        }
    })
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_transcoder_passthrough() {
        for p in [Protocol::OpenAI, Protocol::Claude, Protocol::Gemini] {
            assert!(build_transcoder(p, p, "m").forwards_raw_bytes());
        }
        assert!(!build_transcoder(Protocol::Claude, Protocol::OpenAI, "m").forwards_raw_bytes());
    }

    #[test]
    fn test_unwrap_gemini_envelope() {
        let wrapped = json!({"code": 200, "data": {"candidates": []}});
        assert_eq!(unwrap_gemini_envelope(&wrapped), &json!({"candidates": []}));
        let plain = json!({"candidates": [], "data": 1});
        assert_eq!(unwrap_gemini_envelope(&plain), &plain);
    }
}
