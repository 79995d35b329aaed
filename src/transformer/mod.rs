//! Protocol translation between OpenAI Chat Completions, Anthropic Messages
//! and Google Gemini GenerateContent.
//!
//! # Architecture
//!
//! OpenAI is the pivot format. Every non-OpenAI protocol has a pair of
//! request translators and a pair of response translators to and from
//! OpenAI; any directed pair is the composition of at most two of them.
//!
//! ```text
//! client body ──[client → openai]──> pivot ──[openai → upstream]──> upstream body
//! client body <──[openai → client]── pivot <──[upstream → openai]── upstream body
//! ```
//!
//! Streaming responses go through a [`Transcoder`] chosen by the same
//! (client, upstream) pair.

pub mod claude;
pub mod cursor;
pub mod detector;
pub mod gemini;
pub mod mapping;
pub mod sanitizer;
pub mod sse;
pub mod transcoder;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub use detector::{ClientFormat, FormatDetector};
pub use sanitizer::sanitize_schema;
pub use sse::{SseEvent, SseFrame, SseParser};
pub use transcoder::Transcoder;

// ============================================================================
// Protocol
// ============================================================================

/// Supported wire protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    OpenAI,
    #[serde(alias = "anthropic")]
    Claude,
    Gemini,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::OpenAI => write!(f, "openai"),
            Protocol::Claude => write!(f, "claude"),
            Protocol::Gemini => write!(f, "gemini"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Protocol::OpenAI),
            "claude" | "anthropic" => Ok(Protocol::Claude),
            "gemini" => Ok(Protocol::Gemini),
            _ => Err(format!("Unknown protocol: {}", s)),
        }
    }
}

// ============================================================================
// Errors and usage
// ============================================================================

/// Translation failure. Only raised for missing or unusable required fields;
/// unknown fields are dropped silently.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },
}

pub type TransformResult<T> = std::result::Result<T, TransformError>;

/// Token counts normalized across protocols.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Read usage from a response body or stream chunk of any protocol.
    ///
    /// Returns `None` when the value carries no recognizable usage object.
    pub fn from_value(value: &Value) -> Option<Self> {
        let data = value.get("data").filter(|d| d.is_object()).unwrap_or(value);

        if let Some(usage) = data.get("usage").filter(|u| u.is_object()) {
            if usage.get("prompt_tokens").is_some() || usage.get("completion_tokens").is_some() {
                return Some(Self::new(
                    u64_field(usage, "prompt_tokens"),
                    u64_field(usage, "completion_tokens"),
                ));
            }
            if usage.get("input_tokens").is_some() || usage.get("output_tokens").is_some() {
                return Some(Self::new(
                    u64_field(usage, "input_tokens"),
                    u64_field(usage, "output_tokens"),
                ));
            }
        }

        // Claude message_start nests usage in the message
        if let Some(usage) = data.pointer("/message/usage").filter(|u| u.is_object()) {
            return Some(Self::new(
                u64_field(usage, "input_tokens"),
                u64_field(usage, "output_tokens"),
            ));
        }

        data.get("usageMetadata").filter(|u| u.is_object()).map(|usage| {
            Self::new(
                u64_field(usage, "promptTokenCount"),
                u64_field(usage, "candidatesTokenCount") + u64_field(usage, "thoughtsTokenCount"),
            )
        })
    }

    /// Merge a later observation: non-zero values replace earlier ones.
    pub fn merge(&mut self, other: TokenUsage) {
        if other.prompt_tokens > 0 {
            self.prompt_tokens = other.prompt_tokens;
        }
        if other.completion_tokens > 0 {
            self.completion_tokens = other.completion_tokens;
        }
    }
}

pub(crate) fn u64_field(value: &Value, key: &str) -> u64 {
    value.get(key).and_then(Value::as_u64).unwrap_or(0)
}

// ============================================================================
// Adapter
// ============================================================================

/// Translator for one directed (client, upstream) protocol pair.
pub trait Adapter: Send + Sync {
    fn client(&self) -> Protocol;

    fn upstream(&self) -> Protocol;

    /// Rewrite a client request body for the upstream, targeting `target_model`.
    fn rewrite_request(&self, body: Value, target_model: &str) -> TransformResult<Value>;

    /// Rewrite a non-streaming upstream response body for the client.
    fn rewrite_response(&self, body: Value) -> TransformResult<Value>;

    /// Fresh streaming state machine for one response.
    fn transcoder(&self, model: &str) -> Box<dyn Transcoder> {
        transcoder::build_transcoder(self.client(), self.upstream(), model)
    }
}

/// Same protocol on both sides: only the model is replaced.
pub struct PassthroughAdapter {
    protocol: Protocol,
}

impl PassthroughAdapter {
    pub fn new(protocol: Protocol) -> Self {
        Self { protocol }
    }
}

impl Adapter for PassthroughAdapter {
    fn client(&self) -> Protocol {
        self.protocol
    }

    fn upstream(&self) -> Protocol {
        self.protocol
    }

    fn rewrite_request(&self, mut body: Value, target_model: &str) -> TransformResult<Value> {
        let obj = body
            .as_object_mut()
            .ok_or(TransformError::InvalidField {
                field: "body",
                reason: "expected a JSON object".to_string(),
            })?;
        // Gemini carries the model in the URL path
        if self.protocol != Protocol::Gemini {
            obj.insert("model".to_string(), Value::String(target_model.to_string()));
        }
        Ok(body)
    }

    fn rewrite_response(&self, body: Value) -> TransformResult<Value> {
        Ok(body)
    }
}

/// Cross-protocol adapter composed through the OpenAI pivot.
pub struct PivotAdapter {
    client: Protocol,
    upstream: Protocol,
}

impl PivotAdapter {
    pub fn new(client: Protocol, upstream: Protocol) -> Self {
        Self { client, upstream }
    }
}

impl Adapter for PivotAdapter {
    fn client(&self) -> Protocol {
        self.client
    }

    fn upstream(&self) -> Protocol {
        self.upstream
    }

    fn rewrite_request(&self, body: Value, target_model: &str) -> TransformResult<Value> {
        let pivot = match self.client {
            Protocol::OpenAI => body,
            Protocol::Claude => claude::claude_request_to_openai(body)?,
            Protocol::Gemini => gemini::gemini_request_to_openai(body, target_model)?,
        };
        match self.upstream {
            Protocol::OpenAI => {
                let mut pivot = pivot;
                if let Some(obj) = pivot.as_object_mut() {
                    obj.insert("model".to_string(), Value::String(target_model.to_string()));
                }
                Ok(pivot)
            }
            Protocol::Claude => claude::openai_request_to_claude(pivot, target_model),
            Protocol::Gemini => gemini::openai_request_to_gemini(pivot),
        }
    }

    fn rewrite_response(&self, body: Value) -> TransformResult<Value> {
        let pivot = match self.upstream {
            Protocol::OpenAI => body,
            Protocol::Claude => claude::claude_response_to_openai(body)?,
            Protocol::Gemini => gemini::gemini_response_to_openai(body)?,
        };
        match self.client {
            Protocol::OpenAI => Ok(pivot),
            Protocol::Claude => claude::openai_response_to_claude(pivot),
            Protocol::Gemini => gemini::openai_response_to_gemini(pivot),
        }
    }
}

/// Lookup table of adapters keyed by (client, upstream).
pub struct AdapterRegistry {
    adapters: HashMap<(Protocol, Protocol), Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    /// Registry covering every directed pair of the three protocols.
    pub fn new() -> Self {
        let mut registry = Self {
            adapters: HashMap::new(),
        };
        let all = [Protocol::OpenAI, Protocol::Claude, Protocol::Gemini];
        for client in all {
            for upstream in all {
                if client == upstream {
                    registry.register(Arc::new(PassthroughAdapter::new(client)));
                } else {
                    registry.register(Arc::new(PivotAdapter::new(client, upstream)));
                }
            }
        }
        registry
    }

    /// Create an empty registry (for testing).
    pub fn empty() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    pub fn register(&mut self, adapter: Arc<dyn Adapter>) {
        self.adapters
            .insert((adapter.client(), adapter.upstream()), adapter);
    }

    pub fn get(&self, client: Protocol, upstream: Protocol) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(&(client, upstream)).cloned()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
