//! Format detection for incoming request bodies.
//!
//! The endpoint already fixes the client protocol; detection only decides
//! whether an OpenAI-endpoint body is really a Cursor-style mix of OpenAI
//! and Anthropic shapes.

use super::mapping::constants::{CONTENT_TOOL_RESULT, CONTENT_TOOL_USE};
use serde_json::Value;

/// Shape of a request body as seen by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientFormat {
    OpenAI,
    Claude,
    Gemini,
    /// OpenAI envelope carrying flat tools or Anthropic content blocks
    Cursor,
}

impl std::fmt::Display for ClientFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientFormat::OpenAI => write!(f, "openai"),
            ClientFormat::Claude => write!(f, "claude"),
            ClientFormat::Gemini => write!(f, "gemini"),
            ClientFormat::Cursor => write!(f, "cursor"),
        }
    }
}

/// Detector for classifying a request body by its structure.
pub struct FormatDetector;

impl FormatDetector {
    /// Classify a parsed request body.
    ///
    /// Priority order:
    /// 1. A tool with top-level `name` and `input_schema` → Cursor
    /// 2. A message whose content list holds `tool_use`/`tool_result` → Cursor
    /// 3. A top-level `system` field → Claude
    /// 4. Otherwise OpenAI, whether or not messages carry `tool_calls`
    ///
    /// Gemini bodies are never self-detected; their endpoint tags them.
    pub fn detect(body: &Value) -> ClientFormat {
        if Self::has_flat_tools(body) || Self::has_anthropic_tool_blocks(body) {
            return ClientFormat::Cursor;
        }

        if body.get("system").is_some() {
            return ClientFormat::Claude;
        }

        ClientFormat::OpenAI
    }

    fn has_flat_tools(body: &Value) -> bool {
        body.get("tools")
            .and_then(Value::as_array)
            .is_some_and(|tools| {
                tools
                    .iter()
                    .any(|tool| tool.get("name").is_some() && tool.get("input_schema").is_some())
            })
    }

    fn has_anthropic_tool_blocks(body: &Value) -> bool {
        body.get("messages")
            .and_then(Value::as_array)
            .is_some_and(|messages| {
                messages.iter().any(|msg| {
                    msg.get("content")
                        .and_then(Value::as_array)
                        .is_some_and(|blocks| {
                            blocks.iter().any(|block| {
                                matches!(
                                    block.get("type").and_then(Value::as_str),
                                    Some(CONTENT_TOOL_USE) | Some(CONTENT_TOOL_RESULT)
                                )
                            })
                        })
                })
            })
    }
}
