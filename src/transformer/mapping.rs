//! Shared vocabulary and value mappings between the three protocols.

use serde_json::{json, Value};

/// Wire constants used across adapters and transcoders.
pub mod constants {
    pub const ROLE_SYSTEM: &str = "system";
    pub const ROLE_USER: &str = "user";
    pub const ROLE_ASSISTANT: &str = "assistant";
    pub const ROLE_TOOL: &str = "tool";
    pub const ROLE_MODEL: &str = "model";

    pub const CONTENT_TEXT: &str = "text";
    pub const CONTENT_IMAGE: &str = "image";
    pub const CONTENT_THINKING: &str = "thinking";
    pub const CONTENT_REDACTED_THINKING: &str = "redacted_thinking";
    pub const CONTENT_TOOL_USE: &str = "tool_use";
    pub const CONTENT_TOOL_RESULT: &str = "tool_result";

    pub const TOOL_FUNCTION: &str = "function";

    pub const EVENT_MESSAGE_START: &str = "message_start";
    pub const EVENT_MESSAGE_DELTA: &str = "message_delta";
    pub const EVENT_MESSAGE_STOP: &str = "message_stop";
    pub const EVENT_CONTENT_BLOCK_START: &str = "content_block_start";
    pub const EVENT_CONTENT_BLOCK_DELTA: &str = "content_block_delta";
    pub const EVENT_CONTENT_BLOCK_STOP: &str = "content_block_stop";
    pub const EVENT_PING: &str = "ping";
    pub const EVENT_ERROR: &str = "error";

    pub const DELTA_TEXT: &str = "text_delta";
    pub const DELTA_THINKING: &str = "thinking_delta";
    pub const DELTA_SIGNATURE: &str = "signature_delta";
    pub const DELTA_INPUT_JSON: &str = "input_json_delta";

    pub const STOP_END_TURN: &str = "end_turn";
    pub const STOP_MAX_TOKENS: &str = "max_tokens";
    pub const STOP_TOOL_USE: &str = "tool_use";
    pub const STOP_SEQUENCE: &str = "stop_sequence";

    pub const FINISH_STOP: &str = "stop";
    pub const FINISH_LENGTH: &str = "length";
    pub const FINISH_TOOL_CALLS: &str = "tool_calls";
    pub const FINISH_CONTENT_FILTER: &str = "content_filter";

    pub const GEMINI_STOP: &str = "STOP";
    pub const GEMINI_MAX_TOKENS: &str = "MAX_TOKENS";
    pub const GEMINI_SAFETY: &str = "SAFETY";

    pub const EMPTY_TOOL_RESULT: &str = "(empty result)";
    pub const DEFAULT_MAX_TOKENS: u64 = 4096;
}

use constants::*;

// ============================================================================
// Stop reasons
// ============================================================================

/// OpenAI `finish_reason` to Claude `stop_reason`. Unknown values pass through.
pub fn openai_finish_to_claude(reason: &str) -> String {
    match reason {
        FINISH_STOP => STOP_END_TURN.to_string(),
        FINISH_LENGTH => STOP_MAX_TOKENS.to_string(),
        FINISH_TOOL_CALLS | "function_call" => STOP_TOOL_USE.to_string(),
        other => other.to_string(),
    }
}

/// Claude `stop_reason` to OpenAI `finish_reason`. Unknown values pass through.
pub fn claude_stop_to_openai(reason: &str) -> String {
    match reason {
        STOP_END_TURN | STOP_SEQUENCE => FINISH_STOP.to_string(),
        STOP_MAX_TOKENS => FINISH_LENGTH.to_string(),
        STOP_TOOL_USE => FINISH_TOOL_CALLS.to_string(),
        other => other.to_string(),
    }
}

/// OpenAI `finish_reason` to Gemini `finishReason`.
///
/// Gemini has no dedicated tool-call reason; function calls finish with `STOP`.
pub fn openai_finish_to_gemini(reason: &str) -> String {
    match reason {
        FINISH_STOP | FINISH_TOOL_CALLS | "function_call" => GEMINI_STOP.to_string(),
        FINISH_LENGTH => GEMINI_MAX_TOKENS.to_string(),
        FINISH_CONTENT_FILTER => GEMINI_SAFETY.to_string(),
        other => other.to_string(),
    }
}

/// Gemini `finishReason` to OpenAI `finish_reason`.
pub fn gemini_finish_to_openai(reason: &str) -> String {
    match reason {
        GEMINI_STOP => FINISH_STOP.to_string(),
        GEMINI_MAX_TOKENS => FINISH_LENGTH.to_string(),
        GEMINI_SAFETY | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" => {
            FINISH_CONTENT_FILTER.to_string()
        }
        other => other.to_string(),
    }
}

// ============================================================================
// tool_choice
// ============================================================================

/// Claude `tool_choice` to OpenAI. `any` becomes `required`.
pub fn claude_tool_choice_to_openai(choice: &Value) -> Value {
    match choice.get("type").and_then(Value::as_str) {
        Some("any") => json!("required"),
        Some("none") => json!("none"),
        Some("tool") => match choice.get("name").and_then(Value::as_str) {
            Some(name) => json!({"type": TOOL_FUNCTION, TOOL_FUNCTION: {"name": name}}),
            None => json!("auto"),
        },
        _ => json!("auto"),
    }
}

/// OpenAI `tool_choice` to Claude. `required` becomes `any`.
pub fn openai_tool_choice_to_claude(choice: &Value) -> Option<Value> {
    match choice {
        Value::String(s) => match s.as_str() {
            "required" => Some(json!({"type": "any"})),
            "none" => Some(json!({"type": "none"})),
            "auto" => Some(json!({"type": "auto"})),
            _ => None,
        },
        Value::Object(_) => choice
            .pointer("/function/name")
            .and_then(Value::as_str)
            .map(|name| json!({"type": "tool", "name": name})),
        _ => None,
    }
}

/// OpenAI `tool_choice` to a Gemini `toolConfig`.
pub fn openai_tool_choice_to_gemini(choice: &Value) -> Option<Value> {
    let config = match choice {
        Value::String(s) => match s.as_str() {
            "required" => json!({"mode": "ANY"}),
            "none" => json!({"mode": "NONE"}),
            "auto" => json!({"mode": "AUTO"}),
            _ => return None,
        },
        Value::Object(_) => {
            let name = choice.pointer("/function/name").and_then(Value::as_str)?;
            json!({"mode": "ANY", "allowedFunctionNames": [name]})
        }
        _ => return None,
    };
    Some(json!({"functionCallingConfig": config}))
}

/// Gemini `toolConfig` to an OpenAI `tool_choice`.
pub fn gemini_tool_config_to_openai(config: &Value) -> Option<Value> {
    let calling = config.get("functionCallingConfig")?;
    let mode = calling
        .get("mode")
        .and_then(Value::as_str)
        .unwrap_or("AUTO");
    match mode {
        "NONE" => Some(json!("none")),
        "ANY" => {
            let allowed = calling
                .get("allowedFunctionNames")
                .and_then(Value::as_array)
                .filter(|names| names.len() == 1)
                .and_then(|names| names[0].as_str());
            match allowed {
                Some(name) => Some(json!({"type": TOOL_FUNCTION, TOOL_FUNCTION: {"name": name}})),
                None => Some(json!("required")),
            }
        }
        _ => Some(json!("auto")),
    }
}

// ============================================================================
// Tool results and arguments
// ============================================================================

/// Flatten a tool result payload into the text carried by an OpenAI `tool` message.
///
/// Strings pass as-is; lists join their text blocks by newline with other
/// members JSON-encoded; anything empty becomes `(empty result)`.
pub fn tool_result_text(content: &Value) -> String {
    let text = match content {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                if item.get("type").and_then(Value::as_str) == Some(CONTENT_TEXT) {
                    item.get("text")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                } else if let Some(s) = item.as_str() {
                    s.to_string()
                } else {
                    item.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Object(obj) => {
            if obj.get("type").and_then(Value::as_str) == Some(CONTENT_TEXT) {
                obj.get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            } else {
                content.to_string()
            }
        }
        other => other.to_string(),
    };

    if text.is_empty() {
        EMPTY_TOOL_RESULT.to_string()
    } else {
        text
    }
}

/// Parse accumulated tool-call arguments into an object.
///
/// Empty or unparseable strings, and non-object JSON, become `{}`.
pub fn parse_arguments(arguments: &str) -> Value {
    match serde_json::from_str::<Value>(arguments) {
        Ok(value @ Value::Object(_)) => value,
        _ => json!({}),
    }
}

/// Serialize a tool input object the way OpenAI carries `function.arguments`.
pub fn arguments_string(input: &Value) -> String {
    match input {
        Value::Null => "{}".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Text of an OpenAI message `content`, which may be a string or a part list.
pub fn openai_content_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter(|p| p.get("type").and_then(Value::as_str) == Some(CONTENT_TEXT))
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

// ============================================================================
// Images
// ============================================================================

/// Split a `data:<mime>;base64,<data>` URL.
pub fn parse_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (meta, data) = rest.split_once(',')?;
    let mime = meta.strip_suffix(";base64")?;
    Some((mime.to_string(), data.to_string()))
}

/// Claude image block to an OpenAI `image_url` part.
pub fn claude_image_to_openai(block: &Value) -> Option<Value> {
    let source = block.get("source")?;
    let url = match source.get("type").and_then(Value::as_str) {
        Some("url") => source.get("url").and_then(Value::as_str)?.to_string(),
        _ => format!(
            "data:{};base64,{}",
            source
                .get("media_type")
                .and_then(Value::as_str)
                .unwrap_or("image/png"),
            source.get("data").and_then(Value::as_str)?
        ),
    };
    Some(json!({"type": "image_url", "image_url": {"url": url}}))
}

/// OpenAI `image_url` part to a Claude image block.
pub fn openai_image_to_claude(part: &Value) -> Option<Value> {
    let url = image_url_of(part)?;
    let source = match parse_data_url(url) {
        Some((media_type, data)) => json!({"type": "base64", "media_type": media_type, "data": data}),
        None => json!({"type": "url", "url": url}),
    };
    Some(json!({"type": CONTENT_IMAGE, "source": source}))
}

/// OpenAI `image_url` part to a Gemini part.
pub fn openai_image_to_gemini(part: &Value) -> Option<Value> {
    let url = image_url_of(part)?;
    Some(match parse_data_url(url) {
        Some((mime_type, data)) => json!({"inlineData": {"mimeType": mime_type, "data": data}}),
        None => json!({"fileData": {"fileUri": url}}),
    })
}

/// Gemini `inlineData` / `fileData` part to an OpenAI `image_url` part.
pub fn gemini_part_to_openai_image(part: &Value) -> Option<Value> {
    if let Some(inline) = part.get("inlineData") {
        let mime = inline
            .get("mimeType")
            .and_then(Value::as_str)
            .unwrap_or("image/png");
        let data = inline.get("data").and_then(Value::as_str)?;
        return Some(json!({
            "type": "image_url",
            "image_url": {"url": format!("data:{};base64,{}", mime, data)}
        }));
    }
    let uri = part.pointer("/fileData/fileUri").and_then(Value::as_str)?;
    Some(json!({"type": "image_url", "image_url": {"url": uri}}))
}

fn image_url_of(part: &Value) -> Option<&str> {
    match part.get("image_url")? {
        Value::String(s) => Some(s.as_str()),
        obj => obj.get("url").and_then(Value::as_str),
    }
}

// ============================================================================
// Identifiers
// ============================================================================

/// Claude-style message id.
pub fn new_message_id() -> String {
    let simple = uuid::Uuid::new_v4().simple().to_string();
    format!("msg_{}", &simple[..24])
}

/// OpenAI-style chat completion id.
pub fn new_chat_completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}

/// Tool call id for calls that arrive without one.
pub fn new_tool_call_id() -> String {
    let simple = uuid::Uuid::new_v4().simple().to_string();
    format!("call_{}", &simple[..24])
}

pub fn unix_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_reason_tables() {
        assert_eq!(openai_finish_to_claude("stop"), "end_turn");
        assert_eq!(openai_finish_to_claude("length"), "max_tokens");
        assert_eq!(openai_finish_to_claude("tool_calls"), "tool_use");
        assert_eq!(openai_finish_to_claude("weird"), "weird");

        assert_eq!(claude_stop_to_openai("end_turn"), "stop");
        assert_eq!(claude_stop_to_openai("stop_sequence"), "stop");
        assert_eq!(claude_stop_to_openai("max_tokens"), "length");
        assert_eq!(claude_stop_to_openai("tool_use"), "tool_calls");
        assert_eq!(claude_stop_to_openai("pause_turn"), "pause_turn");

        assert_eq!(openai_finish_to_gemini("tool_calls"), "STOP");
        assert_eq!(openai_finish_to_gemini("length"), "MAX_TOKENS");
        assert_eq!(gemini_finish_to_openai("MAX_TOKENS"), "length");
        assert_eq!(gemini_finish_to_openai("SAFETY"), "content_filter");
    }

    #[test]
    fn test_tool_choice_claude_openai() {
        assert_eq!(claude_tool_choice_to_openai(&json!({"type": "any"})), json!("required"));
        assert_eq!(claude_tool_choice_to_openai(&json!({"type": "auto"})), json!("auto"));
        assert_eq!(
            claude_tool_choice_to_openai(&json!({"type": "tool", "name": "read"})),
            json!({"type": "function", "function": {"name": "read"}})
        );
        assert_eq!(
            openai_tool_choice_to_claude(&json!("required")),
            Some(json!({"type": "any"}))
        );
        assert_eq!(
            openai_tool_choice_to_claude(&json!({"type": "function", "function": {"name": "read"}})),
            Some(json!({"type": "tool", "name": "read"}))
        );
    }

    #[test]
    fn test_tool_choice_gemini() {
        assert_eq!(
            openai_tool_choice_to_gemini(&json!({"type": "function", "function": {"name": "f"}})),
            Some(json!({"functionCallingConfig": {"mode": "ANY", "allowedFunctionNames": ["f"]}}))
        );
        assert_eq!(
            gemini_tool_config_to_openai(&json!({"functionCallingConfig": {"mode": "ANY", "allowedFunctionNames": ["f"]}})),
            Some(json!({"type": "function", "function": {"name": "f"}}))
        );
        assert_eq!(
            gemini_tool_config_to_openai(&json!({"functionCallingConfig": {"mode": "NONE"}})),
            Some(json!("none"))
        );
    }

    #[test]
    fn test_tool_result_text() {
        assert_eq!(tool_result_text(&json!("root:x:0")), "root:x:0");
        assert_eq!(tool_result_text(&json!("")), "(empty result)");
        assert_eq!(tool_result_text(&Value::Null), "(empty result)");
        assert_eq!(tool_result_text(&json!([])), "(empty result)");
        let mixed = tool_result_text(&json!([
            {"type": "text", "text": "a"},
            {"type": "image", "source": {"type": "url", "url": "u"}},
            {"type": "text", "text": "b"}
        ]));
        let lines: Vec<&str> = mixed.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "a");
        let embedded: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(embedded["type"], "image");
        assert_eq!(lines[2], "b");
    }

    #[test]
    fn test_parse_arguments() {
        assert_eq!(parse_arguments("{\"q\":\"x\"}"), json!({"q": "x"}));
        assert_eq!(parse_arguments(""), json!({}));
        assert_eq!(parse_arguments("{\"q\":"), json!({}));
        assert_eq!(parse_arguments("[1]"), json!({}));
    }

    #[test]
    fn test_images() {
        let claude = json!({"type": "image", "source": {"type": "base64", "media_type": "image/jpeg", "data": "AAA"}});
        let openai = claude_image_to_openai(&claude).unwrap();
        assert_eq!(openai["image_url"]["url"], "data:image/jpeg;base64,AAA");
        assert_eq!(openai_image_to_claude(&openai).unwrap(), claude);

        let gemini = openai_image_to_gemini(&openai).unwrap();
        assert_eq!(gemini["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(gemini_part_to_openai_image(&gemini).unwrap(), openai);

        let remote = json!({"type": "image_url", "image_url": {"url": "https://x/y.png"}});
        assert_eq!(
            openai_image_to_claude(&remote).unwrap()["source"],
            json!({"type": "url", "url": "https://x/y.png"})
        );
    }
}
