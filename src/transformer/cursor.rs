//! Cursor request normalization.
//!
//! Cursor posts to the OpenAI endpoint but mixes in Anthropic shapes: flat
//! tools with `input_schema`, and `tool_use` / `tool_result` content blocks.
//! Normalization rewrites these into plain OpenAI form before the request
//! reaches an adapter.

use super::mapping::constants::*;
use super::mapping::{arguments_string, claude_image_to_openai, tool_result_text};
use super::sanitizer::sanitize_schema;
use serde_json::{json, Value};

/// Rewrite a Cursor-flavoured body into a plain OpenAI chat request.
pub fn normalize_cursor_request(mut body: Value) -> Value {
    let disable_thinking = body
        .get("messages")
        .and_then(Value::as_array)
        .is_some_and(|messages| should_disable_thinking_due_to_history(messages));

    let Some(obj) = body.as_object_mut() else {
        return body;
    };

    if let Some(Value::Array(tools)) = obj.get_mut("tools") {
        for tool in tools.iter_mut() {
            if let Some(nested) = flat_tool_to_openai(tool) {
                *tool = nested;
            }
        }
    }

    if let Some(Value::Array(messages)) = obj.remove("messages") {
        let mut out = Vec::with_capacity(messages.len());
        for msg in messages {
            normalize_message(msg, &mut out);
        }
        obj.insert("messages".to_string(), Value::Array(out));
    }

    if disable_thinking && obj.remove("thinking").is_some() {
        tracing::debug!("Stripped thinking config for incompatible tool history");
    }

    body
}

/// Whether the conversation history cannot be replayed with thinking enabled.
///
/// Providers require every assistant turn that calls tools to open with a
/// thinking block once thinking is on. A history where some tool-calling
/// assistant turn lacks one must be sent with thinking disabled.
pub fn should_disable_thinking_due_to_history(messages: &[Value]) -> bool {
    messages
        .iter()
        .filter(|msg| msg.get("role").and_then(Value::as_str) == Some(ROLE_ASSISTANT))
        .filter(|msg| has_tool_calls(msg))
        .any(|msg| !starts_with_thinking(msg))
}

fn has_tool_calls(msg: &Value) -> bool {
    let openai_calls = msg
        .get("tool_calls")
        .and_then(Value::as_array)
        .is_some_and(|calls| !calls.is_empty());
    openai_calls
        || msg
            .get("content")
            .and_then(Value::as_array)
            .is_some_and(|blocks| blocks.iter().any(|b| block_type(b) == Some(CONTENT_TOOL_USE)))
}

fn starts_with_thinking(msg: &Value) -> bool {
    msg.get("content")
        .and_then(Value::as_array)
        .and_then(|blocks| blocks.first())
        .is_some_and(|b| {
            matches!(
                block_type(b),
                Some(CONTENT_THINKING) | Some(CONTENT_REDACTED_THINKING)
            )
        })
}

fn block_type(block: &Value) -> Option<&str> {
    block.get("type").and_then(Value::as_str)
}

fn flat_tool_to_openai(tool: &Value) -> Option<Value> {
    let name = tool.get("name").and_then(Value::as_str)?;
    let schema = tool.get("input_schema")?;
    let mut function = json!({"name": name, "parameters": sanitize_schema(schema)});
    if let Some(desc) = tool.get("description") {
        function["description"] = desc.clone();
    }
    Some(json!({"type": TOOL_FUNCTION, TOOL_FUNCTION: function}))
}

fn normalize_message(msg: Value, out: &mut Vec<Value>) {
    let blocks = match msg.get("content") {
        Some(Value::Array(blocks))
            if blocks.iter().any(|b| {
                matches!(
                    block_type(b),
                    Some(CONTENT_TOOL_USE) | Some(CONTENT_TOOL_RESULT)
                )
            }) =>
        {
            blocks.clone()
        }
        _ => {
            out.push(msg);
            return;
        }
    };

    match msg.get("role").and_then(Value::as_str) {
        Some(ROLE_ASSISTANT) => out.push(assistant_blocks_to_openai(&blocks)),
        _ => user_blocks_to_openai(&blocks, out),
    }
}

fn assistant_blocks_to_openai(blocks: &[Value]) -> Value {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in blocks {
        match block_type(block) {
            Some(CONTENT_TEXT) => {
                text.push_str(block.get("text").and_then(Value::as_str).unwrap_or_default())
            }
            Some(CONTENT_TOOL_USE) => tool_calls.push(json!({
                "id": block.get("id").cloned().unwrap_or(Value::Null),
                "type": TOOL_FUNCTION,
                TOOL_FUNCTION: {
                    "name": block.get("name").cloned().unwrap_or(Value::Null),
                    "arguments": arguments_string(block.get("input").unwrap_or(&Value::Null))
                }
            })),
            _ => {}
        }
    }

    let mut message = json!({"role": ROLE_ASSISTANT});
    if !text.is_empty() {
        message["content"] = Value::String(text);
    }
    if !tool_calls.is_empty() {
        message["tool_calls"] = Value::Array(tool_calls);
    }
    message
}

fn user_blocks_to_openai(blocks: &[Value], out: &mut Vec<Value>) {
    let mut parts = Vec::new();
    for block in blocks {
        match block_type(block) {
            Some(CONTENT_TOOL_RESULT) => out.push(json!({
                "role": ROLE_TOOL,
                "tool_call_id": block.get("tool_use_id").cloned().unwrap_or(Value::Null),
                "content": tool_result_text(block.get("content").unwrap_or(&Value::Null))
            })),
            Some(CONTENT_TEXT) => parts.push(json!({
                "type": CONTENT_TEXT,
                "text": block.get("text").cloned().unwrap_or_else(|| json!(""))
            })),
            Some(CONTENT_IMAGE) => parts.extend(claude_image_to_openai(block)),
            _ => parts.push(block.clone()),
        }
    }
    if !parts.is_empty() {
        out.push(json!({"role": ROLE_USER, "content": parts}));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_normalizes_mixed_tool_history() {
        let body = json!({
            "model": "gpt-4",
            "tools": [{
                "name": "read",
                "description": "read a file",
                "input_schema": {
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {"path": {"type": "string", "title": "Path"}}
                }
            }],
            "messages": [
                {"role": "user", "content": "show /etc"},
                {"role": "assistant", "content": [{"type": "tool_use", "id": "t1", "name": "read", "input": {"path": "/etc"}}]},
                {"role": "user", "content": [{"type": "tool_result", "tool_use_id": "t1", "content": "root:x:0"}]}
            ]
        });
        let out = normalize_cursor_request(body);

        assert_eq!(
            out["tools"][0],
            json!({
                "type": "function",
                "function": {
                    "name": "read",
                    "description": "read a file",
                    "parameters": {"type": "object", "properties": {"path": {"type": "string"}}}
                }
            })
        );
        let messages = out["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], json!({"role": "user", "content": "show /etc"}));
        assert_eq!(
            messages[1],
            json!({
                "role": "assistant",
                "tool_calls": [{
                    "id": "t1",
                    "type": "function",
                    "function": {"name": "read", "arguments": "{\"path\":\"/etc\"}"}
                }]
            })
        );
        assert_eq!(
            messages[2],
            json!({"role": "tool", "tool_call_id": "t1", "content": "root:x:0"})
        );
    }

    #[test]
    fn test_tool_result_followed_by_text() {
        let body = json!({
            "messages": [{"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "t1", "content": []},
                {"type": "text", "text": "continue"}
            ]}]
        });
        let out = normalize_cursor_request(body);
        let messages = out["messages"].as_array().unwrap();
        assert_eq!(messages[0]["content"], "(empty result)");
        assert_eq!(
            messages[1],
            json!({"role": "user", "content": [{"type": "text", "text": "continue"}]})
        );
    }

    #[test]
    fn test_nested_tools_untouched() {
        let tool = json!({"type": "function", "function": {"name": "f", "parameters": {"title": "x"}}});
        let out = normalize_cursor_request(json!({"tools": [tool.clone()], "messages": []}));
        assert_eq!(out["tools"][0], tool);
    }

    #[test]
    fn test_thinking_stripped_for_incompatible_history() {
        let body = json!({
            "thinking": {"type": "enabled", "budget_tokens": 2048},
            "messages": [
                {"role": "assistant", "content": [{"type": "tool_use", "id": "t1", "name": "read", "input": {}}]}
            ]
        });
        assert!(normalize_cursor_request(body).get("thinking").is_none());
    }

    #[test]
    fn test_thinking_kept_when_history_compatible() {
        let body = json!({
            "thinking": {"type": "enabled", "budget_tokens": 2048},
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "thinking", "thinking": "hmm", "signature": "s"},
                    {"type": "tool_use", "id": "t1", "name": "read", "input": {}}
                ]}
            ]
        });
        assert!(normalize_cursor_request(body).get("thinking").is_some());
    }

    #[test]
    fn test_history_predicate() {
        assert!(!should_disable_thinking_due_to_history(&[]));
        assert!(!should_disable_thinking_due_to_history(&[
            json!({"role": "assistant", "content": "plain text"})
        ]));
        assert!(should_disable_thinking_due_to_history(&[json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{"id": "c", "type": "function", "function": {"name": "f", "arguments": "{}"}}]
        })]));
        assert!(!should_disable_thinking_due_to_history(&[json!({
            "role": "assistant",
            "content": [{"type": "redacted_thinking", "data": "x"}, {"type": "tool_use", "id": "t", "name": "f", "input": {}}]
        })]));
    }
}
