//! Anthropic Messages ↔ OpenAI Chat Completions translation.
//!
//! Requests and non-streaming responses in both directions. Fields outside
//! the mapped set are dropped.

use super::mapping::constants::*;
use super::mapping::{
    arguments_string, claude_image_to_openai, claude_stop_to_openai,
    claude_tool_choice_to_openai, new_chat_completion_id, new_message_id, openai_content_text,
    openai_finish_to_claude, openai_image_to_claude, openai_tool_choice_to_claude,
    parse_arguments, tool_result_text, unix_timestamp,
};
use super::sanitizer::sanitize_schema;
use super::{u64_field, TransformError, TransformResult};
use serde_json::{json, Map, Value};

/// Thinking budgets used when translating OpenAI `reasoning_effort`.
const EFFORT_BUDGETS: &[(&str, u64)] = &[("low", 1024), ("medium", 8192), ("high", 24576)];

// ============================================================================
// Request: Claude -> OpenAI
// ============================================================================

/// Convert an Anthropic Messages request into an OpenAI chat request.
pub fn claude_request_to_openai(body: Value) -> TransformResult<Value> {
    let messages = body
        .get("messages")
        .and_then(Value::as_array)
        .ok_or(TransformError::MissingField("messages"))?;

    let mut openai_messages: Vec<Value> = Vec::new();

    if let Some(system) = body.get("system") {
        let system_text = system_text(system);
        if !system_text.is_empty() {
            openai_messages.push(json!({"role": ROLE_SYSTEM, "content": system_text}));
        }
    }

    for msg in messages {
        match msg.get("role").and_then(Value::as_str) {
            Some(ROLE_USER) => convert_user_message(msg, &mut openai_messages),
            Some(ROLE_ASSISTANT) => openai_messages.push(convert_assistant_message(msg)),
            _ => openai_messages.push(msg.clone()),
        }
    }

    let mut out = Map::new();
    if let Some(model) = body.get("model") {
        out.insert("model".into(), model.clone());
    }
    out.insert("messages".into(), Value::Array(openai_messages));
    for key in ["max_tokens", "temperature", "top_p", "stream"] {
        if let Some(v) = body.get(key) {
            out.insert(key.into(), v.clone());
        }
    }
    if let Some(stop) = body.get("stop_sequences") {
        out.insert("stop".into(), stop.clone());
    }
    if body.get("stream").and_then(Value::as_bool) == Some(true) {
        out.insert("stream_options".into(), json!({"include_usage": true}));
    }

    if let Some(tools) = body.get("tools").and_then(Value::as_array) {
        let openai_tools: Vec<Value> = tools.iter().filter_map(claude_tool_to_openai).collect();
        if !openai_tools.is_empty() {
            out.insert("tools".into(), Value::Array(openai_tools));
        }
    }
    if let Some(choice) = body.get("tool_choice") {
        out.insert("tool_choice".into(), claude_tool_choice_to_openai(choice));
    }

    if let Some(budget) = body
        .get("thinking")
        .filter(|t| t.get("type").and_then(Value::as_str) == Some("enabled"))
        .map(|t| u64_field(t, "budget_tokens"))
    {
        out.insert("reasoning_effort".into(), json!(effort_for_budget(budget)));
    }

    Ok(Value::Object(out))
}

/// Flatten a Claude `system` field (string or text blocks) into one string.
pub fn system_text(system: &Value) -> String {
    match system {
        Value::String(s) => s.trim().to_string(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n"),
        _ => String::new(),
    }
}

fn convert_user_message(msg: &Value, out: &mut Vec<Value>) {
    let blocks = match msg.get("content") {
        Some(Value::Array(blocks)) => blocks,
        Some(content) => {
            out.push(json!({"role": ROLE_USER, "content": content}));
            return;
        }
        None => return,
    };

    let mut parts: Vec<Value> = Vec::new();
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some(CONTENT_TOOL_RESULT) => {
                let content = block.get("content").cloned().unwrap_or(Value::Null);
                out.push(json!({
                    "role": ROLE_TOOL,
                    "tool_call_id": block.get("tool_use_id").cloned().unwrap_or(Value::Null),
                    "content": tool_result_text(&content)
                }));
            }
            Some(CONTENT_TEXT) => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    parts.push(json!({"type": "text", "text": text}));
                }
            }
            Some(CONTENT_IMAGE) => {
                if let Some(image) = claude_image_to_openai(block) {
                    parts.push(image);
                }
            }
            _ => {}
        }
    }

    if parts.is_empty() {
        return;
    }
    if parts.len() == 1 {
        if let Some(text) = parts[0].get("text").and_then(Value::as_str) {
            out.push(json!({"role": ROLE_USER, "content": text}));
            return;
        }
    }
    out.push(json!({"role": ROLE_USER, "content": parts}));
}

fn convert_assistant_message(msg: &Value) -> Value {
    let blocks = match msg.get("content") {
        Some(Value::Array(blocks)) => blocks,
        Some(content) => return json!({"role": ROLE_ASSISTANT, "content": content}),
        None => return json!({"role": ROLE_ASSISTANT, "content": ""}),
    };

    let mut text = String::new();
    let mut reasoning = String::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some(CONTENT_TEXT) => {
                text.push_str(block.get("text").and_then(Value::as_str).unwrap_or_default())
            }
            Some(CONTENT_THINKING) => reasoning
                .push_str(block.get("thinking").and_then(Value::as_str).unwrap_or_default()),
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
    message["content"] = if text.is_empty() && !tool_calls.is_empty() {
        Value::Null
    } else {
        Value::String(text)
    };
    if !reasoning.is_empty() {
        message["reasoning_content"] = Value::String(reasoning);
    }
    if !tool_calls.is_empty() {
        message["tool_calls"] = Value::Array(tool_calls);
    }
    message
}

fn claude_tool_to_openai(tool: &Value) -> Option<Value> {
    let name = tool.get("name").and_then(Value::as_str)?;
    if name.trim().is_empty() {
        return None;
    }
    let mut function = json!({
        "name": name,
        "parameters": sanitize_schema(tool.get("input_schema").unwrap_or(&Value::Null))
    });
    if let Some(desc) = tool.get("description") {
        function["description"] = desc.clone();
    }
    Some(json!({"type": TOOL_FUNCTION, TOOL_FUNCTION: function}))
}

fn effort_for_budget(budget: u64) -> &'static str {
    EFFORT_BUDGETS
        .iter()
        .find(|(_, limit)| budget <= *limit)
        .map(|(effort, _)| *effort)
        .unwrap_or("high")
}

// ============================================================================
// Request: OpenAI -> Claude
// ============================================================================

/// Convert an OpenAI chat request into an Anthropic Messages request.
pub fn openai_request_to_claude(body: Value, target_model: &str) -> TransformResult<Value> {
    let messages = body
        .get("messages")
        .and_then(Value::as_array)
        .ok_or(TransformError::MissingField("messages"))?;

    let mut system_parts: Vec<String> = Vec::new();
    let mut claude_messages: Vec<Value> = Vec::new();

    for msg in messages {
        match msg.get("role").and_then(Value::as_str) {
            Some(ROLE_SYSTEM) | Some("developer") => {
                let text = openai_content_text(msg.get("content").unwrap_or(&Value::Null));
                if !text.trim().is_empty() {
                    system_parts.push(text);
                }
            }
            Some(ROLE_TOOL) => {
                let block = json!({
                    "type": CONTENT_TOOL_RESULT,
                    "tool_use_id": msg.get("tool_call_id").cloned().unwrap_or(Value::Null),
                    "content": tool_message_text(msg)
                });
                push_tool_result(&mut claude_messages, block);
            }
            Some(ROLE_ASSISTANT) => {
                if let Some(converted) = openai_assistant_to_claude(msg) {
                    claude_messages.push(converted);
                }
            }
            _ => claude_messages.push(openai_user_to_claude(msg)),
        }
    }

    let max_tokens = body
        .get("max_tokens")
        .or_else(|| body.get("max_completion_tokens"))
        .cloned()
        .unwrap_or_else(|| json!(DEFAULT_MAX_TOKENS));

    let mut out = Map::new();
    out.insert("model".into(), json!(target_model));
    out.insert("messages".into(), Value::Array(claude_messages));
    out.insert("max_tokens".into(), max_tokens);
    if !system_parts.is_empty() {
        out.insert("system".into(), json!(system_parts.join("\n\n")));
    }
    for key in ["temperature", "top_p", "stream"] {
        if let Some(v) = body.get(key) {
            out.insert(key.into(), v.clone());
        }
    }
    match body.get("stop") {
        Some(Value::String(s)) => {
            out.insert("stop_sequences".into(), json!([s]));
        }
        Some(stop @ Value::Array(_)) => {
            out.insert("stop_sequences".into(), stop.clone());
        }
        _ => {}
    }

    if let Some(tools) = body.get("tools").and_then(Value::as_array) {
        let claude_tools: Vec<Value> = tools.iter().filter_map(openai_tool_to_claude).collect();
        if !claude_tools.is_empty() {
            out.insert("tools".into(), Value::Array(claude_tools));
        }
    }
    if let Some(choice) = body.get("tool_choice").and_then(openai_tool_choice_to_claude) {
        out.insert("tool_choice".into(), choice);
    }

    if let Some(thinking) = body.get("thinking").filter(|t| t.is_object()) {
        out.insert("thinking".into(), thinking.clone());
    } else if let Some(effort) = body.get("reasoning_effort").and_then(Value::as_str) {
        if let Some((_, budget)) = EFFORT_BUDGETS.iter().find(|(e, _)| *e == effort) {
            out.insert(
                "thinking".into(),
                json!({"type": "enabled", "budget_tokens": budget}),
            );
            let current = out.get("max_tokens").and_then(Value::as_u64).unwrap_or(0);
            if current <= *budget {
                out.insert("max_tokens".into(), json!(budget + DEFAULT_MAX_TOKENS));
            }
        }
    }

    Ok(Value::Object(out))
}

fn tool_message_text(msg: &Value) -> String {
    match msg.get("content") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(content @ Value::Array(_)) => tool_result_text(content),
        _ => EMPTY_TOOL_RESULT.to_string(),
    }
}

/// Append a tool_result block, merging into a preceding tool-result user turn.
fn push_tool_result(messages: &mut Vec<Value>, block: Value) {
    if let Some(last) = messages.last_mut() {
        let is_result_turn = last.get("role").and_then(Value::as_str) == Some(ROLE_USER)
            && last
                .get("content")
                .and_then(Value::as_array)
                .and_then(|blocks| blocks.last())
                .and_then(|b| b.get("type"))
                .and_then(Value::as_str)
                == Some(CONTENT_TOOL_RESULT);
        if is_result_turn {
            if let Some(blocks) = last.get_mut("content").and_then(Value::as_array_mut) {
                blocks.push(block);
                return;
            }
        }
    }
    messages.push(json!({"role": ROLE_USER, "content": [block]}));
}

fn openai_user_to_claude(msg: &Value) -> Value {
    let content = match msg.get("content") {
        Some(Value::Array(parts)) => Value::Array(
            parts
                .iter()
                .filter_map(|part| match part.get("type").and_then(Value::as_str) {
                    Some(CONTENT_TEXT) => Some(json!({
                        "type": CONTENT_TEXT,
                        "text": part.get("text").cloned().unwrap_or(json!(""))
                    })),
                    Some("image_url") => openai_image_to_claude(part),
                    _ => None,
                })
                .collect(),
        ),
        Some(Value::Null) | None => json!(""),
        Some(other) => other.clone(),
    };
    json!({"role": ROLE_USER, "content": content})
}

fn openai_assistant_to_claude(msg: &Value) -> Option<Value> {
    let tool_calls = msg
        .get("tool_calls")
        .and_then(Value::as_array)
        .filter(|calls| !calls.is_empty());

    let Some(tool_calls) = tool_calls else {
        return match msg.get("content") {
            Some(Value::String(s)) => Some(json!({"role": ROLE_ASSISTANT, "content": s})),
            Some(content @ Value::Array(_)) => Some(json!({
                "role": ROLE_ASSISTANT,
                "content": openai_content_text(content)
            })),
            _ => None,
        };
    };

    let mut blocks: Vec<Value> = Vec::new();
    let text = openai_content_text(msg.get("content").unwrap_or(&Value::Null));
    if !text.is_empty() {
        blocks.push(json!({"type": CONTENT_TEXT, "text": text}));
    }
    for call in tool_calls {
        let function = call.get(TOOL_FUNCTION).unwrap_or(&Value::Null);
        blocks.push(json!({
            "type": CONTENT_TOOL_USE,
            "id": call.get("id").cloned().unwrap_or(Value::Null),
            "name": function.get("name").cloned().unwrap_or(Value::Null),
            "input": parse_arguments(function.get("arguments").and_then(Value::as_str).unwrap_or(""))
        }));
    }
    Some(json!({"role": ROLE_ASSISTANT, "content": blocks}))
}

fn openai_tool_to_claude(tool: &Value) -> Option<Value> {
    let function = tool.get(TOOL_FUNCTION)?;
    let name = function.get("name").and_then(Value::as_str)?;
    let mut claude_tool = json!({
        "name": name,
        "input_schema": sanitize_schema(function.get("parameters").unwrap_or(&Value::Null))
    });
    if let Some(desc) = function.get("description") {
        claude_tool["description"] = desc.clone();
    }
    Some(claude_tool)
}

// ============================================================================
// Response: Claude -> OpenAI
// ============================================================================

/// Convert a non-streaming Anthropic response into an OpenAI chat completion.
pub fn claude_response_to_openai(body: Value) -> TransformResult<Value> {
    let content = body
        .get("content")
        .and_then(Value::as_array)
        .ok_or(TransformError::MissingField("content"))?;

    let message = convert_assistant_message(&json!({
        "role": ROLE_ASSISTANT,
        "content": content
    }));

    let finish_reason = body
        .get("stop_reason")
        .and_then(Value::as_str)
        .map(claude_stop_to_openai)
        .unwrap_or_else(|| FINISH_STOP.to_string());

    let usage = body.get("usage").unwrap_or(&Value::Null);
    let prompt_tokens = u64_field(usage, "input_tokens");
    let completion_tokens = u64_field(usage, "output_tokens");

    Ok(json!({
        "id": body.get("id").and_then(Value::as_str).map(str::to_string).unwrap_or_else(new_chat_completion_id),
        "object": "chat.completion",
        "created": unix_timestamp(),
        "model": body.get("model").cloned().unwrap_or(Value::Null),
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": finish_reason
        }],
        "usage": {
            "prompt_tokens": prompt_tokens,
            "completion_tokens": completion_tokens,
            "total_tokens": prompt_tokens + completion_tokens
        }
    }))
}

// ============================================================================
// Response: OpenAI -> Claude
// ============================================================================

/// Convert a non-streaming OpenAI chat completion into an Anthropic response.
pub fn openai_response_to_claude(body: Value) -> TransformResult<Value> {
    let choice = body
        .get("choices")
        .and_then(Value::as_array)
        .ok_or(TransformError::MissingField("choices"))?
        .first()
        .ok_or(TransformError::InvalidField {
            field: "choices",
            reason: "empty choices list".to_string(),
        })?;
    let message = choice.get("message").unwrap_or(&Value::Null);

    let mut blocks: Vec<Value> = Vec::new();
    if let Some(reasoning) = message
        .get("reasoning_content")
        .and_then(Value::as_str)
        .filter(|r| !r.is_empty())
    {
        blocks.push(json!({"type": CONTENT_THINKING, "thinking": reasoning, "signature": ""}));
    }
    let text = openai_content_text(message.get("content").unwrap_or(&Value::Null));
    if !text.is_empty() {
        blocks.push(json!({"type": CONTENT_TEXT, "text": text}));
    }
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            let function = call.get(TOOL_FUNCTION).unwrap_or(&Value::Null);
            blocks.push(json!({
                "type": CONTENT_TOOL_USE,
                "id": call.get("id").cloned().unwrap_or(Value::Null),
                "name": function.get("name").cloned().unwrap_or(Value::Null),
                "input": parse_arguments(function.get("arguments").and_then(Value::as_str).unwrap_or(""))
            }));
        }
    }
    if blocks.is_empty() {
        blocks.push(json!({"type": CONTENT_TEXT, "text": ""}));
    }

    let stop_reason = choice
        .get("finish_reason")
        .and_then(Value::as_str)
        .map(openai_finish_to_claude)
        .unwrap_or_else(|| STOP_END_TURN.to_string());

    let usage = body.get("usage").unwrap_or(&Value::Null);

    Ok(json!({
        "id": new_message_id(),
        "type": "message",
        "role": ROLE_ASSISTANT,
        "model": body.get("model").cloned().unwrap_or(Value::Null),
        "content": blocks,
        "stop_reason": stop_reason,
        "stop_sequence": null,
        "usage": {
            "input_tokens": u64_field(usage, "prompt_tokens"),
            "output_tokens": u64_field(usage, "completion_tokens")
        }
    }))
}
