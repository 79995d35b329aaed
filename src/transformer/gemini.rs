//! Google Gemini GenerateContent ↔ OpenAI Chat Completions translation.
//!
//! Gemini has no tool call ids. Calls coming out of Gemini get generated
//! ids; function responses going back are matched to calls by name in
//! call order.

use super::mapping::constants::*;
use super::mapping::{
    gemini_finish_to_openai, gemini_part_to_openai_image, gemini_tool_config_to_openai,
    new_chat_completion_id, new_tool_call_id, openai_content_text, openai_finish_to_gemini,
    openai_image_to_gemini, openai_tool_choice_to_gemini, parse_arguments, unix_timestamp,
};
use super::sanitizer::sanitize_schema;
use super::{u64_field, TokenUsage, TransformError, TransformResult};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};

/// Thinking budgets used for OpenAI `reasoning_effort`.
const EFFORT_BUDGETS: &[(&str, u64)] = &[("low", 1024), ("medium", 8192), ("high", 24576)];

// ============================================================================
// Request: Gemini -> OpenAI
// ============================================================================

/// Convert a Gemini GenerateContent request into an OpenAI chat request.
pub fn gemini_request_to_openai(body: Value, target_model: &str) -> TransformResult<Value> {
    let contents = body
        .get("contents")
        .and_then(Value::as_array)
        .ok_or(TransformError::MissingField("contents"))?;

    let mut messages: Vec<Value> = Vec::new();

    let system = body
        .get("systemInstruction")
        .or_else(|| body.get("system_instruction"))
        .map(parts_text)
        .unwrap_or_default();
    if !system.is_empty() {
        messages.push(json!({"role": ROLE_SYSTEM, "content": system}));
    }

    // Pending call ids per function name, consumed by functionResponse parts
    let mut pending_ids: HashMap<String, VecDeque<String>> = HashMap::new();

    for content in contents {
        let role = content.get("role").and_then(Value::as_str).unwrap_or(ROLE_USER);
        let parts = content
            .get("parts")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        if role == ROLE_MODEL {
            messages.push(model_turn_to_openai(parts, &mut pending_ids));
        } else {
            user_turn_to_openai(parts, &mut pending_ids, &mut messages);
        }
    }

    let mut out = Map::new();
    out.insert("model".into(), json!(target_model));
    out.insert("messages".into(), Value::Array(messages));

    if let Some(config) = body.get("generationConfig") {
        for (from, to) in [
            ("temperature", "temperature"),
            ("topP", "top_p"),
            ("maxOutputTokens", "max_tokens"),
            ("stopSequences", "stop"),
        ] {
            if let Some(v) = config.get(from) {
                out.insert(to.into(), v.clone());
            }
        }
    }

    let tools: Vec<Value> = body
        .get("tools")
        .and_then(Value::as_array)
        .map(|tools| {
            tools
                .iter()
                .filter_map(|t| t.get("functionDeclarations").and_then(Value::as_array))
                .flatten()
                .filter_map(declaration_to_openai)
                .collect()
        })
        .unwrap_or_default();
    if !tools.is_empty() {
        out.insert("tools".into(), Value::Array(tools));
    }
    if let Some(choice) = body.get("toolConfig").and_then(gemini_tool_config_to_openai) {
        out.insert("tool_choice".into(), choice);
    }

    Ok(Value::Object(out))
}

/// Concatenated text of a `{parts:[{text}]}` object.
fn parts_text(content: &Value) -> String {
    content
        .get("parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

fn model_turn_to_openai(
    parts: &[Value],
    pending_ids: &mut HashMap<String, VecDeque<String>>,
) -> Value {
    let mut text = String::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    for part in parts {
        if let Some(call) = part.get("functionCall") {
            let name = call.get("name").and_then(Value::as_str).unwrap_or_default();
            let id = call
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(new_tool_call_id);
            pending_ids
                .entry(name.to_string())
                .or_default()
                .push_back(id.clone());
            let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
            tool_calls.push(json!({
                "id": id,
                "type": TOOL_FUNCTION,
                TOOL_FUNCTION: {"name": name, "arguments": args.to_string()}
            }));
        } else if part.get("thought").and_then(Value::as_bool) == Some(true) {
            continue;
        } else if let Some(t) = part.get("text").and_then(Value::as_str) {
            text.push_str(t);
        }
    }

    let mut message = json!({"role": ROLE_ASSISTANT});
    message["content"] = if text.is_empty() && !tool_calls.is_empty() {
        Value::Null
    } else {
        Value::String(text)
    };
    if !tool_calls.is_empty() {
        message["tool_calls"] = Value::Array(tool_calls);
    }
    message
}

fn user_turn_to_openai(
    parts: &[Value],
    pending_ids: &mut HashMap<String, VecDeque<String>>,
    out: &mut Vec<Value>,
) {
    let mut content_parts: Vec<Value> = Vec::new();

    for part in parts {
        if let Some(response) = part.get("functionResponse") {
            let name = response.get("name").and_then(Value::as_str).unwrap_or_default();
            let id = response
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| pending_ids.get_mut(name).and_then(VecDeque::pop_front))
                .unwrap_or_else(new_tool_call_id);
            let payload = response.get("response").cloned().unwrap_or(Value::Null);
            let content = match payload {
                Value::String(s) => s,
                Value::Null => EMPTY_TOOL_RESULT.to_string(),
                other => other.to_string(),
            };
            out.push(json!({"role": ROLE_TOOL, "tool_call_id": id, "content": content}));
        } else if let Some(t) = part.get("text").and_then(Value::as_str) {
            content_parts.push(json!({"type": CONTENT_TEXT, "text": t}));
        } else if let Some(image) = gemini_part_to_openai_image(part) {
            content_parts.push(image);
        }
    }

    if content_parts.is_empty() {
        return;
    }
    let all_text = content_parts
        .iter()
        .all(|p| p.get("type").and_then(Value::as_str) == Some(CONTENT_TEXT));
    let content = if all_text {
        Value::String(openai_content_text(&Value::Array(content_parts)))
    } else {
        Value::Array(content_parts)
    };
    out.push(json!({"role": ROLE_USER, "content": content}));
}

fn declaration_to_openai(decl: &Value) -> Option<Value> {
    let name = decl.get("name").and_then(Value::as_str)?;
    let schema = decl
        .get("parameters")
        .or_else(|| decl.get("parametersJsonSchema"))
        .unwrap_or(&Value::Null);
    let mut function = json!({"name": name, "parameters": sanitize_schema(schema)});
    if let Some(desc) = decl.get("description") {
        function["description"] = desc.clone();
    }
    Some(json!({"type": TOOL_FUNCTION, TOOL_FUNCTION: function}))
}

// ============================================================================
// Request: OpenAI -> Gemini
// ============================================================================

/// Convert an OpenAI chat request into a Gemini GenerateContent request.
///
/// The model and the streaming mode travel in the URL, not in the body.
/// System messages are prepended into the first user turn.
pub fn openai_request_to_gemini(body: Value) -> TransformResult<Value> {
    let messages = body
        .get("messages")
        .and_then(Value::as_array)
        .ok_or(TransformError::MissingField("messages"))?;

    let mut system_parts: Vec<String> = Vec::new();
    let mut contents: Vec<Value> = Vec::new();
    let mut call_names: HashMap<String, String> = HashMap::new();

    for msg in messages {
        match msg.get("role").and_then(Value::as_str) {
            Some(ROLE_SYSTEM) | Some("developer") => {
                let text = openai_content_text(msg.get("content").unwrap_or(&Value::Null));
                if !text.trim().is_empty() {
                    system_parts.push(text);
                }
            }
            Some(ROLE_ASSISTANT) => {
                let parts = assistant_parts(msg, &mut call_names);
                if !parts.is_empty() {
                    push_content(&mut contents, ROLE_MODEL, parts);
                }
            }
            Some(ROLE_TOOL) => {
                let id = msg
                    .get("tool_call_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let name = call_names.get(id).cloned().unwrap_or_else(|| id.to_string());
                let part = json!({
                    "functionResponse": {
                        "name": name,
                        "response": tool_response_object(msg.get("content").unwrap_or(&Value::Null))
                    }
                });
                push_content(&mut contents, ROLE_USER, vec![part]);
            }
            _ => {
                let parts = user_parts(msg.get("content").unwrap_or(&Value::Null));
                if !parts.is_empty() {
                    push_content(&mut contents, ROLE_USER, parts);
                }
            }
        }
    }

    if !system_parts.is_empty() {
        let system_part = json!({"text": system_parts.join("\n\n")});
        match contents
            .iter_mut()
            .find(|c| c.get("role").and_then(Value::as_str) == Some(ROLE_USER))
            .and_then(|c| c.get_mut("parts"))
            .and_then(Value::as_array_mut)
        {
            Some(parts) => parts.insert(0, system_part),
            None => contents.insert(0, json!({"role": ROLE_USER, "parts": [system_part]})),
        }
    }

    let mut out = Map::new();
    out.insert("contents".into(), Value::Array(contents));

    let mut config = Map::new();
    for (from, to) in [("temperature", "temperature"), ("top_p", "topP")] {
        if let Some(v) = body.get(from) {
            config.insert(to.into(), v.clone());
        }
    }
    if let Some(max) = body
        .get("max_tokens")
        .or_else(|| body.get("max_completion_tokens"))
    {
        config.insert("maxOutputTokens".into(), max.clone());
    }
    match body.get("stop") {
        Some(Value::String(s)) => {
            config.insert("stopSequences".into(), json!([s]));
        }
        Some(stop @ Value::Array(_)) => {
            config.insert("stopSequences".into(), stop.clone());
        }
        _ => {}
    }
    if let Some(effort) = body.get("reasoning_effort").and_then(Value::as_str) {
        if let Some((_, budget)) = EFFORT_BUDGETS.iter().find(|(e, _)| *e == effort) {
            config.insert(
                "thinkingConfig".into(),
                json!({"thinkingBudget": budget, "includeThoughts": true}),
            );
        }
    }
    if !config.is_empty() {
        out.insert("generationConfig".into(), Value::Object(config));
    }

    if let Some(tools) = body.get("tools").and_then(Value::as_array) {
        let declarations: Vec<Value> = tools
            .iter()
            .filter_map(|tool| {
                let function = tool.get(TOOL_FUNCTION)?;
                let name = function.get("name").and_then(Value::as_str)?;
                let mut decl = json!({
                    "name": name,
                    "parameters": sanitize_schema(function.get("parameters").unwrap_or(&Value::Null))
                });
                if let Some(desc) = function.get("description") {
                    decl["description"] = desc.clone();
                }
                Some(decl)
            })
            .collect();
        if !declarations.is_empty() {
            out.insert(
                "tools".into(),
                json!([{"functionDeclarations": declarations}]),
            );
        }
    }
    if let Some(config) = body.get("tool_choice").and_then(openai_tool_choice_to_gemini) {
        out.insert("toolConfig".into(), config);
    }

    Ok(Value::Object(out))
}

/// Append parts to the last content when it has the same role.
fn push_content(contents: &mut Vec<Value>, role: &str, parts: Vec<Value>) {
    if let Some(last) = contents.last_mut() {
        if last.get("role").and_then(Value::as_str) == Some(role) {
            if let Some(existing) = last.get_mut("parts").and_then(Value::as_array_mut) {
                existing.extend(parts);
                return;
            }
        }
    }
    contents.push(json!({"role": role, "parts": parts}));
}

fn user_parts(content: &Value) -> Vec<Value> {
    match content {
        Value::String(s) if !s.is_empty() => vec![json!({"text": s})],
        Value::Array(items) => items
            .iter()
            .filter_map(|part| match part.get("type").and_then(Value::as_str) {
                Some(CONTENT_TEXT) => part
                    .get("text")
                    .and_then(Value::as_str)
                    .map(|t| json!({"text": t})),
                Some("image_url") => openai_image_to_gemini(part),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn assistant_parts(msg: &Value, call_names: &mut HashMap<String, String>) -> Vec<Value> {
    let mut parts = Vec::new();
    let text = openai_content_text(msg.get("content").unwrap_or(&Value::Null));
    if !text.is_empty() {
        parts.push(json!({"text": text}));
    }
    if let Some(calls) = msg.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            let function = call.get(TOOL_FUNCTION).unwrap_or(&Value::Null);
            let name = function.get("name").and_then(Value::as_str).unwrap_or_default();
            if let Some(id) = call.get("id").and_then(Value::as_str) {
                call_names.insert(id.to_string(), name.to_string());
            }
            let args = parse_arguments(function.get("arguments").and_then(Value::as_str).unwrap_or(""));
            parts.push(json!({"functionCall": {"name": name, "args": args}}));
        }
    }
    parts
}

/// Gemini requires `functionResponse.response` to be an object.
fn tool_response_object(content: &Value) -> Value {
    let text = match content {
        Value::String(s) => s.clone(),
        Value::Array(_) => openai_content_text(content),
        _ => String::new(),
    };
    match serde_json::from_str::<Value>(&text) {
        Ok(obj @ Value::Object(_)) => obj,
        _ if text.is_empty() => json!({"content": EMPTY_TOOL_RESULT}),
        _ => json!({"content": text}),
    }
}

// ============================================================================
// Response: Gemini -> OpenAI
// ============================================================================

/// Convert a non-streaming Gemini response into an OpenAI chat completion.
pub fn gemini_response_to_openai(body: Value) -> TransformResult<Value> {
    let candidate = body
        .get("candidates")
        .and_then(Value::as_array)
        .ok_or(TransformError::MissingField("candidates"))?
        .first()
        .cloned()
        .unwrap_or(Value::Null);

    let parts = candidate
        .pointer("/content/parts")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut text = String::new();
    let mut reasoning = String::new();
    let mut tool_calls: Vec<Value> = Vec::new();
    for part in &parts {
        if let Some(call) = part.get("functionCall") {
            let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
            tool_calls.push(json!({
                "id": call.get("id").and_then(Value::as_str).map(str::to_string).unwrap_or_else(new_tool_call_id),
                "type": TOOL_FUNCTION,
                TOOL_FUNCTION: {
                    "name": call.get("name").cloned().unwrap_or(Value::Null),
                    "arguments": args.to_string()
                }
            }));
        } else if let Some(t) = part.get("text").and_then(Value::as_str) {
            if part.get("thought").and_then(Value::as_bool) == Some(true) {
                reasoning.push_str(t);
            } else {
                text.push_str(t);
            }
        }
    }

    let finish_reason = if !tool_calls.is_empty() {
        FINISH_TOOL_CALLS.to_string()
    } else {
        candidate
            .get("finishReason")
            .and_then(Value::as_str)
            .map(gemini_finish_to_openai)
            .unwrap_or_else(|| FINISH_STOP.to_string())
    };

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

    let usage = TokenUsage::from_value(&body).unwrap_or_default();

    Ok(json!({
        "id": body.get("responseId").and_then(Value::as_str).map(str::to_string).unwrap_or_else(new_chat_completion_id),
        "object": "chat.completion",
        "created": unix_timestamp(),
        "model": body.get("modelVersion").cloned().unwrap_or(Value::Null),
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": finish_reason
        }],
        "usage": {
            "prompt_tokens": usage.prompt_tokens,
            "completion_tokens": usage.completion_tokens,
            "total_tokens": usage.total()
        }
    }))
}

// ============================================================================
// Response: OpenAI -> Gemini
// ============================================================================

/// Convert a non-streaming OpenAI chat completion into a Gemini response.
pub fn openai_response_to_gemini(body: Value) -> TransformResult<Value> {
    let choice = body
        .get("choices")
        .and_then(Value::as_array)
        .ok_or(TransformError::MissingField("choices"))?
        .first()
        .cloned()
        .unwrap_or(Value::Null);
    let message = choice.get("message").cloned().unwrap_or(Value::Null);

    let mut parts: Vec<Value> = Vec::new();
    if let Some(reasoning) = message
        .get("reasoning_content")
        .and_then(Value::as_str)
        .filter(|r| !r.is_empty())
    {
        parts.push(json!({"text": reasoning, "thought": true}));
    }
    let text = openai_content_text(message.get("content").unwrap_or(&Value::Null));
    if !text.is_empty() {
        parts.push(json!({"text": text}));
    }
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            let function = call.get(TOOL_FUNCTION).unwrap_or(&Value::Null);
            parts.push(json!({
                "functionCall": {
                    "name": function.get("name").cloned().unwrap_or(Value::Null),
                    "args": parse_arguments(function.get("arguments").and_then(Value::as_str).unwrap_or(""))
                }
            }));
        }
    }
    if parts.is_empty() {
        parts.push(json!({"text": ""}));
    }

    let finish_reason = choice
        .get("finish_reason")
        .and_then(Value::as_str)
        .map(openai_finish_to_gemini)
        .unwrap_or_else(|| GEMINI_STOP.to_string());

    let usage = body.get("usage").unwrap_or(&Value::Null);
    let prompt = u64_field(usage, "prompt_tokens");
    let completion = u64_field(usage, "completion_tokens");

    Ok(json!({
        "candidates": [{
            "content": {"role": ROLE_MODEL, "parts": parts},
            "finishReason": finish_reason,
            "index": 0
        }],
        "usageMetadata": {
            "promptTokenCount": prompt,
            "candidatesTokenCount": completion,
            "totalTokenCount": prompt + completion
        },
        "modelVersion": body.get("model").cloned().unwrap_or(Value::Null)
    }))
}
