//! JSON-Schema sanitizer for tool parameter schemas.
//!
//! Providers reject different subsets of JSON Schema. The sanitizer drops the
//! keys known to cause rejections and collapses `anyOf` unions into their
//! first usable member. Everything else is kept.

use serde_json::{Map, Value};

/// Keys removed wherever they appear as schema keywords.
const DROPPED_KEYS: &[&str] = &["additionalProperties", "$schema", "title", "default"];

/// Keys whose values are maps from names to schemas.
const SCHEMA_MAP_KEYS: &[&str] = &["properties", "$defs", "definitions", "patternProperties"];

/// Keys holding literal data rather than schemas.
const LITERAL_KEYS: &[&str] = &["enum", "const", "examples", "required"];

/// Sanitize a tool parameter schema.
///
/// `null` becomes `{}`; any other non-object value is returned unchanged.
pub fn sanitize_schema(schema: &Value) -> Value {
    match schema {
        Value::Null => Value::Object(Map::new()),
        Value::Object(obj) => Value::Object(sanitize_object(obj)),
        other => other.clone(),
    }
}

fn sanitize_object(input: &Map<String, Value>) -> Map<String, Value> {
    let mut obj = input.clone();
    collapse_any_of(&mut obj);

    for key in DROPPED_KEYS {
        obj.remove(*key);
    }
    if obj
        .get("required")
        .and_then(Value::as_array)
        .is_some_and(|r| r.is_empty())
    {
        obj.remove("required");
    }

    let mut out = Map::with_capacity(obj.len());
    for (key, value) in obj {
        let value = if SCHEMA_MAP_KEYS.contains(&key.as_str()) {
            sanitize_schema_map(value)
        } else if LITERAL_KEYS.contains(&key.as_str()) {
            value
        } else {
            sanitize_nested(value)
        };
        out.insert(key, value);
    }
    out
}

/// Inline the first `anyOf` member that is neither a null type nor a `not`
/// constraint. Repeats while the inlined member brings its own `anyOf`.
fn collapse_any_of(obj: &mut Map<String, Value>) {
    while let Some(any_of) = obj.remove("anyOf") {
        let chosen = any_of.as_array().and_then(|members| {
            members.iter().find_map(|member| {
                let member = member.as_object()?;
                let is_null = member.get("type").and_then(Value::as_str) == Some("null");
                (!is_null && !member.contains_key("not")).then(|| member.clone())
            })
        });

        let Some(member) = chosen else {
            break;
        };
        for (key, value) in member {
            obj.entry(key).or_insert(value);
        }
    }
}

fn sanitize_schema_map(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(name, schema)| {
                    let schema = sanitize_schema(&schema);
                    (name, schema)
                })
                .collect(),
        ),
        other => other,
    }
}

fn sanitize_nested(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(sanitize_object(&map)),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| match item {
                    Value::Object(map) => Value::Object(sanitize_object(&map)),
                    other => other,
                })
                .collect(),
        ),
        other => other,
    }
}
