//! Check function-call arguments against a tool's JSON Schema.

use serde_json::Value;

/// Validate `args` against `schema`.
///
/// Covers the subset of JSON Schema tool declarations use: `type`,
/// `required`, `properties`, `items` and `enum`, recursing into nested
/// objects and arrays. Returns the first violation, with a path such as
/// `items[2].name`.
pub fn validate_arguments(args: &Value, schema: &Value) -> Result<(), String> {
    validate_at(args, schema, "")
}

fn validate_at(value: &Value, schema: &Value, path: &str) -> Result<(), String> {
    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if !value_matches_type(value, expected) {
            return Err(if path.is_empty() {
                format!("expected {expected} arguments, got {}", json_type_name(value))
            } else {
                format!(
                    "field '{path}' expected type '{expected}', got {}",
                    json_type_name(value)
                )
            });
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(format!("field '{path}' must be one of {}", Value::Array(allowed.clone())));
        }
    }

    if let Some(obj) = value.as_object() {
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for name in required.iter().filter_map(Value::as_str) {
                if !obj.contains_key(name) {
                    return Err(format!("missing required field '{}'", join(path, name)));
                }
            }
        }
        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (key, field) in obj {
                if let Some(field_schema) = properties.get(key) {
                    validate_at(field, field_schema, &join(path, key))?;
                }
            }
        }
    }

    if let (Some(items), Some(item_schema)) = (value.as_array(), schema.get("items")) {
        for (index, item) in items.iter().enumerate() {
            validate_at(item, item_schema, &format!("{path}[{index}]"))?;
        }
    }

    Ok(())
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn value_matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
