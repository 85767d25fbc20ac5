//! Validation of tool arguments against the declarative input schema each
//! tool publishes in its descriptor. Runs before dispatch so a handler
//! never sees (and never fetches on behalf of) malformed arguments.

use serde_json::Value;

use crate::errors::{AgentError, AgentResult};

/// Check `arguments` against an object schema: required fields, property
/// types, enum membership, numeric minimum/maximum, string min/maxLength.
/// Fields without a declared property schema are passed through untouched.
pub fn validate(schema: &Value, arguments: &Value) -> AgentResult<()> {
    if schema.get("type").and_then(|t| t.as_str()) != Some("object") {
        return Ok(());
    }

    let args = match arguments {
        Value::Object(map) => map,
        Value::Null => return check_required(schema, &serde_json::Map::new()),
        _ => {
            return Err(AgentError::InvalidParameters(
                "arguments must be an object".to_string(),
            ))
        }
    };

    check_required(schema, args)?;

    let properties = match schema.get("properties").and_then(|p| p.as_object()) {
        Some(properties) => properties,
        None => return Ok(()),
    };

    for (name, value) in args {
        if let Some(property) = properties.get(name) {
            validate_property(name, property, value)?;
        }
    }

    Ok(())
}

fn check_required(schema: &Value, args: &serde_json::Map<String, Value>) -> AgentResult<()> {
    let required = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|fields| fields.iter().filter_map(|f| f.as_str()))
        .into_iter()
        .flatten();

    for field in required {
        if !args.contains_key(field) {
            return Err(AgentError::InvalidParameters(format!(
                "missing required field `{}`",
                field
            )));
        }
    }
    Ok(())
}

fn validate_property(name: &str, property: &Value, value: &Value) -> AgentResult<()> {
    if let Some(expected) = property.get("type").and_then(|t| t.as_str()) {
        let matches = match expected {
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => true,
        };
        if !matches {
            return Err(AgentError::InvalidParameters(format!(
                "field `{}` must be of type {}",
                name, expected
            )));
        }
    }

    if let Some(allowed) = property.get("enum").and_then(|e| e.as_array()) {
        if !allowed.contains(value) {
            return Err(AgentError::InvalidParameters(format!(
                "field `{}` must be one of the declared enum values",
                name
            )));
        }
    }

    if let Some(number) = value.as_f64() {
        if let Some(minimum) = property.get("minimum").and_then(|m| m.as_f64()) {
            if number < minimum {
                return Err(AgentError::InvalidParameters(format!(
                    "field `{}` must be >= {}",
                    name, minimum
                )));
            }
        }
        if let Some(maximum) = property.get("maximum").and_then(|m| m.as_f64()) {
            if number > maximum {
                return Err(AgentError::InvalidParameters(format!(
                    "field `{}` must be <= {}",
                    name, maximum
                )));
            }
        }
    }

    if let Some(text) = value.as_str() {
        let length = text.chars().count() as u64;
        if let Some(min_length) = property.get("minLength").and_then(|m| m.as_u64()) {
            if length < min_length {
                return Err(AgentError::InvalidParameters(format!(
                    "field `{}` must be at least {} characters",
                    name, min_length
                )));
            }
        }
        if let Some(max_length) = property.get("maxLength").and_then(|m| m.as_u64()) {
            if length > max_length {
                return Err(AgentError::InvalidParameters(format!(
                    "field `{}` must be at most {} characters",
                    name, max_length
                )));
            }
        }
    }

    Ok(())
}
