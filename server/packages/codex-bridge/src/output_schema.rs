use codex_bridge_error::BridgeError;
use serde_json::{json, Map, Value};

/// Output JSON schema requested by a chat completion body, if any.
///
/// Accepts `output_schema` / `outputSchema` directly, or the OpenAI
/// `response_format` / `responseFormat` member.
pub fn resolve_output_schema(body: &Map<String, Value>) -> Result<Option<Value>, BridgeError> {
    for key in ["output_schema", "outputSchema"] {
        if let Some(schema) = body.get(key) {
            return require_object(schema, key).map(Some);
        }
    }

    let response_format = body
        .get("response_format")
        .or_else(|| body.get("responseFormat"));
    match response_format {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(format)) => match format.to_ascii_lowercase().as_str() {
            "json_schema" => Err(BridgeError::invalid_request(
                "response_format \"json_schema\" requires an accompanying schema.",
            )),
            "json_object" => Ok(Some(json!({ "type": "object" }))),
            _ => Ok(None),
        },
        Some(Value::Object(format)) => from_response_format(format),
        Some(_) => Err(BridgeError::invalid_request(
            "response_format must be an object when provided.",
        )),
    }
}

fn from_response_format(format: &Map<String, Value>) -> Result<Option<Value>, BridgeError> {
    let format_type = format
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_ascii_lowercase);
    let json_schema = format.get("json_schema").filter(|value| is_present(value));
    let schema = format.get("schema").filter(|value| is_present(value));

    if format_type.as_deref() == Some("json_schema") || json_schema.is_some() || schema.is_some() {
        let candidate = json_schema
            .and_then(|value| value.get("schema"))
            .filter(|value| is_present(value))
            .or(schema)
            .or(json_schema)
            .ok_or_else(|| {
                BridgeError::invalid_request(
                    "response_format.json_schema.schema must be provided for type=json_schema.",
                )
            })?;
        return require_object(candidate, "response_format.json_schema.schema").map(Some);
    }

    match format_type.as_deref() {
        Some("json_object") => Ok(Some(json!({ "type": "object" }))),
        None | Some("text") => Ok(None),
        Some(_) => {
            let raw = format.get("type").and_then(Value::as_str).unwrap_or_default();
            Err(BridgeError::invalid_request(format!(
                "Unsupported response_format type \"{raw}\"."
            )))
        }
    }
}

fn is_present(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
        && value.as_str().map_or(true, |text| !text.is_empty())
}

fn require_object(value: &Value, label: &str) -> Result<Value, BridgeError> {
    if value.is_object() {
        Ok(value.clone())
    } else {
        Err(BridgeError::invalid_request(format!(
            "{label} must be a JSON object."
        )))
    }
}
