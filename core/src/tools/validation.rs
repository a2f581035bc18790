use serde_json::Value;

/// Checks tool arguments against the tool's JSON Schema and reports every
/// violation, joined by `; `.
///
/// Arguments must be an object. Optional top-level keys set to `null` are
/// treated as absent.
pub fn validate_arguments(args: &Value, schema: &Value) -> Result<(), String> {
    let object = args
        .as_object()
        .ok_or_else(|| format!("arguments must be a JSON object, got {}", type_name(args)))?;

    let validator =
        jsonschema::Validator::new(schema).map_err(|e| format!("invalid tool schema: {e}"))?;

    let required = required_keys(schema);
    let mut present = object.clone();
    present.retain(|key, value| !value.is_null() || required.contains(&key.as_str()));
    let present = Value::Object(present);

    if validator.is_valid(&present) {
        return Ok(());
    }
    let errors: Vec<String> = validator
        .iter_errors(&present)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{e} at {path}")
            }
        })
        .collect();
    Err(errors.join("; "))
}

fn required_keys(schema: &Value) -> Vec<&str> {
    schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|r| r.iter().filter_map(|k| k.as_str()).collect())
        .unwrap_or_default()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
