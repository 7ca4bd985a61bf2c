//! JSON-Schema-subset validation for tool arguments.
//!
//! Covers the shapes tool descriptors actually use: object schemas with typed
//! properties, `required` lists, numeric bounds, enums, and nested arrays /
//! objects. Out-of-bounds numbers are rejected, never coerced.

use serde_json::Value;

pub fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    validate_value(schema, args, "$")
}

fn validate_value(schema: &Value, value: &Value, path: &str) -> Result<(), String> {
    let Some(schema_obj) = schema.as_object() else {
        return Ok(()); // permissive on malformed/absent schemas
    };

    if let Some(expected) = schema_obj.get("type").and_then(Value::as_str) {
        check_type(expected, value, path)?;
    }

    if let Some(allowed) = schema_obj.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(format!("{path}: value not in enum"));
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = schema_obj.get("minimum").and_then(Value::as_f64) {
            if n < min {
                return Err(format!("{path}: {n} below minimum {min}"));
            }
        }
        if let Some(max) = schema_obj.get("maximum").and_then(Value::as_f64) {
            if n > max {
                return Err(format!("{path}: {n} above maximum {max}"));
            }
        }
        if let Some(min) = schema_obj.get("exclusiveMinimum").and_then(Value::as_f64) {
            if n <= min {
                return Err(format!("{path}: {n} not above exclusive minimum {min}"));
            }
        }
        if let Some(max) = schema_obj.get("exclusiveMaximum").and_then(Value::as_f64) {
            if n >= max {
                return Err(format!("{path}: {n} not below exclusive maximum {max}"));
            }
        }
    }

    if let Some(obj) = value.as_object() {
        if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
            for name in required.iter().filter_map(Value::as_str) {
                if !obj.contains_key(name) {
                    return Err(format!("{path}: missing required field '{name}'"));
                }
            }
        }
        if let Some(props) = schema_obj.get("properties").and_then(Value::as_object) {
            for (name, prop_schema) in props {
                if let Some(field) = obj.get(name) {
                    validate_value(prop_schema, field, &format!("{path}.{name}"))?;
                }
            }
            if schema_obj.get("additionalProperties") == Some(&Value::Bool(false)) {
                for name in obj.keys() {
                    if !props.contains_key(name) {
                        return Err(format!("{path}: unexpected field '{name}'"));
                    }
                }
            }
        }
    }

    if let (Some(items), Some(arr)) = (schema_obj.get("items"), value.as_array()) {
        for (i, item) in arr.iter().enumerate() {
            validate_value(items, item, &format!("{path}[{i}]"))?;
        }
    }

    Ok(())
}

fn check_type(expected: &str, value: &Value, path: &str) -> Result<(), String> {
    let ok = match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "null" => value.is_null(),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(format!("{path}: expected {expected}, got {}", type_name(value)))
    }
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn file_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "max_lines": {"type": "integer", "minimum": 1, "maximum": 10000}
            },
            "required": ["path"]
        })
    }

    #[test]
    fn valid_args_pass() {
        let args = json!({"path": "/tmp/a.txt", "max_lines": 100});
        assert!(validate_args(&file_schema(), &args).is_ok());
    }

    #[test]
    fn missing_required_field() {
        let args = json!({"max_lines": 100});
        let err = validate_args(&file_schema(), &args).unwrap_err();
        assert!(err.contains("path"));
    }

    #[test]
    fn wrong_type_rejected() {
        let args = json!({"path": 42});
        let err = validate_args(&file_schema(), &args).unwrap_err();
        assert!(err.contains("expected string"));
    }

    #[test]
    fn float_is_not_integer() {
        let args = json!({"path": "x", "max_lines": 3.5});
        let err = validate_args(&file_schema(), &args).unwrap_err();
        assert!(err.contains("expected integer"));
    }

    #[test]
    fn numeric_bounds_enforced() {
        let args = json!({"path": "x", "max_lines": 20000});
        let err = validate_args(&file_schema(), &args).unwrap_err();
        assert!(err.contains("above maximum"));

        let args = json!({"path": "x", "max_lines": 0});
        let err = validate_args(&file_schema(), &args).unwrap_err();
        assert!(err.contains("below minimum"));
    }

    #[test]
    fn enum_membership() {
        let schema = json!({
            "type": "object",
            "properties": {"mode": {"type": "string", "enum": ["read", "write"]}},
            "required": ["mode"]
        });
        assert!(validate_args(&schema, &json!({"mode": "read"})).is_ok());
        assert!(validate_args(&schema, &json!({"mode": "append"})).is_err());
    }

    #[test]
    fn additional_properties_false() {
        let schema = json!({
            "type": "object",
            "properties": {"path": {"type": "string"}},
            "additionalProperties": false
        });
        assert!(validate_args(&schema, &json!({"path": "x"})).is_ok());
        let err = validate_args(&schema, &json!({"path": "x", "extra": 1})).unwrap_err();
        assert!(err.contains("unexpected field"));
    }

    #[test]
    fn nested_array_items() {
        let schema = json!({
            "type": "object",
            "properties": {
                "files": {"type": "array", "items": {"type": "string"}}
            }
        });
        assert!(validate_args(&schema, &json!({"files": ["a", "b"]})).is_ok());
        assert!(validate_args(&schema, &json!({"files": ["a", 2]})).is_err());
    }

    #[test]
    fn non_object_args_rejected_for_object_schema() {
        let err = validate_args(&file_schema(), &json!("not an object")).unwrap_err();
        assert!(err.contains("expected object"));
    }

    #[test]
    fn empty_schema_is_permissive() {
        assert!(validate_args(&json!({}), &json!({"anything": true})).is_ok());
    }
}
