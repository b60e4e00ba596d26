//! Structured-output extraction and validation (§4.3): locate the first
//! balanced JSON object in a model response and validate it against the
//! task's response schema.

use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("no balanced JSON object found in response")]
    NotFound,
    #[error("response did not parse as JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("response did not validate against schema: {0}")]
    Invalid(String),
}

pub fn extract_and_validate(raw: &str, schema: &Value) -> Result<Value, SchemaError> {
    let candidate = find_first_balanced_object(raw).ok_or(SchemaError::NotFound)?;
    let value: Value = serde_json::from_str(&candidate)?;

    let compiled = jsonschema::JSONSchema::compile(schema)
        .map_err(|e| SchemaError::Invalid(e.to_string()))?;
    if let Err(errors) = compiled.validate(&value) {
        let message = errors
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(SchemaError::Invalid(message));
    }

    Ok(value)
}

/// Scans for the first `{ ... }` span with balanced braces, ignoring braces
/// that appear inside string literals.
fn find_first_balanced_object(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..=offset].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

pub fn repair_prompt(original_prompt: &str, bad_response: &str) -> String {
    format!(
        "Your previous response did not match the required JSON shape.\n\
         Original instructions:\n{original_prompt}\n\n\
         Your previous response was:\n{bad_response}\n\n\
         Re-emit ONLY a single valid JSON object matching the required schema, with no extra text."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_balanced_object_amid_prose() {
        let text = "Sure, here you go: {\"a\": 1, \"b\": {\"c\": 2}} Hope that helps!";
        let found = find_first_balanced_object(text).unwrap();
        assert_eq!(found, r#"{"a": 1, "b": {"c": 2}}"#);
    }

    #[test]
    fn ignores_braces_inside_strings() {
        let text = r#"{"note": "a { stray brace"}"#;
        let found = find_first_balanced_object(text).unwrap();
        assert_eq!(found, text);
    }

    #[test]
    fn validates_against_schema() {
        let schema = serde_json::json!({
            "type": "object",
            "required": ["risk_score"],
            "properties": {"risk_score": {"type": "number"}}
        });
        let raw = "here: {\"risk_score\": 0.5}";
        let value = extract_and_validate(raw, &schema).unwrap();
        assert_eq!(value["risk_score"], 0.5);
    }

    #[test]
    fn rejects_schema_mismatch() {
        let schema = serde_json::json!({
            "type": "object",
            "required": ["risk_score"],
            "properties": {"risk_score": {"type": "number"}}
        });
        let raw = "{\"risk_score\": \"not a number\"}";
        assert!(extract_and_validate(raw, &schema).is_err());
    }
}
