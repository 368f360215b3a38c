//! JSONL (JSON Lines) codec.
//!
//! An array encodes one element per line; encoding a non-array falls back
//! to a single line. Decode parses each non-empty line: a single line
//! yields that value as-is, multiple lines yield an array, so both encode
//! shapes round-trip.

use serde_json::Value;

use folio_core::error::{FolioError, Result};

use crate::Codec;

/// JSONL codec. Nulls are preserved.
#[derive(Debug, Clone, Default)]
pub struct JsonlCodec;

impl JsonlCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Codec for JsonlCodec {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn extensions(&self) -> Vec<String> {
        vec!["jsonl".into(), "ndjson".into()]
    }

    fn encode(&self, value: &Value) -> Result<String> {
        let mut out = String::new();
        match value {
            Value::Array(items) => {
                for item in items {
                    out.push_str(
                        &serde_json::to_string(item)
                            .map_err(|e| FolioError::serialization("jsonl", e.to_string()))?,
                    );
                    out.push('\n');
                }
            }
            other => {
                out.push_str(
                    &serde_json::to_string(other)
                        .map_err(|e| FolioError::serialization("jsonl", e.to_string()))?,
                );
                out.push('\n');
            }
        }
        Ok(out)
    }

    fn decode(&self, text: &str) -> Result<Value> {
        let mut values = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(trimmed).map_err(|e| {
                FolioError::serialization("jsonl", format!("line {}: {e}", index + 1))
            })?;
            values.push(value);
        }
        if values.len() == 1 {
            Ok(values.pop().expect("one element was just checked"))
        } else {
            Ok(Value::Array(values))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn array_one_element_per_line() {
        let codec = JsonlCodec::new();
        let value = json!([{"id": "a"}, {"id": "b"}]);
        let text = codec.encode(&value).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert_eq!(codec.decode(&text).unwrap(), value);
    }

    #[test]
    fn non_array_single_line() {
        let codec = JsonlCodec::new();
        let value = json!({"_version": 1, "a": {"id": "a"}});
        let text = codec.encode(&value).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert_eq!(codec.decode(&text).unwrap(), value);
    }

    #[test]
    fn decode_skips_blank_lines() {
        let codec = JsonlCodec::new();
        let value = codec.decode("{\"id\":\"a\"}\n\n{\"id\":\"b\"}\n").unwrap();
        assert_eq!(value, json!([{"id": "a"}, {"id": "b"}]));
    }

    #[test]
    fn decode_reports_line_number_on_error() {
        let codec = JsonlCodec::new();
        let err = codec.decode("{\"id\":\"a\"}\nnot-json\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
