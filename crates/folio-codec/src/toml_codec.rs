//! TOML codec.
//!
//! TOML has no null literal; nulls are stripped on encode (documented
//! format semantics). The top level must be a table.

use serde_json::{Map, Value};

use folio_core::error::{FolioError, Result};

use crate::Codec;

/// TOML codec. Strips `null` on encode.
#[derive(Debug, Clone, Default)]
pub struct TomlCodec;

impl TomlCodec {
    pub fn new() -> Self {
        Self
    }
}

/// Recursively removes null object fields and null array elements.
fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                if !v.is_null() {
                    out.insert(k, strip_nulls(v));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .filter(|v| !v.is_null())
                .map(strip_nulls)
                .collect(),
        ),
        other => other,
    }
}

impl Codec for TomlCodec {
    fn name(&self) -> &str {
        "toml"
    }

    fn extensions(&self) -> Vec<String> {
        vec!["toml".into()]
    }

    fn encode(&self, value: &Value) -> Result<String> {
        let stripped = strip_nulls(value.clone());
        if !stripped.is_object() {
            return Err(FolioError::serialization(
                "toml",
                "top-level value must be a table",
            ));
        }
        toml::to_string_pretty(&stripped)
            .map_err(|e| FolioError::serialization("toml", e.to_string()))
    }

    fn decode(&self, text: &str) -> Result<Value> {
        toml::from_str(text).map_err(|e| FolioError::serialization("toml", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn round_trip_without_nulls() {
        let codec = TomlCodec::new();
        let value = json!({"u1": {"id": "u1", "name": "Alice", "age": 33}});
        let text = codec.encode(&value).unwrap();
        assert_eq!(codec.decode(&text).unwrap(), value);
    }

    #[test]
    fn nulls_stripped_on_encode() {
        let codec = TomlCodec::new();
        let text = codec
            .encode(&json!({"u1": {"id": "u1", "nick": null}}))
            .unwrap();
        let back = codec.decode(&text).unwrap();
        assert_eq!(back, json!({"u1": {"id": "u1"}}));
    }

    #[test]
    fn non_table_top_level_rejected() {
        let codec = TomlCodec::new();
        assert!(codec.encode(&json!([1, 2])).is_err());
        assert!(codec.encode(&json!(null)).is_err());
    }
}
