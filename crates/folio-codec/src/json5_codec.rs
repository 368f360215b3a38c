//! JSON5 codec, also covering JSONC.
//!
//! JSONC (JSON with comments and trailing commas) is a syntactic subset of
//! JSON5, so a single parser handles both extensions. Output is plain
//! pretty JSON, which is valid under both syntaxes.

use serde_json::Value;

use folio_core::error::{FolioError, Result};

use crate::Codec;

/// JSON5/JSONC codec. Nulls are preserved.
#[derive(Debug, Clone, Default)]
pub struct Json5Codec;

impl Json5Codec {
    pub fn new() -> Self {
        Self
    }
}

impl Codec for Json5Codec {
    fn name(&self) -> &str {
        "json5"
    }

    fn extensions(&self) -> Vec<String> {
        vec!["json5".into(), "jsonc".into()]
    }

    fn encode(&self, value: &Value) -> Result<String> {
        serde_json::to_string_pretty(value)
            .map_err(|e| FolioError::serialization("json5", e.to_string()))
    }

    fn decode(&self, text: &str) -> Result<Value> {
        json5::from_str(text).map_err(|e| FolioError::serialization("json5", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn round_trip() {
        let codec = Json5Codec::new();
        let value = json!({"u1": {"id": "u1", "n": 1.5, "flag": true, "x": null}});
        let text = codec.encode(&value).unwrap();
        assert_eq!(codec.decode(&text).unwrap(), value);
    }

    #[test]
    fn accepts_comments_and_trailing_commas() {
        let codec = Json5Codec::new();
        let value = codec
            .decode("{\n  // a comment\n  u1: {id: 'u1', year: 1965,},\n}")
            .unwrap();
        assert_eq!(value, json!({"u1": {"id": "u1", "year": 1965}}));
    }

    #[test]
    fn accepts_jsonc_block_comments() {
        let codec = Json5Codec::new();
        let value = codec.decode("{\"a\": 1 /* trailing */}").unwrap();
        assert_eq!(value, json!({"a": 1}));
    }
}
