//! Plain JSON codec.

use serde_json::Value;

use folio_core::error::{FolioError, Result};

use crate::Codec;

/// Pretty-printed JSON. Nulls are preserved.
#[derive(Debug, Clone, Default)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Codec for JsonCodec {
    fn name(&self) -> &str {
        "json"
    }

    fn extensions(&self) -> Vec<String> {
        vec!["json".into()]
    }

    fn encode(&self, value: &Value) -> Result<String> {
        serde_json::to_string_pretty(value)
            .map_err(|e| FolioError::serialization("json", e.to_string()))
    }

    fn decode(&self, text: &str) -> Result<Value> {
        serde_json::from_str(text).map_err(|e| FolioError::serialization("json", e.to_string()))
    }
}
