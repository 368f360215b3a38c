//! HJSON codec.
//!
//! Decode accepts full HJSON syntax. HJSON is a superset of JSON, so the
//! encoder emits pretty JSON; round-trips are therefore JSON-shaped.

use serde_json::Value;

use folio_core::error::{FolioError, Result};

use crate::Codec;

/// HJSON codec. Nulls are preserved.
#[derive(Debug, Clone, Default)]
pub struct HjsonCodec;

impl HjsonCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Codec for HjsonCodec {
    fn name(&self) -> &str {
        "hjson"
    }

    fn extensions(&self) -> Vec<String> {
        vec!["hjson".into()]
    }

    fn encode(&self, value: &Value) -> Result<String> {
        serde_json::to_string_pretty(value)
            .map_err(|e| FolioError::serialization("hjson", e.to_string()))
    }

    fn decode(&self, text: &str) -> Result<Value> {
        deser_hjson::from_str(text).map_err(|e| FolioError::serialization("hjson", e.to_string()))
    }
}
