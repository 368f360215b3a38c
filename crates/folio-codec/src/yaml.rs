//! YAML codec.

use serde_json::Value;

use folio_core::error::{FolioError, Result};

use crate::Codec;

/// YAML codec. Nulls are preserved.
#[derive(Debug, Clone, Default)]
pub struct YamlCodec;

impl YamlCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Codec for YamlCodec {
    fn name(&self) -> &str {
        "yaml"
    }

    fn extensions(&self) -> Vec<String> {
        vec!["yaml".into(), "yml".into()]
    }

    fn encode(&self, value: &Value) -> Result<String> {
        serde_yaml::to_string(value).map_err(|e| FolioError::serialization("yaml", e.to_string()))
    }

    fn decode(&self, text: &str) -> Result<Value> {
        serde_yaml::from_str(text).map_err(|e| FolioError::serialization("yaml", e.to_string()))
    }
}
