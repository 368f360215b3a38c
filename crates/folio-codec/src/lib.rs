//! Codec registry and built-in text codecs.
//!
//! A codec turns a JSON-equivalent value into file text and back. The
//! registry maps lower-cased file extensions (without the leading dot) to
//! codecs; the persistence engine looks codecs up by the extension of each
//! collection's file path.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use folio_core::error::{FolioError, Result};

mod hjson;
mod json;
mod json5_codec;
mod jsonl;
mod prose;
mod toml_codec;
mod yaml;

pub use hjson::HjsonCodec;
pub use json::JsonCodec;
pub use json5_codec::Json5Codec;
pub use jsonl::JsonlCodec;
pub use prose::{ProseCodec, ProseOptions};
pub use toml_codec::TomlCodec;
pub use yaml::YamlCodec;

/// A named encode/decode pair keyed by file extensions.
///
/// `encode` must be total over JSON-equivalent values within the codec's
/// documented semantics (TOML strips nulls); `decode` must round-trip every
/// `encode` output.
pub trait Codec: Send + Sync + std::fmt::Debug {
    /// The codec's name (not required to be unique; extensions are the
    /// lookup key).
    fn name(&self) -> &str;

    /// The extensions this codec claims, lower-case, no leading dot.
    fn extensions(&self) -> Vec<String>;

    /// Serializes a value to file text.
    fn encode(&self, value: &Value) -> Result<String>;

    /// Parses file text back to a value.
    fn decode(&self, text: &str) -> Result<Value>;
}

/// A shared codec handle.
pub type CodecRef = Arc<dyn Codec>;

/// Maps file extensions to codecs. On duplicate extension the last
/// registration wins and a warning identifies the new codec.
#[derive(Clone, Default)]
pub struct CodecRegistry {
    by_extension: HashMap<String, CodecRef>,
}

impl CodecRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with every built-in codec.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(JsonCodec::new()));
        registry.register(Arc::new(Json5Codec::new()));
        registry.register(Arc::new(HjsonCodec::new()));
        registry.register(Arc::new(YamlCodec::new()));
        registry.register(Arc::new(TomlCodec::new()));
        registry.register(Arc::new(JsonlCodec::new()));
        registry.register(Arc::new(ProseCodec::default()));
        registry
    }

    /// Registers a codec under every extension it claims.
    pub fn register(&mut self, codec: CodecRef) {
        for extension in codec.extensions() {
            let key = normalize_extension(&extension);
            if let Some(previous) = self.by_extension.get(&key) {
                warn!(
                    extension = %key,
                    new_codec = %codec.name(),
                    old_codec = %previous.name(),
                    "codec registration overrides existing extension"
                );
            }
            self.by_extension.insert(key, Arc::clone(&codec));
        }
    }

    /// Looks up the codec for an extension.
    pub fn lookup(&self, extension: &str) -> Result<CodecRef> {
        let key = normalize_extension(extension);
        self.by_extension
            .get(&key)
            .cloned()
            .ok_or(FolioError::UnsupportedFormat { extension: key })
    }

    /// Returns `true` when some codec claims the extension.
    pub fn supports(&self, extension: &str) -> bool {
        self.by_extension.contains_key(&normalize_extension(extension))
    }

    /// All registered extensions, unordered.
    pub fn extensions(&self) -> Vec<String> {
        self.by_extension.keys().cloned().collect()
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut extensions: Vec<_> = self.by_extension.keys().collect();
        extensions.sort();
        f.debug_struct("CodecRegistry")
            .field("extensions", &extensions)
            .finish()
    }
}

/// Lower-cases and strips the leading dot from an extension.
fn normalize_extension(extension: &str) -> String {
    extension.trim_start_matches('.').to_lowercase()
}
