//! Line-oriented prose codec.
//!
//! A human-editable record format. The top level must be an object; each
//! object-valued entry becomes a record introduced by a header line, with
//! one `field<sep>value` line per field. Scalar top-level entries (such as
//! `_version`) become `key = value` preamble lines. Records are separated
//! by blank lines.
//!
//! ```text
//! _version = 2
//!
//! @ u1
//! id: u1
//! name: Alice Smith
//! age: 33
//!
//! @ u2
//! id: u2
//! name: Bob
//! ```
//!
//! Field values parse as JSON where possible; anything that fails to parse
//! is the literal string. The encoder quotes any string that would be
//! ambiguous under that rule, so values round-trip.

use serde_json::{Map, Value};

use folio_core::error::{FolioError, Result};

use crate::Codec;

/// Tunables for the prose line format.
#[derive(Debug, Clone)]
pub struct ProseOptions {
    /// Separator between a field name and its value.
    pub field_separator: String,
    /// Prefix introducing a record header line.
    pub record_prefix: String,
}

impl Default for ProseOptions {
    fn default() -> Self {
        Self {
            field_separator: ": ".to_owned(),
            record_prefix: "@ ".to_owned(),
        }
    }
}

/// The configurable prose codec. Nulls are preserved.
#[derive(Debug, Clone, Default)]
pub struct ProseCodec {
    options: ProseOptions,
}

impl ProseCodec {
    pub fn new(options: ProseOptions) -> Self {
        Self { options }
    }
}

/// Renders a scalar or container value for a field line.
fn render_value(value: &Value) -> Result<String> {
    if let Value::String(s) = value {
        // A raw string that would re-parse as JSON (or carries edge
        // whitespace) must be quoted to survive the round-trip.
        let ambiguous = s.trim() != s
            || s.is_empty()
            || s.contains('\n')
            || serde_json::from_str::<Value>(s).is_ok();
        if ambiguous {
            return serde_json::to_string(s)
                .map_err(|e| FolioError::serialization("prose", e.to_string()));
        }
        return Ok(s.clone());
    }
    serde_json::to_string(value).map_err(|e| FolioError::serialization("prose", e.to_string()))
}

/// Parses a field line's value part.
fn parse_value(raw: &str) -> Value {
    match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(_) => Value::String(raw.to_owned()),
    }
}

impl Codec for ProseCodec {
    fn name(&self) -> &str {
        "prose"
    }

    fn extensions(&self) -> Vec<String> {
        vec!["prose".into()]
    }

    fn encode(&self, value: &Value) -> Result<String> {
        let top = value.as_object().ok_or_else(|| {
            FolioError::serialization("prose", "top-level value must be an object")
        })?;

        let sep = &self.options.field_separator;
        let prefix = &self.options.record_prefix;
        let mut out = String::new();

        // Scalar entries first, so `_version` stays at the top of the file.
        for (key, entry) in top {
            if !entry.is_object() {
                out.push_str(key);
                out.push_str(" = ");
                out.push_str(&render_value(entry)?);
                out.push('\n');
            }
        }

        for (key, entry) in top {
            let record = match entry.as_object() {
                Some(record) => record,
                None => continue,
            };
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(prefix);
            out.push_str(key);
            out.push('\n');
            for (field, field_value) in record {
                out.push_str(field);
                out.push_str(sep);
                out.push_str(&render_value(field_value)?);
                out.push('\n');
            }
        }

        Ok(out)
    }

    fn decode(&self, text: &str) -> Result<Value> {
        let sep = self.options.field_separator.trim_end();
        let prefix = &self.options.record_prefix;
        let mut top = Map::new();
        let mut current: Option<(String, Map<String, Value>)> = None;

        for (index, line) in text.lines().enumerate() {
            let line_no = index + 1;
            if line.trim().is_empty() {
                continue;
            }

            if let Some(rest) = line.strip_prefix(prefix.as_str()) {
                if let Some((key, record)) = current.take() {
                    top.insert(key, Value::Object(record));
                }
                current = Some((rest.trim().to_owned(), Map::new()));
                continue;
            }

            match &mut current {
                Some((_, record)) => {
                    let (field, raw) = line.split_once(sep).ok_or_else(|| {
                        FolioError::serialization(
                            "prose",
                            format!("line {line_no}: expected field{sep}value"),
                        )
                    })?;
                    record.insert(field.trim().to_owned(), parse_value(raw.trim()));
                }
                None => {
                    let (key, raw) = line.split_once('=').ok_or_else(|| {
                        FolioError::serialization(
                            "prose",
                            format!("line {line_no}: expected record header or key = value"),
                        )
                    })?;
                    top.insert(key.trim().to_owned(), parse_value(raw.trim()));
                }
            }
        }

        if let Some((key, record)) = current.take() {
            top.insert(key, Value::Object(record));
        }

        Ok(Value::Object(top))
    }
}
