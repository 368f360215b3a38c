//! Opaque pagination cursors.
//!
//! A cursor encodes the last-seen sort-key tuple, the id tiebreaker, and
//! the page size of the originating query, JSON-serialized and
//! base64url-encoded. The engine seeks past the encoded position under the
//! query's sort order.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use folio_core::error::{FolioError, Result};

/// The decoded form of a continuation token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    /// Sort-key values of the last item of the previous page, in sort-key
    /// order.
    pub keys: Vec<Value>,
    /// Id of the last item (tiebreaker for equal key tuples).
    pub id: String,
    /// Page size carried over from the first page's `limit`.
    pub size: Option<usize>,
}

impl Cursor {
    /// Serializes to the opaque wire form.
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)
            .map_err(|e| FolioError::serialization("cursor", e.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Parses the opaque wire form.
    pub fn decode(text: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(text)
            .map_err(|e| FolioError::validation(format!("malformed cursor: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| FolioError::validation(format!("malformed cursor: {e}")))
    }
}

/// One page of a cursor-paginated query.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// The page's items in query order.
    pub items: Vec<T>,
    /// Token for the next page; `None` when this page exhausts the result.
    pub next_cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn round_trip() {
        let cursor = Cursor {
            keys: vec![json!(1969), json!("sci-fi")],
            id: "b-3".into(),
            size: Some(2),
        };
        let encoded = cursor.encode().unwrap();
        assert_eq!(Cursor::decode(&encoded).unwrap(), cursor);
    }

    #[test]
    fn wire_form_is_opaque_and_url_safe() {
        let cursor = Cursor {
            keys: vec![json!("a/b+c")],
            id: "x".into(),
            size: None,
        };
        let encoded = cursor.encode().unwrap();
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        assert!(!encoded.contains('='));
    }

    #[test]
    fn malformed_cursor_is_validation_error() {
        assert!(matches!(
            Cursor::decode("not base64 @@@").unwrap_err(),
            FolioError::Validation { .. }
        ));
        // Valid base64, invalid payload.
        let garbage = URL_SAFE_NO_PAD.encode(b"[1,2,3");
        assert!(Cursor::decode(&garbage).is_err());
    }
}
