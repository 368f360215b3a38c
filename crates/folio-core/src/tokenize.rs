//! Search-index tokenizer.
//!
//! Tokens are lowercase, split on non-alphanumeric boundaries, with empty
//! tokens discarded. The same function feeds both index building and query
//! tokenization, so the two can never disagree.

/// Tokenizes a string field value.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_non_alphanumeric() {
        assert_eq!(tokenize("The Left-Hand of Darkness"), vec!["the", "left", "hand", "of", "darkness"]);
    }

    #[test]
    fn lowercases() {
        assert_eq!(tokenize("DUNE"), vec!["dune"]);
    }

    #[test]
    fn discards_empty_tokens() {
        assert_eq!(tokenize("--a--b--"), vec!["a", "b"]);
        assert!(tokenize("!!!").is_empty());
        assert!(tokenize("").is_empty());
    }

    #[test]
    fn keeps_digits() {
        assert_eq!(tokenize("catch-22"), vec!["catch", "22"]);
    }

    #[test]
    fn unicode_alphanumerics_survive() {
        assert_eq!(tokenize("Ångström unit"), vec!["ångström", "unit"]);
    }
}
