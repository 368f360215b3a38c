//! SHA256 + base36 id generation.

use num_bigint::BigUint;
use num_traits::Zero;
use sha2::{Digest, Sha256};

/// Base36 alphabet (0-9, a-z).
const BASE36_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Generates ids for entities created without an explicit id.
pub trait IdGenerator: Send + Sync {
    /// Produces a fresh id for the given collection.
    fn generate(&self, collection: &str) -> String;
}

/// Converts a byte slice to a base36 string of the specified length.
pub fn encode_base36(data: &[u8], length: usize) -> String {
    let mut num = BigUint::from_bytes_be(data);
    let base = BigUint::from(36u32);
    let zero = BigUint::zero();

    // Build the string in reverse.
    let mut chars: Vec<u8> = Vec::with_capacity(length);
    while num > zero {
        let rem = &num % &base;
        num /= &base;
        // rem is guaranteed to be < 36, so fits in a u8 index.
        let digits = rem.to_u32_digits();
        let i = if digits.is_empty() { 0 } else { digits[0] as usize };
        chars.push(BASE36_ALPHABET[i]);
    }
    chars.reverse();

    let mut s = String::from_utf8(chars).expect("base36 chars are valid UTF-8");

    if s.len() < length {
        let padding = "0".repeat(length - s.len());
        s = padding + &s;
    }
    if s.len() > length {
        s = s[s.len() - length..].to_owned();
    }
    s
}

/// The built-in generator: a short collision-resistant random string.
///
/// Hashes a random seed, a nanosecond timestamp, and the collection name,
/// then base36-encodes the digest prefix.
#[derive(Debug, Clone)]
pub struct HashIdGenerator {
    /// Output length in base36 characters.
    length: usize,
}

/// Default id length: 12 chars of base36 is ~62 bits.
pub const DEFAULT_ID_LENGTH: usize = 12;

impl HashIdGenerator {
    /// A generator producing ids of the given length (clamped to 4..=32).
    pub fn new(length: usize) -> Self {
        Self {
            length: length.clamp(4, 32),
        }
    }
}

impl Default for HashIdGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_ID_LENGTH)
    }
}

impl IdGenerator for HashIdGenerator {
    fn generate(&self, collection: &str) -> String {
        let nanos = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default();
        let seed = fastrand::u128(..);
        let content = format!("{collection}|{nanos}|{seed}");
        let hash = Sha256::digest(content.as_bytes());
        // 8 digest bytes cover up to ~12 base36 chars; take more for longer ids.
        let num_bytes = (self.length / 2 + 2).min(hash.len());
        encode_base36(&hash[..num_bytes], self.length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn encode_base36_basic() {
        // 0 bytes -> all zeros
        assert_eq!(encode_base36(&[], 4), "0000");
    }

    #[test]
    fn encode_base36_length() {
        assert_eq!(encode_base36(&[0xFF, 0xFF], 4).len(), 4);
    }

    #[test]
    fn encode_base36_truncates() {
        assert_eq!(encode_base36(&[0xFF, 0xFF, 0xFF, 0xFF], 3).len(), 3);
    }

    #[test]
    fn generator_produces_fixed_length() {
        let g = HashIdGenerator::default();
        let id = g.generate("books");
        assert_eq!(id.len(), DEFAULT_ID_LENGTH);
        assert!(id.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()));
    }

    #[test]
    fn generator_unlikely_to_collide() {
        let g = HashIdGenerator::default();
        let ids: HashSet<String> = (0..1000).map(|_| g.generate("books")).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn length_is_clamped() {
        let g = HashIdGenerator::new(1);
        assert_eq!(g.generate("c").len(), 4);
    }
}
