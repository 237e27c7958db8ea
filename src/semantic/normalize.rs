//! Text normalization shared by embedding and lexical comparison.
//!
//! Descriptions arrive in mixed scripts (English, Sinhala, Tamil, ...):
//! 1. Lowercase
//! 2. NFC composition
//! 3. Anything that is not a letter, digit or combining mark becomes a space
//! 4. Collapse whitespace runs and trim

use std::collections::HashSet;

use sha2::{Digest, Sha256};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Normalize a free-text description.
///
/// Idempotent: `normalize(&normalize(x)) == normalize(x)`.
pub fn normalize(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .nfc()
        .map(|c| {
            if c.is_alphanumeric() || is_combining_mark(c) {
                c
            } else {
                ' '
            }
        })
        .collect();

    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split already-normalized text into its set of words.
pub fn word_set(normalized: &str) -> HashSet<&str> {
    normalized.split_whitespace().collect()
}

/// Stable hash of an item's identity and normalized text.
///
/// Used to decide whether a cached embedding still belongs to a record.
/// Built on SHA-256 so the value survives toolchain upgrades.
pub fn content_hash(id: &str, normalized: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    hasher.update([0u8]);
    hasher.update(normalized.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}
