//! Normalized cache keys for search requests.
//!
//! A [`QueryFingerprint`] is derived from the normalized query text and the
//! requested result count. Normalization trims, collapses internal
//! whitespace, and lowercases, so `"  What IS   ai?"` and `"what is ai?"`
//! address the same cache entry. The pair is hashed with SHA-256 into a
//! fixed-width key.
//!
//! The cache never derives keys itself; callers fingerprint first.

use sha2::{Digest, Sha256};
use std::fmt;

/// Fixed-width cache key for a `(query, top_k)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryFingerprint([u8; 32]);

impl QueryFingerprint {
    pub fn new(query: &str, top_k: usize) -> Self {
        let normalized = normalize_query(query);
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        hasher.update([0u8]);
        hasher.update((top_k as u64).to_le_bytes());
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for QueryFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // short form for logs
        write!(f, "{}", &self.to_hex()[..12])
    }
}

/// Trim, collapse whitespace runs to a single space, and lowercase.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
