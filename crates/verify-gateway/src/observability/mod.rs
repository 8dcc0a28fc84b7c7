//! Observability module for the verify gateway.
//!
//! Provides metrics definitions and log correlation helpers.
//!
//! # Privacy
//!
//! Access and refresh tokens are bearer credentials and never appear in logs.
//! When a log line must identify which token it is about, it carries
//! `hash_for_correlation(token)` instead.

use sha2::{Digest, Sha256};

pub mod metrics;

/// Hash a sensitive value for log correlation.
///
/// Returns the first 8 hex characters (32 bits) of the SHA-256 digest:
/// enough to follow one token across log entries, not enough to recover it.
pub fn hash_for_correlation(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    hex::encode(digest.get(..4).unwrap_or_default())
}
