//! Data models for the verify gateway.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One upstream-issued credential.
///
/// Created when the identity provider issues or renews a token and never
/// mutated afterwards; a refresh supersedes it with a new value.
///
/// Field names match the OAuth token response so the cached JSON is the
/// same shape the identity provider returns.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenData {
    /// Bearer credential presented by clients. Also the cache key.
    pub access_token: String,

    /// Used only to obtain a replacement access token.
    pub refresh_token: String,

    /// Seconds until the access token expires (TTL of the access record).
    pub expires_in: u64,

    /// Seconds until the refresh token expires (TTL of the refresh record).
    pub refresh_expires_in: u64,
}

impl TokenData {
    /// Whether the refresh lease outlives (or matches) the access lease.
    #[must_use]
    pub fn has_consistent_lifetimes(&self) -> bool {
        self.refresh_expires_in >= self.expires_in
    }
}

/// Custom Debug implementation that redacts both token strings.
impl fmt::Debug for TokenData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenData")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .field("refresh_expires_in", &self.refresh_expires_in)
            .finish()
    }
}

/// Readiness check response.
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    /// Overall status: "ready" or "not_ready".
    pub status: &'static str,

    /// Cache store connectivity: "healthy" or "unhealthy".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<&'static str>,

    /// Generic error description when not ready.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
