//! JWT claims structure.
//!
//! Only the time-based claims matter to the gateway. Audience, issuer and
//! token-id are never inspected. The `sub` field is redacted in Debug output
//! to prevent exposure in logs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Claims decoded from an access token after signature verification.
#[derive(Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Expiration timestamp (Unix epoch seconds).
    pub exp: u64,

    /// Not-before timestamp (Unix epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,

    /// Subject - redacted in Debug output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
}

/// Custom Debug implementation that redacts the `sub` field.
impl fmt::Debug for Claims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Claims")
            .field("exp", &self.exp)
            .field("nbf", &self.nbf)
            .field("sub", &self.sub.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}
