//! Access token verification.
//!
//! - `claims` - Claims decoded from verified tokens
//! - `verifier` - Signature/expiry classification against the configured key

pub mod claims;
pub mod verifier;

pub use claims::Claims;
pub use verifier::{KeyError, SignatureCheck, SignatureVerifier};
