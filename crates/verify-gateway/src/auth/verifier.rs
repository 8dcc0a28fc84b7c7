//! Local signature and expiry verification for access tokens.
//!
//! The verifier holds a single public key loaded at startup and classifies
//! a presented token as `Valid`, `Expired` or `Invalid` without any I/O.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Only the configured asymmetric algorithms are accepted
//! - `exp` is required; `nbf` is honored when present
//! - Audience, issuer, subject and token-id are not checked

use crate::auth::claims::Claims;
use common::jwt::{check_token_size, decoding_key_from_pem, AlgorithmPolicy, JwtConfigError};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Outcome of a local token check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureCheck {
    /// Signature verifies and `exp`/`nbf` are in range.
    Valid,
    /// Signature verifies but `exp` is in the past.
    Expired,
    /// Bad signature, malformed, oversized, or missing `exp`.
    Invalid,
}

/// Failure loading the verification key at startup.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Failed to read public key from {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to decode public key: {0}")]
    Decode(#[from] JwtConfigError),
}

/// Verifies access tokens against one public key.
pub struct SignatureVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl SignatureVerifier {
    /// Create a verifier for `decoding_key`.
    ///
    /// # Arguments
    ///
    /// * `decoding_key` - Public key every accepted algorithm verifies against
    /// * `algorithms` - Algorithms accepted in the token header
    /// * `leeway_seconds` - Clock leeway for `exp`/`nbf`
    pub fn new(decoding_key: DecodingKey, algorithms: Vec<Algorithm>, leeway_seconds: u64) -> Self {
        let mut validation = Validation::default();
        validation.algorithms = algorithms;
        validation.leeway = leeway_seconds;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            decoding_key,
            validation,
        }
    }

    /// Load a PEM public key from `path` and build a verifier for `policy`.
    ///
    /// # Errors
    ///
    /// - `KeyError::Read` if the file cannot be read
    /// - `KeyError::Decode` if the PEM does not hold a key of the policy's family
    pub fn from_pem_file(
        path: impl AsRef<Path>,
        policy: &AlgorithmPolicy,
        leeway_seconds: u64,
    ) -> Result<Self, KeyError> {
        let path = path.as_ref();
        let pem = std::fs::read(path).map_err(|source| KeyError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let decoding_key = decoding_key_from_pem(policy.family, &pem)?;
        Ok(Self::new(
            decoding_key,
            policy.algorithms.clone(),
            leeway_seconds,
        ))
    }

    /// Classify `token`.
    ///
    /// `Expired` is only returned for tokens whose signature verified;
    /// `jsonwebtoken` checks the signature before any claim.
    pub fn verify(&self, token: &str) -> SignatureCheck {
        if let Err(e) = check_token_size(token) {
            debug!(target: "gw.auth.verifier", error = ?e, "Token rejected before parsing");
            return SignatureCheck::Invalid;
        }

        match decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(_) => SignatureCheck::Valid,
            Err(e) => match e.kind() {
                ErrorKind::ExpiredSignature => SignatureCheck::Expired,
                kind => {
                    debug!(target: "gw.auth.verifier", error = ?kind, "Token verification failed");
                    SignatureCheck::Invalid
                }
            },
        }
    }
}
