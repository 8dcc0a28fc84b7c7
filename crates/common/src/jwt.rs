//! JWT utilities shared by the verify gateway crates.
//!
//! This module provides:
//! - Size limits for DoS prevention
//! - Clock leeway bounds
//! - Algorithm parsing with key-family policy (asymmetric only, one family)
//! - PEM public key decoding for the configured family
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - HMAC algorithms are refused: the gateway only holds a public key
//! - Mixing key families is refused: `jsonwebtoken` checks every configured
//!   algorithm against the single decoding key
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{check_token_size, decoding_key_from_pem, parse_algorithms};
//!
//! let policy = parse_algorithms("RS256,RS512")?;
//! let key = decoding_key_from_pem(policy.family, &std::fs::read(path)?)?;
//!
//! check_token_size(token)?;
//! ```

use jsonwebtoken::{Algorithm, DecodingKey};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// JWTs larger than this are rejected BEFORE any base64 decoding or
/// signature verification.
///
/// # Rationale
///
/// - Typical IdP access tokens are 800-2000 bytes (RS256 signature, profile claims)
/// - 8KB leaves room for large group/role claims while bounding per-request work
///
/// Per OWASP API Security Top 10 - API4:2023 (Unrestricted Resource Consumption)
pub const MAX_JWT_SIZE_BYTES: usize = 8192; // 8KB

/// Default clock leeway applied to `exp`/`nbf` checks.
///
/// Zero: an access token is stale the second its `exp` passes. Renewal timing
/// is driven by the cache TTLs, not by the embedded claims.
pub const DEFAULT_LEEWAY: Duration = Duration::from_secs(0);

/// Maximum allowed clock leeway (10 minutes).
pub const MAX_LEEWAY: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised while screening a token before signature verification.
///
/// Messages are generic; details are logged at debug level.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Token is empty.
    #[error("The access token is invalid or expired")]
    EmptyToken,
}

/// Errors raised while building the verification policy at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtConfigError {
    /// No algorithm was listed.
    #[error("At least one JWT algorithm must be configured")]
    NoAlgorithms,

    /// Algorithm name not recognized.
    #[error("Unknown JWT algorithm: {0}")]
    UnknownAlgorithm(String),

    /// HMAC algorithms need a shared secret, which the gateway never holds.
    #[error("Symmetric JWT algorithm not allowed: {0}")]
    SymmetricAlgorithm(String),

    /// Algorithms from different key families were configured together.
    #[error("JWT algorithms must share one key family, got {0:?} and {1:?}")]
    MixedKeyFamilies(KeyFamily, KeyFamily),

    /// The public key could not be decoded for the configured family.
    #[error("Invalid {0:?} public key: {1}")]
    InvalidKey(KeyFamily, String),
}

// =============================================================================
// Algorithm Policy
// =============================================================================

/// Asymmetric key family an algorithm verifies against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    /// RSA keys (RS* and PS* algorithms).
    Rsa,
    /// Elliptic-curve keys (ES* algorithms).
    Ec,
    /// Edwards-curve keys (EdDSA).
    Ed,
}

impl KeyFamily {
    /// Key family for `alg`, or `None` for symmetric (HMAC) algorithms.
    #[must_use]
    pub fn of(alg: Algorithm) -> Option<Self> {
        match alg {
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => Some(KeyFamily::Rsa),
            Algorithm::ES256 | Algorithm::ES384 => Some(KeyFamily::Ec),
            Algorithm::EdDSA => Some(KeyFamily::Ed),
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => None,
        }
    }
}

/// Accepted algorithms and the key family they share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlgorithmPolicy {
    /// Algorithms accepted in the token header.
    pub algorithms: Vec<Algorithm>,

    /// Key family of every entry in `algorithms`.
    pub family: KeyFamily,
}

/// Parse a comma-separated algorithm list (e.g. `"RS256, PS256"`).
///
/// # Errors
///
/// - `NoAlgorithms` - list is empty
/// - `UnknownAlgorithm` - an entry is not a JOSE algorithm name
/// - `SymmetricAlgorithm` - an entry is HS256/HS384/HS512
/// - `MixedKeyFamilies` - entries need different key types
pub fn parse_algorithms(spec: &str) -> Result<AlgorithmPolicy, JwtConfigError> {
    let mut algorithms = Vec::new();
    let mut family: Option<KeyFamily> = None;

    for name in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let alg = Algorithm::from_str(name)
            .map_err(|_| JwtConfigError::UnknownAlgorithm(name.to_string()))?;

        let alg_family =
            KeyFamily::of(alg).ok_or_else(|| JwtConfigError::SymmetricAlgorithm(name.to_string()))?;

        match family {
            Some(existing) if existing != alg_family => {
                return Err(JwtConfigError::MixedKeyFamilies(existing, alg_family));
            }
            _ => family = Some(alg_family),
        }

        if !algorithms.contains(&alg) {
            algorithms.push(alg);
        }
    }

    let family = family.ok_or(JwtConfigError::NoAlgorithms)?;
    Ok(AlgorithmPolicy { algorithms, family })
}

/// Decode a PEM-encoded public key for the given key family.
///
/// # Errors
///
/// Returns `JwtConfigError::InvalidKey` if the PEM does not hold a public key
/// of that family.
pub fn decoding_key_from_pem(family: KeyFamily, pem: &[u8]) -> Result<DecodingKey, JwtConfigError> {
    let result = match family {
        KeyFamily::Rsa => DecodingKey::from_rsa_pem(pem),
        KeyFamily::Ec => DecodingKey::from_ec_pem(pem),
        KeyFamily::Ed => DecodingKey::from_ed_pem(pem),
    };

    result.map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, ?family, "Public key PEM rejected");
        JwtConfigError::InvalidKey(family, e.to_string())
    })
}

// =============================================================================
// Functions
// =============================================================================

/// Reject empty or oversized tokens before any parsing.
///
/// # Errors
///
/// - `EmptyToken` - token is the empty string
/// - `TokenTooLarge` - token exceeds `MAX_JWT_SIZE_BYTES`
pub fn check_token_size(token: &str) -> Result<(), JwtValidationError> {
    if token.is_empty() {
        return Err(JwtValidationError::EmptyToken);
    }

    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
