//! Deterministic cryptographic fixtures for testing
//!
//! Provides reproducible Ed25519 keypairs that sign access tokens the way an
//! identity provider would, plus the matching public key in the PEM form the
//! gateway loads at startup. All fixtures are deterministic based on seed
//! values.

use base64::engine::general_purpose;
use base64::Engine;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use ring::signature::{Ed25519KeyPair, KeyPair};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Test fixture error type
#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    #[error("I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// DER prefix of an Ed25519 SubjectPublicKeyInfo (RFC 8410); the 32-byte
/// public key follows.
const ED25519_SPKI_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];

/// Deterministic Ed25519 keypair standing in for the identity provider's
/// signing key.
///
/// # Example
/// ```rust,ignore
/// let keypair = TestKeypair::new(1)?;
/// let token = keypair.sign(&TestClaimsBuilder::new().expires_in(300).build())?;
/// std::fs::write(path, keypair.public_key_pem())?;
/// ```
pub struct TestKeypair {
    seed: [u8; 32],
    public_key: Vec<u8>,
}

impl TestKeypair {
    /// Generate the keypair for `seed`. The same seed always produces the
    /// same keypair.
    pub fn new(seed: u8) -> Result<Self, FixtureError> {
        // Create deterministic 32-byte seed from input
        let mut seed_bytes = [0u8; 32];
        seed_bytes[0] = seed;
        for (i, byte) in seed_bytes.iter_mut().enumerate().skip(1) {
            *byte = seed.wrapping_mul(i as u8).wrapping_add(i as u8);
        }

        let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed_bytes).map_err(|e| {
            FixtureError::Crypto(format!("Failed to generate test keypair: {:?}", e))
        })?;

        Ok(Self {
            seed: seed_bytes,
            public_key: key_pair.public_key().as_ref().to_vec(),
        })
    }

    /// Public key as DER-encoded SubjectPublicKeyInfo.
    pub fn public_key_der(&self) -> Vec<u8> {
        let mut der = ED25519_SPKI_PREFIX.to_vec();
        der.extend_from_slice(&self.public_key);
        der
    }

    /// Public key as a `-----BEGIN PUBLIC KEY-----` PEM document.
    pub fn public_key_pem(&self) -> String {
        format!(
            "-----BEGIN PUBLIC KEY-----\n{}\n-----END PUBLIC KEY-----\n",
            general_purpose::STANDARD.encode(self.public_key_der())
        )
    }

    /// Write the public key PEM to a fresh file under the system temp dir.
    ///
    /// `label` keeps concurrently running tests from sharing a file.
    pub fn write_public_key_pem(&self, label: &str) -> Result<PathBuf, FixtureError> {
        let path = std::env::temp_dir().join(format!(
            "verify-gateway-{}-{}-{}.pem",
            label,
            std::process::id(),
            hex_prefix(&self.public_key)
        ));
        std::fs::write(&path, self.public_key_pem())?;
        Ok(path)
    }

    /// Sign `claims` as an EdDSA JWT.
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, FixtureError> {
        let encoding_key = EncodingKey::from_ed_der(&build_pkcs8_from_seed(&self.seed));
        encode(&Header::new(Algorithm::EdDSA), claims, &encoding_key)
            .map_err(|e| FixtureError::Crypto(format!("Failed to sign test token: {}", e)))
    }
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes.iter().take(4).map(|b| format!("{:02x}", b)).collect()
}

/// Build PKCS#8 v1 document from Ed25519 seed
///
/// This is a test-only utility. Production keys never pass through here.
fn build_pkcs8_from_seed(seed: &[u8; 32]) -> Vec<u8> {
    // PKCS#8 v1 format for Ed25519 (RFC 5208):
    // SEQUENCE {
    //   version         INTEGER (0),
    //   algorithm       AlgorithmIdentifier,
    //   privateKey      OCTET STRING
    // }
    let mut pkcs8 = Vec::new();

    // Outer SEQUENCE, 46 bytes
    pkcs8.extend_from_slice(&[0x30, 0x2e]);

    // Version: INTEGER 0
    pkcs8.extend_from_slice(&[0x02, 0x01, 0x00]);

    // Algorithm Identifier: SEQUENCE { OID 1.3.101.112 }
    pkcs8.extend_from_slice(&[0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70]);

    // Private Key: OCTET STRING { OCTET STRING seed }
    pkcs8.extend_from_slice(&[0x04, 0x22, 0x04, 0x20]);
    pkcs8.extend_from_slice(seed);

    pkcs8
}
