//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports [`secrecy`] types. The gateway handles three kinds of secret:
//! the OAuth client secret, upstream refresh tokens, and bearer credentials
//! relayed back to clients. All of them travel as `SecretString` wherever
//! they are not part of the cached `TokenData` record.
//!
//! `SecretString` implements `Debug` with redaction, so deriving `Debug` on a
//! struct that holds one is safe, and it is zeroized on drop.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct ClientCredentials {
//!     client_id: String,
//!     client_secret: SecretString,
//! }
//!
//! let creds = ClientCredentials {
//!     client_id: "gateway".to_string(),
//!     client_secret: SecretString::from("s3cr3t"),
//! };
//!
//! assert!(!format!("{creds:?}").contains("s3cr3t"));
//! assert_eq!(creds.client_secret.expose_secret(), "s3cr3t");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
