//! # Gateway Test Utilities
//!
//! Shared test utilities for the verify gateway.
//!
//! This crate provides:
//! - Deterministic crypto fixtures (fixed Ed25519 keys for reproducible tests)
//! - Claims and token-response builders
//! - Server test harness (`TestGatewayServer` for E2E tests)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gateway_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let server = TestGatewayServer::spawn().await?;
//!     let token = server.sign_access_token(300)?;
//!
//!     let response = TestGatewayServer::client()
//!         .get(format!("{}/verify", server.url()))
//!         .bearer_auth(&token)
//!         .send()
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod crypto_fixtures;
pub mod server_harness;
pub mod token_builders;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use server_harness::*;
pub use token_builders::*;
