//! Service layer for the verify gateway.
//!
//! - `idp_client` - Identity provider token endpoint client (code exchange, renewal)
//! - `refresh` - Refresh coordination with timeout and optional single-flight

pub mod idp_client;
pub mod refresh;

pub use idp_client::{IdpClient, TokenRenewer, UpstreamFailure};
pub use refresh::{RefreshCoordinator, RefreshFailure};
