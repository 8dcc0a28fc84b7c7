//! Verify Gateway Library
//!
//! A token-verification gateway that sits in front of protected resources.
//! For every inbound request it decides whether the presented access token
//! is valid and, when the access lease has lapsed, whether it can be renewed
//! silently through the identity provider.
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> verification/orchestrator.rs
//!                                     |-> auth/verifier.rs      (signature)
//!                                     |-> cache/token_cache.rs  (dual-key TTL records)
//!                                     `-> services/refresh.rs   (renewal)
//! ```
//!
//! # Modules
//!
//! - `auth` - Local signature and expiry verification
//! - `cache` - Dual-key token cache over a pluggable store (Redis, in-memory)
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `models` - Data models
//! - `observability` - Metrics and log correlation helpers
//! - `routes` - Axum router setup
//! - `services` - Identity provider client and refresh coordination
//! - `verification` - The per-request verification state machine

pub mod auth;
pub mod cache;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod observability;
pub mod routes;
pub mod services;
pub mod verification;
