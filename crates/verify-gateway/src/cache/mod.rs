//! Token cache.
//!
//! `TokenCache` implements the dual-key record layout (an `access:` entry with
//! the access lease as TTL, a `refresh:` entry with the refresh lease) over a
//! `TokenStore`. Stores are plain string key/value with per-key TTL:
//!
//! - `redis_store::RedisTokenStore` - production store
//! - `memory::InMemoryTokenStore` - TTL-enforcing fake for tests and local runs

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod redis_store;
pub mod token_cache;

pub use memory::InMemoryTokenStore;
pub use redis_store::RedisTokenStore;
pub use token_cache::{CacheLookup, RefreshTtlPolicy, TokenCache};

/// Errors from the token cache and its stores.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache store error: {0}")]
    Store(String),

    #[error("Cache operation timed out")]
    Timeout,

    #[error("Cache serialization error: {0}")]
    Serialization(String),

    #[error(
        "Refresh lifetime ({refresh_expires_in}s) is shorter than access lifetime ({expires_in}s)"
    )]
    InvalidLifetime {
        expires_in: u64,
        refresh_expires_in: u64,
    },
}

/// String key/value store with per-key expiry.
///
/// TTL enforcement belongs to the store: once a key's TTL lapses, `get`
/// must return `None`.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Read `key`, `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Write `key` with a TTL in seconds, replacing any existing value and TTL.
    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), CacheError>;

    /// Check connectivity.
    async fn ping(&self) -> Result<(), CacheError>;
}
