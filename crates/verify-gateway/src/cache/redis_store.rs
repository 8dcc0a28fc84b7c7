//! Redis-backed `TokenStore`.
//!
//! # Connection Pattern
//!
//! Uses redis-rs `ConnectionManager`: a multiplexed connection that is cheap
//! to clone, safe to use concurrently, and reconnects on its own after the
//! server drops it. Each operation clones the manager; no locking.
//!
//! TTLs are delegated to Redis (`SET key value EX ttl`).

use super::{CacheError, TokenStore};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::{error, warn};

/// Redis token store.
#[derive(Clone)]
pub struct RedisTokenStore {
    connection: ConnectionManager,
}

impl RedisTokenStore {
    /// Connect to Redis at `redis_url`.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Store` if the URL is invalid or the first
    /// connection attempt fails.
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = Client::open(redis_url).map_err(|e| {
            // Do NOT log redis_url: it may carry credentials
            error!(target: "gw.cache", error = %e, "Failed to open Redis client");
            CacheError::Store(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = ConnectionManager::new(client).await.map_err(|e| {
            error!(target: "gw.cache", error = %e, "Failed to connect to Redis");
            CacheError::Store(format!("Failed to connect to Redis: {e}"))
        })?;

        Ok(Self { connection })
    }
}

#[async_trait]
impl TokenStore for RedisTokenStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection.clone();
        conn.get::<_, Option<String>>(key).await.map_err(|e| {
            warn!(target: "gw.cache", error = %e, "Redis GET failed");
            CacheError::Store(format!("GET failed: {e}"))
        })
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_seconds)
            .await
            .map_err(|e| {
                warn!(target: "gw.cache", error = %e, "Redis SET EX failed");
                CacheError::Store(format!("SET EX failed: {e}"))
            })
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| CacheError::Store(format!("PING failed: {e}")))
    }
}
