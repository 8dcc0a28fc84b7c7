//! Dual-key token records.
//!
//! Every saved `TokenData` is written twice, as the same JSON value:
//!
//! | Key | TTL |
//! |---|---|
//! | `access:<access_token>` | `expires_in` |
//! | `refresh:<access_token>` | `refresh_expires_in` |
//!
//! A lookup that finds the access record reports a fresh token; one that
//! only finds the refresh record reports the same token with its access
//! lease lapsed, which is the signal to renew. The cache's TTLs, not the
//! token's embedded `exp`, decide freshness.
//!
//! The two writes are independent. If the second one fails the token is
//! left with only its access record, which is tolerated: once that lapses
//! the token is simply unknown.

use super::{CacheError, TokenStore};
use crate::models::TokenData;
use crate::observability::hash_for_correlation;
use crate::observability::metrics::record_cache_operation;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Key prefix of the short-lived record.
pub const ACCESS_KEY_PREFIX: &str = "access:";

/// Key prefix of the long-lived record.
pub const REFRESH_KEY_PREFIX: &str = "refresh:";

/// Store key of the access record for `access_token`.
pub fn access_key(access_token: &str) -> String {
    format!("{ACCESS_KEY_PREFIX}{access_token}")
}

/// Store key of the refresh record for `access_token`.
pub fn refresh_key(access_token: &str) -> String {
    format!("{REFRESH_KEY_PREFIX}{access_token}")
}

/// What `save` does with a token whose refresh lease is shorter than its
/// access lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshTtlPolicy {
    /// Write the refresh record with the longer of the two leases.
    #[default]
    Clamp,
    /// Refuse to save the token.
    Reject,
}

impl FromStr for RefreshTtlPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clamp" => Ok(Self::Clamp),
            "reject" => Ok(Self::Reject),
            other => Err(format!("expected 'clamp' or 'reject', got '{other}'")),
        }
    }
}

/// Result of `TokenCache::lookup`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLookup {
    /// Cached token, if either record was found.
    pub token: Option<TokenData>,

    /// `false` only when the access record was found.
    pub access_expired: bool,
}

impl CacheLookup {
    fn fresh(token: TokenData) -> Self {
        Self {
            token: Some(token),
            access_expired: false,
        }
    }

    fn stale(token: TokenData) -> Self {
        Self {
            token: Some(token),
            access_expired: true,
        }
    }

    fn absent() -> Self {
        Self {
            token: None,
            access_expired: true,
        }
    }
}

/// Dual-key TTL cache of upstream-issued tokens.
///
/// Cheap to clone; clones share the store.
#[derive(Clone)]
pub struct TokenCache {
    store: Arc<dyn TokenStore>,
    timeout: Duration,
    ttl_policy: RefreshTtlPolicy,
}

impl TokenCache {
    /// Create a cache over `store`, bounding every store call by `timeout`.
    pub fn new(store: Arc<dyn TokenStore>, timeout: Duration, ttl_policy: RefreshTtlPolicy) -> Self {
        Self {
            store,
            timeout,
            ttl_policy,
        }
    }

    /// Write the access record, then the refresh record, for `token`.
    ///
    /// Saving the same token again rewrites both records and resets their TTLs.
    ///
    /// # Errors
    ///
    /// - `CacheError::InvalidLifetime` under `RefreshTtlPolicy::Reject` when
    ///   the refresh lease is shorter than the access lease (nothing written)
    /// - `CacheError::Store` / `CacheError::Timeout` from either write
    #[instrument(skip_all, name = "gw.cache.save", fields(token = %hash_for_correlation(&token.access_token)))]
    pub async fn save(&self, token: &TokenData) -> Result<(), CacheError> {
        let start = Instant::now();
        let result = self.write_records(token).await;

        let status = if result.is_ok() { "success" } else { "error" };
        record_cache_operation("save", status, start.elapsed());
        result
    }

    /// Find the cached token for access token `key`.
    ///
    /// 1. access record found: `(token, access_expired = false)`
    /// 2. else refresh record found: `(token, access_expired = true)`
    /// 3. else `(absent, access_expired = true)`
    ///
    /// A record that does not deserialize to a complete `TokenData` is
    /// treated as absent. The caller is responsible for checking that the
    /// returned token's `access_token` equals `key`.
    ///
    /// # Errors
    ///
    /// `CacheError::Store` / `CacheError::Timeout` if the store cannot answer.
    #[instrument(skip_all, name = "gw.cache.lookup", fields(token = %hash_for_correlation(key)))]
    pub async fn lookup(&self, key: &str) -> Result<CacheLookup, CacheError> {
        let start = Instant::now();
        let result = self.read_records(key).await;

        let status = match &result {
            Ok(CacheLookup { token: None, .. }) => "miss",
            Ok(CacheLookup {
                access_expired: true,
                ..
            }) => "stale",
            Ok(_) => "hit",
            Err(_) => "error",
        };
        record_cache_operation("lookup", status, start.elapsed());
        result
    }

    /// Check that the store answers.
    pub async fn ping(&self) -> Result<(), CacheError> {
        let start = Instant::now();
        let result = self.bounded(self.store.ping()).await;

        let status = if result.is_ok() { "success" } else { "error" };
        record_cache_operation("ping", status, start.elapsed());
        result
    }

    async fn write_records(&self, token: &TokenData) -> Result<(), CacheError> {
        let refresh_ttl = self.refresh_ttl(token)?;
        let value =
            serde_json::to_string(token).map_err(|e| CacheError::Serialization(e.to_string()))?;

        self.write(&access_key(&token.access_token), &value, token.expires_in)
            .await?;
        self.write(&refresh_key(&token.access_token), &value, refresh_ttl)
            .await?;

        debug!(
            target: "gw.cache",
            expires_in = token.expires_in,
            refresh_ttl,
            "Token saved"
        );
        Ok(())
    }

    fn refresh_ttl(&self, token: &TokenData) -> Result<u64, CacheError> {
        if token.has_consistent_lifetimes() {
            return Ok(token.refresh_expires_in);
        }

        match self.ttl_policy {
            RefreshTtlPolicy::Clamp => {
                warn!(
                    target: "gw.cache",
                    expires_in = token.expires_in,
                    refresh_expires_in = token.refresh_expires_in,
                    "Refresh lease shorter than access lease, clamping to access lease"
                );
                Ok(token.expires_in)
            }
            RefreshTtlPolicy::Reject => {
                warn!(
                    target: "gw.cache",
                    expires_in = token.expires_in,
                    refresh_expires_in = token.refresh_expires_in,
                    "Refresh lease shorter than access lease, refusing to cache"
                );
                Err(CacheError::InvalidLifetime {
                    expires_in: token.expires_in,
                    refresh_expires_in: token.refresh_expires_in,
                })
            }
        }
    }

    async fn write(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), CacheError> {
        // A zero TTL would create a record that is already expired
        if ttl_seconds == 0 {
            debug!(target: "gw.cache", "Skipping zero-TTL write");
            return Ok(());
        }
        self.bounded(self.store.set_ex(key, value, ttl_seconds)).await
    }

    async fn read_records(&self, key: &str) -> Result<CacheLookup, CacheError> {
        if let Some(token) = self.read(&access_key(key), "access").await? {
            return Ok(CacheLookup::fresh(token));
        }

        if let Some(token) = self.read(&refresh_key(key), "refresh").await? {
            return Ok(CacheLookup::stale(token));
        }

        Ok(CacheLookup::absent())
    }

    async fn read(&self, key: &str, record: &'static str) -> Result<Option<TokenData>, CacheError> {
        let Some(raw) = self.bounded(self.store.get(key)).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<TokenData>(&raw) {
            Ok(token) => Ok(Some(token)),
            Err(e) => {
                warn!(
                    target: "gw.cache",
                    record,
                    error = %e,
                    "Cached record is not a complete token, treating as absent"
                );
                Ok(None)
            }
        }
    }

    async fn bounded<T>(
        &self,
        operation: impl Future<Output = Result<T, CacheError>>,
    ) -> Result<T, CacheError> {
        tokio::time::timeout(self.timeout, operation)
            .await
            .map_err(|_| {
                warn!(target: "gw.cache", timeout_ms = self.timeout.as_millis() as u64, "Cache operation timed out");
                CacheError::Timeout
            })?
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::cache::InMemoryTokenStore;

    fn token(access: &str, expires_in: u64, refresh_expires_in: u64) -> TokenData {
        TokenData {
            access_token: access.to_string(),
            refresh_token: format!("refresh-for-{access}"),
            expires_in,
            refresh_expires_in,
        }
    }

    fn cache_over(store: &InMemoryTokenStore, policy: RefreshTtlPolicy) -> TokenCache {
        TokenCache::new(Arc::new(store.clone()), Duration::from_millis(1000), policy)
    }

    #[test]
    fn test_key_prefixes() {
        assert_eq!(access_key("abc"), "access:abc");
        assert_eq!(refresh_key("abc"), "refresh:abc");
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("clamp".parse::<RefreshTtlPolicy>(), Ok(RefreshTtlPolicy::Clamp));
        assert_eq!(" Reject ".parse::<RefreshTtlPolicy>(), Ok(RefreshTtlPolicy::Reject));
        assert!("ignore".parse::<RefreshTtlPolicy>().is_err());
        assert_eq!(RefreshTtlPolicy::default(), RefreshTtlPolicy::Clamp);
    }

    #[tokio::test]
    async fn test_save_then_lookup_is_fresh() {
        let store = InMemoryTokenStore::new();
        let cache = cache_over(&store, RefreshTtlPolicy::Clamp);
        let t = token("a1", 300, 1800);

        cache.save(&t).await.unwrap();
        let lookup = cache.lookup("a1").await.unwrap();

        assert_eq!(lookup.token, Some(t));
        assert!(!lookup.access_expired);
        assert_eq!(
            store.live_keys().await,
            vec!["access:a1".to_string(), "refresh:a1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_save_is_idempotent() {
        let store = InMemoryTokenStore::new();
        let cache = cache_over(&store, RefreshTtlPolicy::Clamp);
        let t = token("a1", 300, 1800);

        cache.save(&t).await.unwrap();
        let first = cache.lookup("a1").await.unwrap();
        cache.save(&t).await.unwrap();
        let second = cache.lookup("a1").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.live_keys().await.len(), 2);
    }

    #[tokio::test]
    async fn test_lookup_unknown_is_absent() {
        let store = InMemoryTokenStore::new();
        let cache = cache_over(&store, RefreshTtlPolicy::Clamp);

        let lookup = cache.lookup("nobody").await.unwrap();
        assert_eq!(lookup.token, None);
        assert!(lookup.access_expired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_scenario_fresh_stale_absent() {
        let store = InMemoryTokenStore::new();
        let cache = cache_over(&store, RefreshTtlPolicy::Clamp);
        let t1 = token("T1", 5, 3600);
        cache.save(&t1).await.unwrap();

        let lookup = cache.lookup("T1").await.unwrap();
        assert_eq!(lookup, CacheLookup::fresh(t1.clone()));

        tokio::time::advance(Duration::from_secs(5)).await;
        let lookup = cache.lookup("T1").await.unwrap();
        assert_eq!(lookup, CacheLookup::stale(t1));

        tokio::time::advance(Duration::from_secs(3595)).await;
        let lookup = cache.lookup("T1").await.unwrap();
        assert_eq!(lookup, CacheLookup::absent());
    }

    #[tokio::test]
    async fn test_zero_access_lease_is_immediately_stale() {
        let store = InMemoryTokenStore::new();
        let cache = cache_over(&store, RefreshTtlPolicy::Clamp);
        let t = token("a1", 0, 60);

        cache.save(&t).await.unwrap();
        let lookup = cache.lookup("a1").await.unwrap();

        assert_eq!(lookup, CacheLookup::stale(t));
        assert_eq!(store.live_keys().await, vec!["refresh:a1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clamp_policy_extends_refresh_record() {
        let store = InMemoryTokenStore::new();
        let cache = cache_over(&store, RefreshTtlPolicy::Clamp);
        let t = token("a1", 60, 10);

        cache.save(&t).await.unwrap();

        // Refresh record lives as long as the access record, not 10s
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(store.live_keys().await.len(), 2);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(cache.lookup("a1").await.unwrap(), CacheLookup::absent());
    }

    #[tokio::test]
    async fn test_reject_policy_refuses_inconsistent_lifetimes() {
        let store = InMemoryTokenStore::new();
        let cache = cache_over(&store, RefreshTtlPolicy::Reject);

        let result = cache.save(&token("a1", 60, 10)).await;

        assert_eq!(
            result,
            Err(CacheError::InvalidLifetime {
                expires_in: 60,
                refresh_expires_in: 10
            })
        );
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn test_reject_policy_accepts_equal_lifetimes() {
        let store = InMemoryTokenStore::new();
        let cache = cache_over(&store, RefreshTtlPolicy::Reject);

        cache.save(&token("a1", 60, 60)).await.unwrap();
        assert_eq!(store.writes(), 2);
    }

    #[tokio::test]
    async fn test_unreadable_access_record_falls_back_to_refresh() {
        let store = InMemoryTokenStore::new();
        let cache = cache_over(&store, RefreshTtlPolicy::Clamp);
        let t = token("a1", 300, 1800);
        cache.save(&t).await.unwrap();
        store.set_ex("access:a1", "{not json", 300).await.unwrap();

        let lookup = cache.lookup("a1").await.unwrap();
        assert_eq!(lookup, CacheLookup::stale(t));
    }

    #[tokio::test]
    async fn test_incomplete_records_are_absent() {
        let store = InMemoryTokenStore::new();
        let cache = cache_over(&store, RefreshTtlPolicy::Clamp);
        store
            .set_ex("access:a1", r#"{"access_token":"a1"}"#, 300)
            .await
            .unwrap();
        store.set_ex("refresh:a1", "garbage", 300).await.unwrap();

        assert_eq!(cache.lookup("a1").await.unwrap(), CacheLookup::absent());
    }

    #[tokio::test]
    async fn test_lookup_returns_record_even_when_key_differs() {
        // Detecting the mismatch is the caller's job
        let store = InMemoryTokenStore::new();
        let cache = cache_over(&store, RefreshTtlPolicy::Clamp);
        let other = token("someone-else", 300, 1800);
        store
            .set_ex("access:a1", &serde_json::to_string(&other).unwrap(), 300)
            .await
            .unwrap();

        let lookup = cache.lookup("a1").await.unwrap();
        assert_eq!(lookup.token.unwrap().access_token, "someone-else");
    }

    #[tokio::test]
    async fn test_store_failure_surfaces() {
        let store = InMemoryTokenStore::new();
        let cache = cache_over(&store, RefreshTtlPolicy::Clamp);
        store.set_unavailable(true);

        assert!(matches!(cache.lookup("a1").await, Err(CacheError::Store(_))));
        assert!(matches!(
            cache.save(&token("a1", 60, 60)).await,
            Err(CacheError::Store(_))
        ));
        assert!(cache.ping().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_write_leaves_access_record_only() {
        let store = InMemoryTokenStore::new();
        let cache = cache_over(&store, RefreshTtlPolicy::Clamp);
        store.fail_writes_matching(Some("refresh:")).await;
        let t = token("a1", 300, 1800);

        assert!(matches!(cache.save(&t).await, Err(CacheError::Store(_))));
        assert_eq!(store.live_keys().await, vec!["access:a1".to_string()]);

        // Half-saved token still verifies while its access lease lasts
        assert_eq!(cache.lookup("a1").await.unwrap(), CacheLookup::fresh(t));

        // But there is nothing to renew from afterwards
        tokio::time::advance(Duration::from_secs(300)).await;
        assert_eq!(cache.lookup("a1").await.unwrap(), CacheLookup::absent());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_store_times_out() {
        let store = InMemoryTokenStore::new();
        let cache = cache_over(&store, RefreshTtlPolicy::Clamp);
        store.set_latency(Some(Duration::from_secs(5))).await;

        assert_eq!(cache.lookup("a1").await, Err(CacheError::Timeout));
        assert_eq!(cache.save(&token("a1", 60, 60)).await, Err(CacheError::Timeout));
    }

    #[tokio::test]
    async fn test_ping() {
        let store = InMemoryTokenStore::new();
        let cache = cache_over(&store, RefreshTtlPolicy::Clamp);
        assert!(cache.ping().await.is_ok());
    }
}
