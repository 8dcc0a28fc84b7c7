//! Per-request verification state machine.
//!
//! | Evidence | Action | Verdict |
//! |---|---|---|
//! | no credential | - | `Unauthenticated` |
//! | signature invalid | - | `Unauthenticated` |
//! | signature valid or expired | cache lookup | continue |
//! | lookup absent or store failure | - | `Unauthenticated` |
//! | cached `access_token` differs from credential | - | `ServerError` |
//! | access record live | - | `Authenticated` |
//! | only refresh record live | refresh, save | `Authenticated` with new token |
//! | refresh or save fails | - | `Unauthenticated` |
//!
//! The cache decides freshness. A token whose embedded `exp` has passed but
//! whose access record is still live is authenticated; a token with a
//! future `exp` whose access record lapsed is renewed.
//!
//! Steps run strictly in sequence within one request: verify, lookup,
//! optionally refresh, optionally save.

use crate::auth::{SignatureCheck, SignatureVerifier};
use crate::cache::TokenCache;
use crate::models::TokenData;
use crate::observability::hash_for_correlation;
use crate::observability::metrics::record_verify_outcome;
use crate::services::RefreshCoordinator;
use std::time::Instant;
use tracing::{debug, error, instrument, warn};

/// Diagnostic returned when a cached record does not belong to its key.
pub const CACHE_CORRUPTION_MESSAGE: &str = "cached token differs from original";

/// Why a request was not authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnauthenticatedReason {
    /// Neither cookie nor bearer header carried a token.
    NoCredential,
    /// Bad signature, malformed or oversized token.
    SignatureInvalid,
    /// Neither cache record exists.
    CacheMiss,
    /// The cache store failed or timed out.
    CacheUnavailable,
    /// The identity provider did not renew the token.
    RefreshFailed,
    /// The renewed token could not be cached.
    SaveFailed,
}

impl UnauthenticatedReason {
    fn label(self) -> &'static str {
        match self {
            Self::NoCredential => "no_credential",
            Self::SignatureInvalid => "signature_invalid",
            Self::CacheMiss => "cache_miss",
            Self::CacheUnavailable => "cache_unavailable",
            Self::RefreshFailed => "refresh_failed",
            Self::SaveFailed => "save_failed",
        }
    }
}

/// Outcome of verifying one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Let the request through. `renewed` carries a replacement token the
    /// client must be given.
    Authenticated { renewed: Option<TokenData> },

    /// Send the client to log in.
    Unauthenticated(UnauthenticatedReason),

    /// Hard failure with a plain-text diagnostic.
    ServerError(&'static str),
}

impl Verdict {
    /// Bounded metrics label.
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Authenticated { renewed: None } => "authenticated",
            Verdict::Authenticated { renewed: Some(_) } => "renewed",
            Verdict::Unauthenticated(reason) => reason.label(),
            Verdict::ServerError(_) => "server_error",
        }
    }
}

/// Sequences signature verification, cache lookup and refresh.
pub struct VerificationOrchestrator {
    verifier: SignatureVerifier,
    cache: TokenCache,
    refresher: RefreshCoordinator,
}

impl VerificationOrchestrator {
    pub fn new(verifier: SignatureVerifier, cache: TokenCache, refresher: RefreshCoordinator) -> Self {
        Self {
            verifier,
            cache,
            refresher,
        }
    }

    /// Decide whether `credential` authenticates the request.
    #[instrument(skip_all, name = "gw.verify")]
    pub async fn verify(&self, credential: Option<&str>) -> Verdict {
        let start = Instant::now();
        let verdict = self.evaluate(credential).await;
        record_verify_outcome(verdict.label(), start.elapsed());
        verdict
    }

    async fn evaluate(&self, credential: Option<&str>) -> Verdict {
        let Some(token) = credential.filter(|t| !t.is_empty()) else {
            debug!(target: "gw.verify", "No credential presented");
            return Verdict::Unauthenticated(UnauthenticatedReason::NoCredential);
        };
        let correlation = hash_for_correlation(token);

        match self.verifier.verify(token) {
            SignatureCheck::Invalid => {
                debug!(target: "gw.verify", token = %correlation, "Credential signature invalid");
                return Verdict::Unauthenticated(UnauthenticatedReason::SignatureInvalid);
            }
            SignatureCheck::Expired => {
                debug!(target: "gw.verify", token = %correlation, "Credential expired, consulting cache");
            }
            SignatureCheck::Valid => {}
        }

        let lookup = match self.cache.lookup(token).await {
            Ok(lookup) => lookup,
            Err(e) => {
                warn!(target: "gw.verify", token = %correlation, error = %e, "Cache lookup failed, treating as miss");
                return Verdict::Unauthenticated(UnauthenticatedReason::CacheUnavailable);
            }
        };

        let Some(cached) = lookup.token else {
            warn!(target: "gw.verify", token = %correlation, "Token not found in cache");
            return Verdict::Unauthenticated(UnauthenticatedReason::CacheMiss);
        };

        if cached.access_token != token {
            error!(
                target: "gw.verify",
                token = %correlation,
                cached = %hash_for_correlation(&cached.access_token),
                "Cached token differs from presented credential"
            );
            return Verdict::ServerError(CACHE_CORRUPTION_MESSAGE);
        }

        if !lookup.access_expired {
            return Verdict::Authenticated { renewed: None };
        }

        debug!(target: "gw.verify", token = %correlation, "Access lease lapsed, refreshing");
        let renewed = match self.refresher.refresh(&cached).await {
            Ok(renewed) => renewed,
            Err(failure) => {
                debug!(
                    target: "gw.verify",
                    token = %correlation,
                    upstream_status = ?failure.status,
                    upstream_body = %failure.body,
                    "Refresh failed"
                );
                return Verdict::Unauthenticated(UnauthenticatedReason::RefreshFailed);
            }
        };

        if let Err(e) = self.cache.save(&renewed).await {
            error!(target: "gw.verify", token = %correlation, error = %e, "Failed to cache renewed token");
            return Verdict::Unauthenticated(UnauthenticatedReason::SaveFailed);
        }

        Verdict::Authenticated {
            renewed: Some(renewed),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::cache::token_cache::{access_key, refresh_key};
    use crate::cache::{InMemoryTokenStore, RefreshTtlPolicy, TokenStore};
    use crate::services::idp_client::mock::MockRenewer;
    use gateway_test_utils::crypto_fixtures::TestKeypair;
    use gateway_test_utils::token_builders::TestClaimsBuilder;
    use jsonwebtoken::{Algorithm, DecodingKey};
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixture {
        keypair: TestKeypair,
        store: InMemoryTokenStore,
        renewer: Arc<MockRenewer>,
        cache: TokenCache,
        orchestrator: VerificationOrchestrator,
    }

    impl Fixture {
        fn new(renewer: MockRenewer) -> Self {
            Self::with_options(renewer, RefreshTtlPolicy::Clamp, false)
        }

        fn with_options(renewer: MockRenewer, policy: RefreshTtlPolicy, single_flight: bool) -> Self {
            let keypair = TestKeypair::new(1).unwrap();
            let key = DecodingKey::from_ed_pem(keypair.public_key_pem().as_bytes()).unwrap();
            let verifier = SignatureVerifier::new(key, vec![Algorithm::EdDSA], 0);

            let store = InMemoryTokenStore::new();
            let cache = TokenCache::new(Arc::new(store.clone()), Duration::from_secs(1), policy);
            let renewer = Arc::new(renewer);
            let refresher = RefreshCoordinator::new(renewer.clone(), Duration::from_secs(10), single_flight);

            Self {
                keypair,
                orchestrator: VerificationOrchestrator::new(verifier, cache.clone(), refresher),
                store,
                renewer,
                cache,
            }
        }

        fn jwt(&self) -> String {
            self.keypair
                .sign(&TestClaimsBuilder::new().expires_in(300).build())
                .unwrap()
        }

        fn expired_jwt(&self) -> String {
            self.keypair
                .sign(&TestClaimsBuilder::new().expired_seconds_ago(60).build())
                .unwrap()
        }
    }

    fn token_for(access_token: &str, expires_in: u64, refresh_expires_in: u64) -> TokenData {
        TokenData {
            access_token: access_token.to_string(),
            refresh_token: format!("refresh-{}", access_token.len()),
            expires_in,
            refresh_expires_in,
        }
    }

    fn renewed(call: usize) -> TokenData {
        TokenData {
            access_token: format!("renewed-access-{call}"),
            refresh_token: format!("renewed-refresh-{call}"),
            expires_in: 300,
            refresh_expires_in: 1800,
        }
    }

    fn numbered_renewer() -> MockRenewer {
        MockRenewer::with_responder(|call, _| Ok(renewed(call)))
    }

    #[tokio::test]
    async fn test_no_credential_is_unauthenticated_without_cache_io() {
        let fx = Fixture::new(numbered_renewer());

        assert_eq!(
            fx.orchestrator.verify(None).await,
            Verdict::Unauthenticated(UnauthenticatedReason::NoCredential)
        );
        assert_eq!(
            fx.orchestrator.verify(Some("")).await,
            Verdict::Unauthenticated(UnauthenticatedReason::NoCredential)
        );
        assert_eq!(fx.store.reads(), 0);
    }

    #[tokio::test]
    async fn test_malformed_token_is_unauthenticated_without_cache_io() {
        let fx = Fixture::new(numbered_renewer());

        for garbage in ["garbage", "a.b.c", "eyJhbGciOiJub25lIn0.e30."] {
            assert_eq!(
                fx.orchestrator.verify(Some(garbage)).await,
                Verdict::Unauthenticated(UnauthenticatedReason::SignatureInvalid)
            );
        }
        assert_eq!(fx.store.reads(), 0);
        assert_eq!(fx.store.writes(), 0);
    }

    #[tokio::test]
    async fn test_foreign_signature_is_unauthenticated_without_cache_io() {
        let fx = Fixture::new(numbered_renewer());
        let foreign = TestKeypair::new(2)
            .unwrap()
            .sign(&TestClaimsBuilder::new().expires_in(300).build())
            .unwrap();
        fx.cache.save(&token_for(&foreign, 300, 1800)).await.unwrap();
        let reads_before = fx.store.reads();

        assert_eq!(
            fx.orchestrator.verify(Some(&foreign)).await,
            Verdict::Unauthenticated(UnauthenticatedReason::SignatureInvalid)
        );
        assert_eq!(fx.store.reads(), reads_before);
    }

    #[tokio::test]
    async fn test_valid_token_with_live_access_record_is_authenticated() {
        let fx = Fixture::new(numbered_renewer());
        let jwt = fx.jwt();
        fx.cache.save(&token_for(&jwt, 300, 1800)).await.unwrap();

        assert_eq!(
            fx.orchestrator.verify(Some(&jwt)).await,
            Verdict::Authenticated { renewed: None }
        );
        assert_eq!(fx.renewer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_expired_signature_with_live_access_record_is_authenticated() {
        let fx = Fixture::new(numbered_renewer());
        let jwt = fx.expired_jwt();
        fx.cache.save(&token_for(&jwt, 300, 1800)).await.unwrap();

        assert_eq!(
            fx.orchestrator.verify(Some(&jwt)).await,
            Verdict::Authenticated { renewed: None }
        );
        assert_eq!(fx.renewer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_token_is_unauthenticated_not_server_error() {
        let fx = Fixture::new(numbered_renewer());
        let jwt = fx.jwt();

        assert_eq!(
            fx.orchestrator.verify(Some(&jwt)).await,
            Verdict::Unauthenticated(UnauthenticatedReason::CacheMiss)
        );
        assert_eq!(fx.renewer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_lapsed_access_record_refreshes_exactly_once() {
        let fx = Fixture::new(numbered_renewer());
        let jwt = fx.jwt();
        // Zero access lease: only the refresh record is written
        fx.cache.save(&token_for(&jwt, 0, 1800)).await.unwrap();

        let verdict = fx.orchestrator.verify(Some(&jwt)).await;

        assert_eq!(
            verdict,
            Verdict::Authenticated {
                renewed: Some(renewed(0))
            }
        );
        assert_eq!(fx.renewer.call_count(), 1);

        let lookup = fx.cache.lookup("renewed-access-0").await.unwrap();
        assert_eq!(lookup.token, Some(renewed(0)));
        assert!(!lookup.access_expired);
    }

    #[tokio::test]
    async fn test_valid_signature_with_lapsed_access_record_still_refreshes() {
        let fx = Fixture::new(numbered_renewer());
        let jwt = fx.jwt();
        let record = serde_json::to_string(&token_for(&jwt, 300, 1800)).unwrap();
        fx.store.set_ex(&refresh_key(&jwt), &record, 1800).await.unwrap();

        let verdict = fx.orchestrator.verify(Some(&jwt)).await;

        assert!(matches!(verdict, Verdict::Authenticated { renewed: Some(_) }));
        assert_eq!(fx.renewer.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_access_lease_lapse_over_time_triggers_refresh() {
        let fx = Fixture::new(numbered_renewer());
        let jwt = fx.jwt();
        fx.cache.save(&token_for(&jwt, 5, 3600)).await.unwrap();

        assert_eq!(
            fx.orchestrator.verify(Some(&jwt)).await,
            Verdict::Authenticated { renewed: None }
        );

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(
            fx.orchestrator.verify(Some(&jwt)).await,
            Verdict::Authenticated {
                renewed: Some(renewed(0))
            }
        );

        tokio::time::advance(Duration::from_secs(3595)).await;
        assert_eq!(
            fx.orchestrator.verify(Some(&jwt)).await,
            Verdict::Unauthenticated(UnauthenticatedReason::CacheMiss)
        );
        assert_eq!(fx.renewer.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mismatched_cached_record_is_server_error() {
        let fx = Fixture::new(numbered_renewer());
        let jwt = fx.jwt();
        let other = serde_json::to_string(&token_for("some-other-token", 300, 1800)).unwrap();
        fx.store.set_ex(&access_key(&jwt), &other, 300).await.unwrap();

        assert_eq!(
            fx.orchestrator.verify(Some(&jwt)).await,
            Verdict::ServerError(CACHE_CORRUPTION_MESSAGE)
        );
        assert_eq!(fx.renewer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_mismatched_refresh_record_is_server_error_without_refresh() {
        let fx = Fixture::new(numbered_renewer());
        let jwt = fx.jwt();
        let other = serde_json::to_string(&token_for("some-other-token", 300, 1800)).unwrap();
        fx.store.set_ex(&refresh_key(&jwt), &other, 1800).await.unwrap();

        assert_eq!(
            fx.orchestrator.verify(Some(&jwt)).await,
            Verdict::ServerError(CACHE_CORRUPTION_MESSAGE)
        );
        assert_eq!(fx.renewer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_refresh_rejection_leaves_cache_unmodified() {
        let fx = Fixture::new(MockRenewer::rejecting(401, r#"{"error":"invalid_grant"}"#));
        let jwt = fx.jwt();
        fx.cache.save(&token_for(&jwt, 0, 1800)).await.unwrap();
        let keys_before = fx.store.live_keys().await;
        let writes_before = fx.store.writes();

        assert_eq!(
            fx.orchestrator.verify(Some(&jwt)).await,
            Verdict::Unauthenticated(UnauthenticatedReason::RefreshFailed)
        );
        assert_eq!(fx.renewer.call_count(), 1);
        assert_eq!(fx.store.writes(), writes_before);
        assert_eq!(fx.store.live_keys().await, keys_before);
    }

    #[tokio::test]
    async fn test_cache_failure_fails_closed() {
        let fx = Fixture::new(numbered_renewer());
        let jwt = fx.jwt();
        fx.cache.save(&token_for(&jwt, 300, 1800)).await.unwrap();
        fx.store.set_unavailable(true);

        assert_eq!(
            fx.orchestrator.verify(Some(&jwt)).await,
            Verdict::Unauthenticated(UnauthenticatedReason::CacheUnavailable)
        );
    }

    #[tokio::test]
    async fn test_save_failure_after_refresh_fails_closed() {
        // Renewed token with a refresh lease shorter than its access lease
        let renewer = MockRenewer::renewing(token_for("renewed", 300, 10));
        let fx = Fixture::with_options(renewer, RefreshTtlPolicy::Reject, false);
        let jwt = fx.jwt();
        fx.cache.save(&token_for(&jwt, 0, 1800)).await.unwrap();

        assert_eq!(
            fx.orchestrator.verify(Some(&jwt)).await,
            Verdict::Unauthenticated(UnauthenticatedReason::SaveFailed)
        );
        assert_eq!(fx.renewer.call_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_double_refresh_both_succeed() {
        let fx = Fixture::new(numbered_renewer());
        let jwt = fx.jwt();
        fx.cache.save(&token_for(&jwt, 0, 1800)).await.unwrap();

        let (a, b) = tokio::join!(
            fx.orchestrator.verify(Some(&jwt)),
            fx.orchestrator.verify(Some(&jwt))
        );

        assert_eq!(fx.renewer.call_count(), 2);
        for verdict in [a, b] {
            let Verdict::Authenticated {
                renewed: Some(token),
            } = verdict
            else {
                panic!("expected renewal, got {verdict:?}");
            };
            let lookup = fx.cache.lookup(&token.access_token).await.unwrap();
            assert_eq!(lookup.token, Some(token));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_flight_shares_one_renewal() {
        let renewer = numbered_renewer().with_latency(Duration::from_millis(50));
        let fx = Fixture::with_options(renewer, RefreshTtlPolicy::Clamp, true);
        let jwt = fx.jwt();
        fx.cache.save(&token_for(&jwt, 0, 1800)).await.unwrap();

        let (a, b) = tokio::join!(
            fx.orchestrator.verify(Some(&jwt)),
            fx.orchestrator.verify(Some(&jwt))
        );

        assert_eq!(fx.renewer.call_count(), 1);
        assert_eq!(a, b);
        assert_eq!(
            a,
            Verdict::Authenticated {
                renewed: Some(renewed(0))
            }
        );
    }

    #[test]
    fn test_verdict_labels() {
        assert_eq!(Verdict::Authenticated { renewed: None }.label(), "authenticated");
        assert_eq!(
            Verdict::Authenticated {
                renewed: Some(renewed(0))
            }
            .label(),
            "renewed"
        );
        assert_eq!(
            Verdict::Unauthenticated(UnauthenticatedReason::CacheMiss).label(),
            "cache_miss"
        );
        assert_eq!(
            Verdict::ServerError(CACHE_CORRUPTION_MESSAGE).label(),
            "server_error"
        );
    }
}
