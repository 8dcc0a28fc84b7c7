//! HTTP routes for the verify gateway.
//!
//! Defines the Axum router and application state.

use crate::auth::SignatureVerifier;
use crate::cache::{TokenCache, TokenStore};
use crate::config::Config;
use crate::handlers;
use crate::services::{IdpClient, RefreshCoordinator, TokenRenewer};
use crate::verification::VerificationOrchestrator;
use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Token cache, shared with the orchestrator.
    pub cache: TokenCache,

    /// Per-request verification state machine.
    pub orchestrator: Arc<VerificationOrchestrator>,

    /// Identity provider client (code exchange, authorize URL).
    pub idp: Arc<IdpClient>,
}

impl AppState {
    /// Wire the verification pipeline from its collaborators.
    ///
    /// `renewer` is normally `idp` itself; tests substitute a mock.
    pub fn new(
        config: Config,
        store: Arc<dyn TokenStore>,
        verifier: SignatureVerifier,
        idp: Arc<IdpClient>,
        renewer: Arc<dyn TokenRenewer>,
    ) -> Self {
        let cache = TokenCache::new(store, config.cache_timeout, config.refresh_ttl_policy);
        let refresher = RefreshCoordinator::new(
            renewer,
            config.refresh_timeout,
            config.single_flight_refresh,
        );
        let orchestrator = Arc::new(VerificationOrchestrator::new(
            verifier,
            cache.clone(),
            refresher,
        ));

        Self {
            config,
            cache,
            orchestrator,
            idp,
        }
    }
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/verify` - Forward-auth verification
/// - `/oidc/callback` - Authorization-code callback (GET, HEAD, POST)
/// - `/health` - Liveness check (simple "OK")
/// - `/ready` - Readiness check (pings the cache store)
/// - `/metrics` - Prometheus metrics endpoint
/// - TraceLayer for request logging
/// - 30 second request timeout
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let gateway_routes = Router::new()
        .route("/verify", get(handlers::verify))
        .route(
            "/oidc/callback",
            get(handlers::oidc_callback).post(handlers::oidc_callback),
        )
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .with_state(state);

    // Metrics route with its own state
    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    gateway_routes
        .merge(metrics_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
}
