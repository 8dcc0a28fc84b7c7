//! Test server harness for E2E testing
//!
//! Provides `TestGatewayServer` for spawning real gateway instances in tests.
//! Each server gets its own in-memory token store, its own signing keypair
//! and a wiremock identity provider serving the token endpoint at `/token`.

use crate::crypto_fixtures::TestKeypair;
use crate::token_builders::TestClaimsBuilder;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use verify_gateway::auth::SignatureVerifier;
use verify_gateway::cache::{InMemoryTokenStore, TokenCache};
use verify_gateway::config::Config;
use verify_gateway::models::TokenData;
use verify_gateway::routes::{self, AppState};
use verify_gateway::services::IdpClient;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path of the token endpoint on the mock identity provider.
pub const IDP_TOKEN_PATH: &str = "/token";

/// Path of the authorize endpoint on the mock identity provider.
pub const IDP_AUTHORIZE_PATH: &str = "/auth";

static SERVER_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Test harness for spawning the verify gateway in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health_flow_e2e() -> Result<()> {
///     let server = TestGatewayServer::spawn().await?;
///
///     let response = TestGatewayServer::client()
///         .get(format!("{}/health", server.url()))
///         .send()
///         .await?;
///
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestGatewayServer {
    addr: SocketAddr,
    idp: MockServer,
    store: InMemoryTokenStore,
    keypair: TestKeypair,
    state: Arc<AppState>,
    _handle: JoinHandle<()>,
}

impl TestGatewayServer {
    /// Spawn a server with default test configuration.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(&[]).await
    }

    /// Spawn a server, overriding configuration variables.
    ///
    /// The server will:
    /// - Start a wiremock identity provider
    /// - Write the keypair's public key to a temp PEM file and load it
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the HTTP server in the background
    pub async fn spawn_with(overrides: &[(&str, &str)]) -> Result<Self, anyhow::Error> {
        let idp = MockServer::start().await;
        let keypair = TestKeypair::new(42)?;
        let instance = SERVER_COUNTER.fetch_add(1, Ordering::SeqCst);
        let key_path = keypair.write_public_key_pem(&format!("harness-{instance}"))?;

        let mut vars = HashMap::from([
            ("REDIS_URL".to_string(), "redis://unused".to_string()),
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            (
                "JWT_PUBLIC_KEY_PATH".to_string(),
                key_path.to_string_lossy().into_owned(),
            ),
            ("JWT_ALGORITHMS".to_string(), "EdDSA".to_string()),
            (
                "OIDC_AUTHORIZE_URL".to_string(),
                format!("{}{}", idp.uri(), IDP_AUTHORIZE_PATH),
            ),
            (
                "OIDC_TOKEN_URL".to_string(),
                format!("{}{}", idp.uri(), IDP_TOKEN_PATH),
            ),
            ("OIDC_CLIENT_ID".to_string(), "test-gateway".to_string()),
            ("OIDC_CLIENT_SECRET".to_string(), "test-gateway-secret".to_string()),
            (
                "OIDC_REDIRECT_URI".to_string(),
                "http://gateway.test/oidc/callback".to_string(),
            ),
            ("HOME_URL".to_string(), "/home".to_string()),
            ("REFRESH_TIMEOUT_MS".to_string(), "2000".to_string()),
        ]);
        for (name, value) in overrides {
            vars.insert((*name).to_string(), (*value).to_string());
        }

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let verifier = SignatureVerifier::from_pem_file(
            &config.jwt_public_key_path,
            &config.jwt_algorithms,
            config.jwt_leeway_seconds,
        )
        .map_err(|e| anyhow::anyhow!("Failed to load test public key: {}", e))?;

        let idp_client = Arc::new(
            IdpClient::new(&config)
                .map_err(|e| anyhow::anyhow!("Failed to build IdP client: {}", e))?,
        );

        let store = InMemoryTokenStore::new();
        let state = Arc::new(AppState::new(
            config,
            Arc::new(store.clone()),
            verifier,
            idp_client.clone(),
            idp_client,
        ));

        // Local handle; no global recorder is installed in tests
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
        let app = routes::build_routes(state.clone(), metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            idp,
            store,
            keypair,
            state,
            _handle: handle,
        })
    }

    /// HTTP client that does not follow redirects, so 307s can be asserted.
    pub fn client() -> reqwest::Client {
        reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("Failed to build test HTTP client")
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The mock identity provider.
    pub fn idp(&self) -> &MockServer {
        &self.idp
    }

    /// The in-memory store backing the token cache.
    pub fn store(&self) -> &InMemoryTokenStore {
        &self.store
    }

    /// The token cache the server uses.
    pub fn cache(&self) -> &TokenCache {
        &self.state.cache
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.state.config
    }

    /// URL unauthenticated requests are redirected to.
    pub fn authorize_url(&self) -> &str {
        self.state.idp.authorize_url()
    }

    /// Sign an access token the server accepts, expiring in `seconds`.
    pub fn sign_access_token(&self, seconds: i64) -> Result<String, anyhow::Error> {
        Ok(self.keypair.sign(
            &TestClaimsBuilder::new()
                .for_user("alice")
                .expires_in(seconds)
                .build(),
        )?)
    }

    /// Put `token` in the cache as if the callback had issued it.
    pub async fn seed_token(&self, token: &TokenData) -> Result<(), anyhow::Error> {
        self.state
            .cache
            .save(token)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to seed token: {}", e))
    }

    /// Answer every token-endpoint request with `response`.
    pub async fn mock_token_endpoint(&self, response: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path(IDP_TOKEN_PATH))
            .respond_with(response)
            .mount(&self.idp)
            .await;
    }

    /// Number of requests the token endpoint received.
    pub async fn token_endpoint_calls(&self) -> usize {
        self.idp
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path() == IDP_TOKEN_PATH)
            .count()
    }
}

impl Drop for TestGatewayServer {
    fn drop(&mut self) {
        // Abort the HTTP server task so the port is released when the test ends
        self._handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_server_spawns_successfully() -> Result<(), anyhow::Error> {
        let server = TestGatewayServer::spawn().await?;

        assert!(server.url().starts_with("http://127.0.0.1:"));

        let response = reqwest::get(format!("{}/health", server.url())).await?;
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await?, "OK");

        Ok(())
    }

    #[tokio::test]
    async fn test_server_provides_addr() -> Result<(), anyhow::Error> {
        let server = TestGatewayServer::spawn().await?;

        let addr = server.addr();
        assert!(addr.ip().is_loopback());
        assert!(addr.port() > 0);
        assert_eq!(server.url(), format!("http://{}", addr));

        Ok(())
    }

    #[tokio::test]
    async fn test_overrides_apply() -> Result<(), anyhow::Error> {
        let server = TestGatewayServer::spawn_with(&[("HOME_URL", "/dashboard")]).await?;

        assert_eq!(server.config().home_url, "/dashboard");
        assert!(server
            .authorize_url()
            .starts_with(&format!("{}{}", server.idp().uri(), IDP_AUTHORIZE_PATH)));

        Ok(())
    }
}
