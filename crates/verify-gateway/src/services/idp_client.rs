//! Identity provider (OIDC) client.
//!
//! Talks to the provider's token endpoint for the two grants the gateway
//! uses:
//!
//! - `authorization_code` - the login callback trades `?code=` for tokens
//! - `refresh_token` - silent renewal of a lapsed access lease
//!
//! Both are form-encoded POSTs authenticated with the client id and secret
//! in the body, answered with a JSON OAuth token response.
//!
//! # Security
//!
//! - The client secret is held as a `SecretString` and only exposed when
//!   building the form body
//! - Response bodies are logged at trace level only
//! - Timeouts prevent hanging connections

use crate::config::Config;
use crate::errors::GatewayError;
use crate::models::TokenData;
use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use reqwest::{Client, Url};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, instrument, trace, warn};

/// Connect timeout for token endpoint requests in seconds.
const IDP_CONNECT_TIMEOUT_SECS: u64 = 5;

/// A failed call to the token endpoint.
///
/// `status` is the HTTP status the provider answered with, `None` when no
/// response arrived (connect failure, timeout). `body` carries the
/// provider's response body, or a local description when there is none.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Token endpoint call failed (status {status:?})")]
pub struct UpstreamFailure {
    pub status: Option<u16>,
    pub body: String,
}

impl UpstreamFailure {
    /// Failure with no HTTP response.
    pub fn transport(body: impl Into<String>) -> Self {
        Self {
            status: None,
            body: body.into(),
        }
    }

    /// Whether the provider explicitly refused the grant (4xx).
    pub fn is_rejection(&self) -> bool {
        matches!(self.status, Some(400..=499))
    }
}

/// Renewal of an access token with a refresh token.
#[async_trait]
pub trait TokenRenewer: Send + Sync {
    /// Exchange `refresh_token` for a new `TokenData`.
    async fn renew(&self, refresh_token: &str) -> Result<TokenData, UpstreamFailure>;
}

/// OAuth token endpoint response body.
#[derive(Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: u64,
    #[serde(default)]
    refresh_expires_in: Option<u64>,
}

/// Custom Debug implementation that redacts both tokens.
impl fmt::Debug for OAuthTokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthTokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .field("refresh_expires_in", &self.refresh_expires_in)
            .finish()
    }
}

impl OAuthTokenResponse {
    /// Convert to `TokenData`. A response without `refresh_expires_in` gets
    /// the access lease; one without `refresh_token` is unusable.
    fn into_token_data(self) -> Result<TokenData, &'static str> {
        let refresh_token = self
            .refresh_token
            .filter(|t| !t.is_empty())
            .ok_or("token response has no refresh_token")?;

        if self.access_token.is_empty() {
            return Err("token response has an empty access_token");
        }

        Ok(TokenData {
            refresh_expires_in: self.refresh_expires_in.unwrap_or(self.expires_in),
            access_token: self.access_token,
            refresh_token,
            expires_in: self.expires_in,
        })
    }
}

/// Build the URL the browser is sent to for login.
///
/// `{authorize_url}?response_type=code&client_id=..&redirect_uri=..&scope=..`,
/// keeping any query parameters already present on `authorize_url`.
pub fn build_authorize_url(
    authorize_url: &Url,
    client_id: &str,
    redirect_uri: &str,
    scope: &str,
) -> String {
    let mut url = authorize_url.clone();
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("scope", scope);
    url.to_string()
}

/// HTTP client for the identity provider's token endpoint.
#[derive(Clone)]
pub struct IdpClient {
    /// HTTP client with configured timeouts.
    client: Client,

    token_url: Url,
    client_id: String,
    client_secret: SecretString,
    redirect_uri: String,

    /// Login redirect target, built once.
    authorize_url: String,
}

impl IdpClient {
    /// Create a client from configuration.
    ///
    /// Requests are bounded by `config.refresh_timeout`.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Internal` if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(config.refresh_timeout)
            .connect_timeout(Duration::from_secs(IDP_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                error!(target: "gw.idp", error = %e, "Failed to build HTTP client");
                GatewayError::Internal
            })?;

        Ok(Self {
            client,
            token_url: config.oidc_token_url.clone(),
            client_id: config.oidc_client_id.clone(),
            client_secret: config.oidc_client_secret.clone(),
            redirect_uri: config.oidc_redirect_uri.clone(),
            authorize_url: build_authorize_url(
                &config.oidc_authorize_url,
                &config.oidc_client_id,
                &config.oidc_redirect_uri,
                &config.oidc_scope,
            ),
        })
    }

    /// Where unauthenticated browsers are redirected.
    pub fn authorize_url(&self) -> &str {
        &self.authorize_url
    }

    /// Trade an authorization code for tokens.
    ///
    /// # Errors
    ///
    /// `UpstreamFailure` carrying the provider's status and body on any
    /// non-success answer, or no status when the request never completed.
    #[instrument(skip_all, name = "gw.idp.exchange_code")]
    pub async fn exchange_code(&self, code: &str) -> Result<TokenData, UpstreamFailure> {
        self.token_request(
            "authorization_code",
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
            ],
        )
        .await
    }

    async fn token_request(
        &self,
        grant: &'static str,
        grant_params: &[(&str, &str)],
    ) -> Result<TokenData, UpstreamFailure> {
        let mut form: Vec<(&str, &str)> = grant_params.to_vec();
        form.push(("client_id", self.client_id.as_str()));
        form.push(("client_secret", self.client_secret.expose_secret()));

        let response = self
            .client
            .post(self.token_url.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                warn!(target: "gw.idp", grant, error = %e, "Token endpoint request failed");
                if e.is_timeout() {
                    UpstreamFailure::transport("token endpoint timed out")
                } else {
                    UpstreamFailure::transport(format!("token endpoint unreachable: {e}"))
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            warn!(target: "gw.idp", grant, status = status.as_u16(), error = %e, "Failed to read token endpoint response");
            UpstreamFailure {
                status: Some(status.as_u16()),
                body: format!("failed to read response body: {e}"),
            }
        })?;

        if !status.is_success() {
            // Log body at trace level only - may contain provider diagnostics
            trace!(target: "gw.idp", grant, status = status.as_u16(), body = %body, "Token endpoint error body");
            debug!(target: "gw.idp", grant, status = status.as_u16(), "Token endpoint refused grant");
            return Err(UpstreamFailure {
                status: Some(status.as_u16()),
                body,
            });
        }

        let parsed: OAuthTokenResponse = serde_json::from_str(&body).map_err(|e| {
            warn!(target: "gw.idp", grant, error = %e, "Token endpoint returned malformed JSON");
            UpstreamFailure {
                status: Some(status.as_u16()),
                body: format!("malformed token response: {e}"),
            }
        })?;

        parsed.into_token_data().map_err(|reason| {
            warn!(target: "gw.idp", grant, reason, "Token endpoint response unusable");
            UpstreamFailure {
                status: Some(status.as_u16()),
                body: reason.to_string(),
            }
        })
    }
}

#[async_trait]
impl TokenRenewer for IdpClient {
    #[instrument(skip_all, name = "gw.idp.renew")]
    async fn renew(&self, refresh_token: &str) -> Result<TokenData, UpstreamFailure> {
        self.token_request(
            "refresh_token",
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ],
        )
        .await
    }
}

/// Mock renewer for testing.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Responder = dyn Fn(usize, &str) -> Result<TokenData, UpstreamFailure> + Send + Sync;

    /// Mock renewer for unit testing.
    ///
    /// The responder receives the zero-based call index and the refresh
    /// token it was called with.
    pub struct MockRenewer {
        responder: Box<Responder>,
        /// Number of calls made.
        call_count: AtomicUsize,
        /// Artificial delay before answering.
        latency: Option<Duration>,
    }

    impl MockRenewer {
        /// Create a mock that always answers with `token`.
        pub fn renewing(token: TokenData) -> Self {
            Self::with_responder(move |_, _| Ok(token.clone()))
        }

        /// Create a mock that always fails with `status` and `body`.
        pub fn rejecting(status: u16, body: &str) -> Self {
            let failure = UpstreamFailure {
                status: Some(status),
                body: body.to_string(),
            };
            Self::with_responder(move |_, _| Err(failure.clone()))
        }

        /// Create a mock with a custom responder.
        pub fn with_responder(
            responder: impl Fn(usize, &str) -> Result<TokenData, UpstreamFailure>
                + Send
                + Sync
                + 'static,
        ) -> Self {
            Self {
                responder: Box::new(responder),
                call_count: AtomicUsize::new(0),
                latency: None,
            }
        }

        /// Delay every answer by `latency`.
        pub fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = Some(latency);
            self
        }

        /// Get the number of calls made.
        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenRenewer for MockRenewer {
        async fn renew(&self, refresh_token: &str) -> Result<TokenData, UpstreamFailure> {
            let call = self.call_count.fetch_add(1, Ordering::SeqCst);
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
            (self.responder)(call, refresh_token)
        }
    }
}
