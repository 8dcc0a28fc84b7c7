//! OIDC authorization-code callback.
//!
//! The identity provider redirects the browser here with `?code=...` after
//! login. The code is exchanged for tokens, the tokens are cached, and the
//! browser is sent home with the credential cookie.

use crate::errors::GatewayError;
use crate::handlers::verify::credential_cookie;
use crate::observability::hash_for_correlation;
use crate::routes::AppState;
use axum::extract::{Query, State};
use axum::response::Redirect;
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

/// Query string of the callback. Other parameters (`state`,
/// `session_state`) are ignored.
#[derive(Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
}

/// Handler for GET/POST /oidc/callback.
///
/// # Errors
///
/// - `GatewayError::BadRequest` (400) when `code` is missing
/// - `GatewayError::Upstream` relaying the provider's status and body when
///   the exchange fails
/// - `GatewayError::ServiceUnavailable` (503) when the tokens cannot be cached
#[tracing::instrument(skip_all, name = "gw.handlers.oidc_callback")]
pub async fn oidc_callback(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Result<(CookieJar, Redirect), GatewayError> {
    let code = params
        .code
        .filter(|code| !code.is_empty())
        .ok_or_else(|| GatewayError::BadRequest("Missing authorization code".to_string()))?;

    let token = state
        .idp
        .exchange_code(&code)
        .await
        .map_err(|failure| GatewayError::Upstream {
            status: failure.status,
            body: failure.body,
        })?;

    state.cache.save(&token).await.map_err(|e| {
        error!(target: "gw.callback", error = %e, "Failed to cache issued token");
        GatewayError::ServiceUnavailable(format!("token cache: {e}"))
    })?;

    info!(
        target: "gw.callback",
        token = %hash_for_correlation(&token.access_token),
        expires_in = token.expires_in,
        "Login completed"
    );

    let cookie = credential_cookie(&token, state.config.cookie_secure);
    Ok((jar.add(cookie), Redirect::temporary(&state.config.home_url)))
}
