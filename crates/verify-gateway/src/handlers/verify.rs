//! Forward-auth handler.
//!
//! A reverse proxy calls `GET /verify` with the client's cookies and headers
//! before serving a protected resource. The verdict maps to:
//!
//! - pass-through: 200, empty body
//! - set-credential: 200 with `Set-Cookie: access_token=<renewed>`
//! - redirect: 307 to the identity provider's authorize URL
//! - hard error: 500 with a plain-text diagnostic

use crate::models::TokenData;
use crate::routes::AppState;
use crate::verification::Verdict;
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use std::sync::Arc;

/// Name of the credential cookie.
pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

/// Pull the bearer credential from the request.
///
/// The `access_token` cookie takes precedence over `Authorization: Bearer`.
/// Empty values count as absent.
pub fn extract_credential(jar: &CookieJar, headers: &HeaderMap) -> Option<String> {
    let from_cookie = jar
        .get(ACCESS_TOKEN_COOKIE)
        .map(|cookie| cookie.value().trim())
        .filter(|value| !value.is_empty());
    if let Some(token) = from_cookie {
        return Some(token.to_string());
    }

    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("Bearer"))
        .map(|(_, token)| token.trim())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Cookie carrying a newly issued access token.
pub fn credential_cookie(token: &TokenData, secure: bool) -> Cookie<'static> {
    Cookie::build((ACCESS_TOKEN_COOKIE, token.access_token.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build()
}

/// Handler for GET /verify.
#[tracing::instrument(skip_all, name = "gw.handlers.verify")]
pub async fn verify(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Response {
    let credential = extract_credential(&jar, &headers);

    match state.orchestrator.verify(credential.as_deref()).await {
        Verdict::Authenticated { renewed: None } => StatusCode::OK.into_response(),
        Verdict::Authenticated {
            renewed: Some(token),
        } => {
            let cookie = credential_cookie(&token, state.config.cookie_secure);
            (StatusCode::OK, jar.add(cookie)).into_response()
        }
        Verdict::Unauthenticated(_) => {
            Redirect::temporary(state.idp.authorize_url()).into_response()
        }
        Verdict::ServerError(diagnostic) => {
            (StatusCode::INTERNAL_SERVER_ERROR, diagnostic).into_response()
        }
    }
}
