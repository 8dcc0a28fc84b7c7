//! Verify Gateway error types.
//!
//! `GatewayError` is what HTTP handlers outside the verification state
//! machine return (the OIDC callback, mostly). It maps to an HTTP status and
//! a JSON error body via `IntoResponse`. Messages returned to clients are
//! generic; actual errors are logged server-side.
//!
//! The `/verify` hard-error path does not go through this type: it answers
//! with a plain-text diagnostic (see `handlers::verify`).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Verify Gateway HTTP error type.
///
/// Maps to appropriate HTTP status codes:
/// - BadRequest: 400 Bad Request
/// - Upstream: the identity provider's status (502 when it never answered)
/// - ServiceUnavailable: 503 Service Unavailable
/// - Internal: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Upstream error (status {status:?})")]
    Upstream { status: Option<u16>, body: String },

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error")]
    Internal,
}

impl GatewayError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::BadRequest(_) => 400,
            GatewayError::Upstream { status, .. } => upstream_status(*status).as_u16(),
            GatewayError::ServiceUnavailable(_) => 503,
            GatewayError::Internal => 500,
        }
    }
}

/// Relay the upstream status when it is a usable error status, otherwise 502.
fn upstream_status(status: Option<u16>) -> StatusCode {
    status
        .and_then(|s| StatusCode::from_u16(s).ok())
        .filter(|s| s.is_client_error() || s.is_server_error())
        .unwrap_or(StatusCode::BAD_GATEWAY)
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            GatewayError::BadRequest(reason) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", reason),
            GatewayError::Upstream { status, body } => {
                // IdP body is relayed verbatim
                let status = upstream_status(status);
                tracing::warn!(target: "gw.idp", status = status.as_u16(), "Relaying identity provider error");
                return (status, body).into_response();
            }
            GatewayError::ServiceUnavailable(reason) => {
                // Log actual reason server-side
                tracing::warn!(target: "gw.availability", reason = %reason, "Service unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Service temporarily unavailable".to_string(),
                )
            }
            GatewayError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            ),
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(error_response)).into_response()
    }
}
