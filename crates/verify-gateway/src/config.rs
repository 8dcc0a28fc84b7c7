//! Verify Gateway configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use crate::cache::RefreshTtlPolicy;
use common::jwt::{parse_algorithms, AlgorithmPolicy, DEFAULT_LEEWAY, MAX_LEEWAY};
use common::secret::SecretString;
use reqwest::Url;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default server bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default accepted JWT algorithm list.
pub const DEFAULT_JWT_ALGORITHMS: &str = "RS256";

/// Default OAuth scope requested at the authorize endpoint.
pub const DEFAULT_OIDC_SCOPE: &str = "openid";

/// Default post-login redirect target.
pub const DEFAULT_HOME_URL: &str = "/";

/// Default per-call cache store timeout in milliseconds.
pub const DEFAULT_CACHE_TIMEOUT_MS: u64 = 1000;

/// Default renewal call timeout in milliseconds.
pub const DEFAULT_REFRESH_TIMEOUT_MS: u64 = 10_000;

/// Verify Gateway configuration.
///
/// Loaded from environment variables with sensible defaults.
/// The Redis URL (may embed a password) and the OIDC client secret are
/// redacted in Debug output.
#[derive(Clone)]
pub struct Config {
    /// Cache store URL (`redis://...`).
    pub redis_url: String,

    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Path to the PEM-encoded public key used to verify access tokens.
    pub jwt_public_key_path: String,

    /// Accepted JWT algorithms and their shared key family.
    pub jwt_algorithms: AlgorithmPolicy,

    /// Clock leeway in seconds applied to `exp`/`nbf`.
    pub jwt_leeway_seconds: u64,

    /// Identity provider authorization endpoint.
    pub oidc_authorize_url: Url,

    /// Identity provider token endpoint.
    pub oidc_token_url: Url,

    /// OAuth client identifier.
    pub oidc_client_id: String,

    /// OAuth client secret.
    pub oidc_client_secret: SecretString,

    /// Callback URL registered at the identity provider.
    pub oidc_redirect_uri: String,

    /// Scope requested at the authorize endpoint.
    pub oidc_scope: String,

    /// Where the callback sends the browser after a successful login.
    pub home_url: String,

    /// Upper bound on every cache store call.
    pub cache_timeout: Duration,

    /// Upper bound on every renewal call.
    pub refresh_timeout: Duration,

    /// What to do when the refresh lease is shorter than the access lease.
    pub refresh_ttl_policy: RefreshTtlPolicy,

    /// Coalesce concurrent refreshes of the same access token.
    pub single_flight_refresh: bool,

    /// Mark the credential cookie `Secure`.
    pub cookie_secure: bool,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("redis_url", &"[REDACTED]")
            .field("bind_address", &self.bind_address)
            .field("jwt_public_key_path", &self.jwt_public_key_path)
            .field("jwt_algorithms", &self.jwt_algorithms.algorithms)
            .field("jwt_leeway_seconds", &self.jwt_leeway_seconds)
            .field("oidc_authorize_url", &self.oidc_authorize_url.as_str())
            .field("oidc_token_url", &self.oidc_token_url.as_str())
            .field("oidc_client_id", &self.oidc_client_id)
            .field("oidc_client_secret", &"[REDACTED]")
            .field("oidc_redirect_uri", &self.oidc_redirect_uri)
            .field("oidc_scope", &self.oidc_scope)
            .field("home_url", &self.home_url)
            .field("cache_timeout", &self.cache_timeout)
            .field("refresh_timeout", &self.refresh_timeout)
            .field("refresh_ttl_policy", &self.refresh_ttl_policy)
            .field("single_flight_refresh", &self.single_flight_refresh)
            .field("cookie_secure", &self.cookie_secure)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid URL configuration: {0}")]
    InvalidUrl(String),

    #[error("Invalid JWT algorithm configuration: {0}")]
    InvalidJwtAlgorithms(String),

    #[error("Invalid JWT leeway configuration: {0}")]
    InvalidJwtLeeway(String),

    #[error("Invalid timeout configuration: {0}")]
    InvalidTimeout(String),

    #[error("Invalid refresh TTL policy: {0}")]
    InvalidRefreshTtlPolicy(String),

    #[error("Invalid boolean flag: {0}")]
    InvalidFlag(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let redis_url = required(vars, "REDIS_URL")?;
        let jwt_public_key_path = required(vars, "JWT_PUBLIC_KEY_PATH")?;
        let oidc_client_id = required(vars, "OIDC_CLIENT_ID")?;
        let oidc_client_secret = SecretString::from(required(vars, "OIDC_CLIENT_SECRET")?);
        let oidc_redirect_uri = required(vars, "OIDC_REDIRECT_URI")?;
        let oidc_authorize_url = parse_url(vars, "OIDC_AUTHORIZE_URL")?;
        let oidc_token_url = parse_url(vars, "OIDC_TOKEN_URL")?;

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let oidc_scope = vars
            .get("OIDC_SCOPE")
            .cloned()
            .unwrap_or_else(|| DEFAULT_OIDC_SCOPE.to_string());

        let home_url = vars
            .get("HOME_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HOME_URL.to_string());

        let algorithms_spec = vars
            .get("JWT_ALGORITHMS")
            .map_or(DEFAULT_JWT_ALGORITHMS, String::as_str);
        let jwt_algorithms = parse_algorithms(algorithms_spec).map_err(|e| {
            ConfigError::InvalidJwtAlgorithms(format!(
                "JWT_ALGORITHMS '{}' rejected: {}",
                algorithms_spec, e
            ))
        })?;

        // Parse JWT leeway with validation
        let jwt_leeway_seconds = if let Some(value_str) = vars.get("JWT_LEEWAY_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidJwtLeeway(format!(
                    "JWT_LEEWAY_SECONDS must be a non-negative integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value > MAX_LEEWAY.as_secs() {
                return Err(ConfigError::InvalidJwtLeeway(format!(
                    "JWT_LEEWAY_SECONDS must not exceed {} seconds, got {}",
                    MAX_LEEWAY.as_secs(),
                    value
                )));
            }

            value
        } else {
            DEFAULT_LEEWAY.as_secs()
        };

        let cache_timeout = parse_millis(vars, "CACHE_TIMEOUT_MS", DEFAULT_CACHE_TIMEOUT_MS)?;
        let refresh_timeout =
            parse_millis(vars, "REFRESH_TIMEOUT_MS", DEFAULT_REFRESH_TIMEOUT_MS)?;

        let refresh_ttl_policy = match vars.get("REFRESH_TTL_POLICY") {
            Some(value) => value.parse().map_err(ConfigError::InvalidRefreshTtlPolicy)?,
            None => RefreshTtlPolicy::default(),
        };

        let single_flight_refresh = parse_flag(vars, "SINGLE_FLIGHT_REFRESH", false)?;
        let cookie_secure = parse_flag(vars, "COOKIE_SECURE", false)?;

        Ok(Config {
            redis_url,
            bind_address,
            jwt_public_key_path,
            jwt_algorithms,
            jwt_leeway_seconds,
            oidc_authorize_url,
            oidc_token_url,
            oidc_client_id,
            oidc_client_secret,
            oidc_redirect_uri,
            oidc_scope,
            home_url,
            cache_timeout,
            refresh_timeout,
            refresh_ttl_policy,
            single_flight_refresh,
            cookie_secure,
        })
    }
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    vars.get(name)
        .filter(|value| !value.is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn parse_url(vars: &HashMap<String, String>, name: &str) -> Result<Url, ConfigError> {
    let raw = required(vars, name)?;
    Url::parse(&raw)
        .map_err(|e| ConfigError::InvalidUrl(format!("{} must be an absolute URL: {}", name, e)))
}

fn parse_millis(
    vars: &HashMap<String, String>,
    name: &str,
    default_ms: u64,
) -> Result<Duration, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(Duration::from_millis(default_ms));
    };

    let value: u64 = value_str.parse().map_err(|e| {
        ConfigError::InvalidTimeout(format!(
            "{} must be a valid positive integer, got '{}': {}",
            name, value_str, e
        ))
    })?;

    if value == 0 {
        return Err(ConfigError::InvalidTimeout(format!(
            "{} must be greater than 0",
            name
        )));
    }

    Ok(Duration::from_millis(value))
}

fn parse_flag(
    vars: &HashMap<String, String>,
    name: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match vars.get(name).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "true" | "1" | "yes") => Ok(true),
        Some(v) if matches!(v.as_str(), "false" | "0" | "no") => Ok(false),
        Some(v) => Err(ConfigError::InvalidFlag(format!(
            "{} must be true or false, got '{}'",
            name, v
        ))),
    }
}
