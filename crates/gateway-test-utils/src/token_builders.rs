//! Builder patterns for test data construction
//!
//! Provides fluent APIs for access-token claims and for the OAuth token
//! responses a mocked identity provider returns.

use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};

/// Builder for creating test JWT claims
///
/// # Example
/// ```rust,ignore
/// let claims = TestClaimsBuilder::new()
///     .for_user("alice")
///     .expires_in(300)
///     .build();
/// ```
pub struct TestClaimsBuilder {
    sub: String,
    exp: Option<i64>,
    nbf: Option<i64>,
    iat: i64,
    extra: Map<String, Value>,
}

impl TestClaimsBuilder {
    /// Create a new claims builder expiring in one hour
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            sub: "test-subject".to_string(),
            exp: Some((now + Duration::seconds(3600)).timestamp()),
            nbf: None,
            iat: now.timestamp(),
            extra: Map::new(),
        }
    }

    /// Set the subject
    pub fn for_user(mut self, subject: &str) -> Self {
        self.sub = subject.to_string();
        self
    }

    /// Set expiration in seconds from now
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.exp = Some((Utc::now() + Duration::seconds(seconds)).timestamp());
        self
    }

    /// Set expiration in the past
    pub fn expired_seconds_ago(mut self, seconds: i64) -> Self {
        self.exp = Some((Utc::now() - Duration::seconds(seconds)).timestamp());
        self
    }

    /// Set not-before in seconds from now
    pub fn not_before_in(mut self, seconds: i64) -> Self {
        self.nbf = Some((Utc::now() + Duration::seconds(seconds)).timestamp());
        self
    }

    /// Drop the `exp` claim entirely
    pub fn without_exp(mut self) -> Self {
        self.exp = None;
        self
    }

    /// Add an arbitrary claim (e.g. `aud`, `iss`)
    pub fn claim(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(name.to_string(), value.into());
        self
    }

    /// Build the claims as a JSON value
    pub fn build(self) -> Value {
        let mut claims = self.extra;
        claims.insert("sub".to_string(), json!(self.sub));
        claims.insert("iat".to_string(), json!(self.iat));
        if let Some(exp) = self.exp {
            claims.insert("exp".to_string(), json!(exp));
        }
        if let Some(nbf) = self.nbf {
            claims.insert("nbf".to_string(), json!(nbf));
        }
        Value::Object(claims)
    }
}

impl Default for TestClaimsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for the JSON body an OAuth token endpoint answers with
///
/// # Example
/// ```rust,ignore
/// let body = TokenResponseBuilder::new("new-access", "new-refresh")
///     .expires_in(300)
///     .refresh_expires_in(1800)
///     .build();
/// Mock::given(method("POST")).respond_with(ResponseTemplate::new(200).set_body_json(body));
/// ```
pub struct TokenResponseBuilder {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: u64,
    refresh_expires_in: Option<u64>,
}

impl TokenResponseBuilder {
    /// Create a response with 5 minute access and 30 minute refresh leases
    pub fn new(access_token: &str, refresh_token: &str) -> Self {
        Self {
            access_token: access_token.to_string(),
            refresh_token: Some(refresh_token.to_string()),
            expires_in: 300,
            refresh_expires_in: Some(1800),
        }
    }

    /// Set the access lease
    pub fn expires_in(mut self, seconds: u64) -> Self {
        self.expires_in = seconds;
        self
    }

    /// Set the refresh lease
    pub fn refresh_expires_in(mut self, seconds: u64) -> Self {
        self.refresh_expires_in = Some(seconds);
        self
    }

    /// Omit `refresh_expires_in` (some providers never send it)
    pub fn without_refresh_expires_in(mut self) -> Self {
        self.refresh_expires_in = None;
        self
    }

    /// Omit `refresh_token`
    pub fn without_refresh_token(mut self) -> Self {
        self.refresh_token = None;
        self
    }

    /// Build the response body
    pub fn build(self) -> Value {
        let mut body = json!({
            "access_token": self.access_token,
            "token_type": "Bearer",
            "expires_in": self.expires_in,
            "scope": "openid",
        });
        if let Some(refresh_token) = self.refresh_token {
            body["refresh_token"] = json!(refresh_token);
        }
        if let Some(refresh_expires_in) = self.refresh_expires_in {
            body["refresh_expires_in"] = json!(refresh_expires_in);
        }
        body
    }
}
