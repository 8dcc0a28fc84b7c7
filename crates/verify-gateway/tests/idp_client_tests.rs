//! Identity provider client wire tests.
//!
//! Exercises `IdpClient` against a wiremock token endpoint.

use gateway_test_utils::TokenResponseBuilder;
use std::collections::HashMap;
use std::time::Duration;
use verify_gateway::config::Config;
use verify_gateway::services::{IdpClient, TokenRenewer};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(idp_uri: &str, refresh_timeout_ms: u64) -> Result<IdpClient, anyhow::Error> {
    let vars = HashMap::from([
        ("REDIS_URL".to_string(), "redis://unused".to_string()),
        ("JWT_PUBLIC_KEY_PATH".to_string(), "/unused.pem".to_string()),
        (
            "OIDC_AUTHORIZE_URL".to_string(),
            format!("{idp_uri}/auth"),
        ),
        ("OIDC_TOKEN_URL".to_string(), format!("{idp_uri}/token")),
        ("OIDC_CLIENT_ID".to_string(), "wire-client".to_string()),
        ("OIDC_CLIENT_SECRET".to_string(), "wire-secret".to_string()),
        (
            "OIDC_REDIRECT_URI".to_string(),
            "https://app.example.com/oidc/callback".to_string(),
        ),
        (
            "REFRESH_TIMEOUT_MS".to_string(),
            refresh_timeout_ms.to_string(),
        ),
    ]);
    let config = Config::from_vars(&vars)?;
    Ok(IdpClient::new(&config)?)
}

#[tokio::test]
async fn test_renew_posts_refresh_grant_form() -> Result<(), anyhow::Error> {
    let idp = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=old-refresh"))
        .and(body_string_contains("client_id=wire-client"))
        .and(body_string_contains("client_secret=wire-secret"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(
                TokenResponseBuilder::new("new-access", "new-refresh")
                    .expires_in(120)
                    .refresh_expires_in(900)
                    .build(),
            ),
        )
        .expect(1)
        .mount(&idp)
        .await;

    let token = client_for(&idp.uri(), 2000)?.renew("old-refresh").await?;

    assert_eq!(token.access_token, "new-access");
    assert_eq!(token.refresh_token, "new-refresh");
    assert_eq!(token.expires_in, 120);
    assert_eq!(token.refresh_expires_in, 900);

    Ok(())
}

#[tokio::test]
async fn test_missing_refresh_expires_in_uses_expires_in() -> Result<(), anyhow::Error> {
    let idp = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(
                TokenResponseBuilder::new("new-access", "new-refresh")
                    .expires_in(120)
                    .without_refresh_expires_in()
                    .build(),
            ),
        )
        .mount(&idp)
        .await;

    let token = client_for(&idp.uri(), 2000)?.renew("old-refresh").await?;

    assert_eq!(token.refresh_expires_in, 120);

    Ok(())
}

#[tokio::test]
async fn test_rejection_carries_status_and_body() -> Result<(), anyhow::Error> {
    let idp = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(401).set_body_string(r#"{"error":"invalid_grant"}"#),
        )
        .mount(&idp)
        .await;

    let result = client_for(&idp.uri(), 2000)?.renew("revoked").await;

    let failure = result.err().ok_or_else(|| anyhow::anyhow!("expected failure"))?;
    assert_eq!(failure.status, Some(401));
    assert_eq!(failure.body, r#"{"error":"invalid_grant"}"#);
    assert!(failure.is_rejection());

    Ok(())
}

#[tokio::test]
async fn test_missing_refresh_token_is_failure() -> Result<(), anyhow::Error> {
    let idp = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(
                TokenResponseBuilder::new("new-access", "unused")
                    .without_refresh_token()
                    .build(),
            ),
        )
        .mount(&idp)
        .await;

    let result = client_for(&idp.uri(), 2000)?.renew("old-refresh").await;

    let failure = result.err().ok_or_else(|| anyhow::anyhow!("expected failure"))?;
    assert_eq!(failure.status, Some(200));
    assert!(failure.body.contains("refresh_token"));

    Ok(())
}

#[tokio::test]
async fn test_malformed_json_is_failure() -> Result<(), anyhow::Error> {
    let idp = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&idp)
        .await;

    let result = client_for(&idp.uri(), 2000)?.exchange_code("code").await;

    let failure = result.err().ok_or_else(|| anyhow::anyhow!("expected failure"))?;
    assert_eq!(failure.status, Some(200));
    assert!(failure.body.starts_with("malformed token response"));

    Ok(())
}

#[tokio::test]
async fn test_slow_endpoint_times_out_without_status() -> Result<(), anyhow::Error> {
    let idp = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(TokenResponseBuilder::new("a", "r").build())
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&idp)
        .await;

    let result = client_for(&idp.uri(), 200)?.renew("old-refresh").await;

    let failure = result.err().ok_or_else(|| anyhow::anyhow!("expected failure"))?;
    assert_eq!(failure.status, None);
    assert!(!failure.is_rejection());

    Ok(())
}

#[tokio::test]
async fn test_unreachable_endpoint_is_transport_failure() -> Result<(), anyhow::Error> {
    // Reserve a port, then free it so nothing is listening there
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let uri = format!("http://{}", listener.local_addr()?);
    drop(listener);
    let client = client_for(&uri, 2000)?;

    let result = client.renew("old-refresh").await;

    let failure = result.err().ok_or_else(|| anyhow::anyhow!("expected failure"))?;
    assert_eq!(failure.status, None);

    Ok(())
}
