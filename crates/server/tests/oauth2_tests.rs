//! OAuth2 endpoint tests.
//!
//! Drives the full application router over HTTP: discovery, the
//! authorization code flow with PKCE, token refresh, revocation and userinfo.

mod common;

use axum::http::{HeaderName, HeaderValue, header};
use axum_test::{TestResponse, TestServer};
use common::*;
use oidc_provider::api::app;
use std::collections::HashMap;

async fn create_test_server() -> (TestServer, String) {
    let (state, _db) = create_test_state().await;
    let session = session_token(&state);
    let server = TestServer::new(app(state)).expect("create test server");
    (server, session)
}

fn bearer(token: &str) -> (HeaderName, HeaderValue) {
    (
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {token}")).expect("header value"),
    )
}

fn basic(client_id: &str, secret: &str) -> (HeaderName, HeaderValue) {
    use base64::Engine;
    let encoded =
        base64::engine::general_purpose::STANDARD.encode(format!("{client_id}:{secret}"));
    (
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Basic {encoded}")).expect("header value"),
    )
}

/// Query parameters of the `Location` header of a redirect.
fn location_params(response: &TestResponse) -> (String, HashMap<String, String>) {
    let location = response.header(header::LOCATION);
    let url = url::Url::parse(location.to_str().expect("ascii location")).expect("location url");
    let params = url.query_pairs().into_owned().collect();
    let mut base = url.clone();
    base.set_query(None);
    (base.to_string(), params)
}

async fn authorize_code(server: &TestServer, session: &str, scope: &str) -> String {
    let (name, value) = bearer(session);
    let response = server
        .get("/oauth/authorize")
        .add_header(name, value)
        .add_query_param("response_type", "code")
        .add_query_param("client_id", CLIENT_ID)
        .add_query_param("redirect_uri", REDIRECT_URI)
        .add_query_param("scope", scope)
        .add_query_param("state", "af0ifjsldkj")
        .add_query_param("nonce", "n-0S6_WzA2Mj")
        .add_query_param("code_challenge", CHALLENGE)
        .add_query_param("code_challenge_method", "S256")
        .await;

    response.assert_status_see_other();
    let (base, params) = location_params(&response);
    assert_eq!(base, REDIRECT_URI);
    assert_eq!(params["state"], "af0ifjsldkj");
    params["code"].clone()
}

// =============================================================================
// Miscellaneous and discovery
// =============================================================================

#[tokio::test]
async fn test_health() {
    let (server, _) = create_test_server().await;

    let response = server.get("/healthz").await;
    response.assert_status_ok();
    response.assert_text("ok");
}

#[tokio::test]
async fn test_openid_configuration() {
    let (server, _) = create_test_server().await;

    let response = server.get("/.well-known/openid-configuration").await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    assert_eq!(body["issuer"], ISSUER);
    assert_eq!(body["token_endpoint"], format!("{ISSUER}/oauth/token"));
    assert_eq!(
        body["authorization_endpoint"],
        format!("{ISSUER}/oauth/authorize")
    );
    assert_eq!(body["jwks_uri"], format!("{ISSUER}/.well-known/jwks.json"));

    let algs = body["id_token_signing_alg_values_supported"]
        .as_array()
        .unwrap();
    assert_eq!(algs.len(), 1);
    assert_eq!(algs[0], "RS256");

    let methods = body["code_challenge_methods_supported"].as_array().unwrap();
    assert!(methods.iter().any(|m| m == "S256"));
}

#[tokio::test]
async fn test_jwks() {
    let (server, _) = create_test_server().await;

    let response = server.get("/.well-known/jwks.json").await;
    response.assert_status_ok();
    assert_eq!(
        response.header(header::CACHE_CONTROL),
        "public, max-age=300"
    );

    let body: serde_json::Value = response.json();
    let keys = body["keys"].as_array().unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0]["kid"], "test-key");
    assert_eq!(keys[0]["kty"], "RSA");
    assert_eq!(keys[0]["alg"], "RS256");
    assert_eq!(keys[0]["use"], "sig");
    assert!(keys[0].get("d").is_none());
}

// =============================================================================
// Authorization endpoint
// =============================================================================

#[tokio::test]
async fn test_authorize_requires_session() {
    let (server, _) = create_test_server().await;

    let response = server
        .get("/oauth/authorize")
        .add_query_param("response_type", "code")
        .add_query_param("client_id", CLIENT_ID)
        .add_query_param("redirect_uri", REDIRECT_URI)
        .add_query_param("code_challenge", CHALLENGE)
        .add_query_param("code_challenge_method", "S256")
        .await;

    response.assert_status_unauthorized();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "login_required");
}

#[tokio::test]
async fn test_authorize_rejects_client_access_token_as_session() {
    let (server, session) = create_test_server().await;
    let code = authorize_code(&server, &session, "openid").await;

    let (name, value) = basic(CLIENT_ID, CLIENT_SECRET);
    let response = server
        .post("/oauth/token")
        .add_header(name, value)
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("code_verifier", VERIFIER),
        ])
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let access_token = body["access_token"].as_str().unwrap();

    // A token held by client c1 must not sign the user in anywhere else
    let (name, value) = bearer(access_token);
    let response = server
        .get("/oauth/authorize")
        .add_header(name, value)
        .add_query_param("response_type", "code")
        .add_query_param("client_id", PUBLIC_CLIENT_ID)
        .add_query_param("redirect_uri", "https://spa/cb")
        .add_query_param("code_challenge", CHALLENGE)
        .add_query_param("code_challenge_method", "S256")
        .await;

    response.assert_status_unauthorized();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "login_required");
}

#[tokio::test]
async fn test_authorize_unregistered_redirect() {
    let (server, session) = create_test_server().await;
    let (name, value) = bearer(&session);

    let response = server
        .get("/oauth/authorize")
        .add_header(name, value)
        .add_query_param("response_type", "code")
        .add_query_param("client_id", CLIENT_ID)
        .add_query_param("redirect_uri", "https://evil.example/cb")
        .await;

    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn test_authorize_unknown_client() {
    let (server, session) = create_test_server().await;
    let (name, value) = bearer(&session);

    let response = server
        .get("/oauth/authorize")
        .add_header(name, value)
        .add_query_param("response_type", "code")
        .add_query_param("client_id", "nonexistent")
        .add_query_param("redirect_uri", REDIRECT_URI)
        .await;

    response.assert_status_unauthorized();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_client");
}

#[tokio::test]
async fn test_authorize_invalid_scope_redirects() {
    let (server, session) = create_test_server().await;
    let (name, value) = bearer(&session);

    let response = server
        .get("/oauth/authorize")
        .add_header(name, value)
        .add_query_param("response_type", "code")
        .add_query_param("client_id", CLIENT_ID)
        .add_query_param("redirect_uri", REDIRECT_URI)
        .add_query_param("scope", "openid admin")
        .add_query_param("state", "s1")
        .add_query_param("code_challenge", CHALLENGE)
        .add_query_param("code_challenge_method", "S256")
        .await;

    response.assert_status_see_other();
    let (base, params) = location_params(&response);
    assert_eq!(base, REDIRECT_URI);
    assert_eq!(params["error"], "invalid_scope");
    assert_eq!(params["state"], "s1");
    assert!(!params.contains_key("code"));
}

// =============================================================================
// Token endpoint
// =============================================================================

#[tokio::test]
async fn test_full_authorization_code_flow() {
    let (server, session) = create_test_server().await;
    let code = authorize_code(&server, &session, "openid profile email").await;

    let (name, value) = basic(CLIENT_ID, CLIENT_SECRET);
    let response = server
        .post("/oauth/token")
        .add_header(name, value)
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("code_verifier", VERIFIER),
        ])
        .await;

    response.assert_status_ok();
    assert_eq!(response.header(header::CACHE_CONTROL), "no-store");
    assert_eq!(response.header(header::PRAGMA), "no-cache");

    let body: serde_json::Value = response.json();
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], 3600);
    assert_eq!(body["scope"], "openid profile email");
    assert!(body["id_token"].is_string());
    assert!(body["refresh_token"].is_string());

    let access_token = body["access_token"].as_str().unwrap();
    let (name, value) = bearer(access_token);
    let response = server.get("/oauth/userinfo").add_header(name, value).await;
    response.assert_status_ok();

    let info: serde_json::Value = response.json();
    assert_eq!(info["sub"], USER_ID);
    assert_eq!(info["preferred_username"], "alice");
    assert_eq!(info["email"], "alice@example.com");
    assert_eq!(info["email_verified"], true);

    // Second redemption of the same code
    let response = server
        .post("/oauth/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("code_verifier", VERIFIER),
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
        ])
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_grant");
}

#[tokio::test]
async fn test_refresh_and_revoke() {
    let (server, session) = create_test_server().await;
    let code = authorize_code(&server, &session, "openid").await;

    let response = server
        .post("/oauth/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("code_verifier", VERIFIER),
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
        ])
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let r1 = body["refresh_token"].as_str().unwrap().to_string();

    let (name, value) = basic(CLIENT_ID, CLIENT_SECRET);
    let response = server
        .post("/oauth/token")
        .add_header(name, value)
        .form(&[("grant_type", "refresh_token"), ("refresh_token", r1.as_str())])
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let r2 = body["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(r1, r2);

    let (name, value) = basic(CLIENT_ID, CLIENT_SECRET);
    let response = server
        .post("/oauth/revoke")
        .add_header(name, value)
        .form(&[("token", r2.as_str()), ("token_type_hint", "refresh_token")])
        .await;
    response.assert_status_ok();

    let (name, value) = basic(CLIENT_ID, CLIENT_SECRET);
    let response = server
        .post("/oauth/token")
        .add_header(name, value)
        .form(&[("grant_type", "refresh_token"), ("refresh_token", r2.as_str())])
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_grant");
}

#[tokio::test]
async fn test_token_bad_client_secret() {
    let (server, _) = create_test_server().await;

    let (name, value) = basic(CLIENT_ID, "wrong");
    let response = server
        .post("/oauth/token")
        .add_header(name, value)
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", "test-code"),
            ("redirect_uri", REDIRECT_URI),
        ])
        .await;

    response.assert_status_unauthorized();
    assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_client");
}

#[tokio::test]
async fn test_token_unsupported_grant_type() {
    let (server, _) = create_test_server().await;

    let response = server
        .post("/oauth/token")
        .form(&[
            ("grant_type", "password"),
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
        ])
        .await;

    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "unsupported_grant_type");
}

#[tokio::test]
async fn test_token_invalid_code() {
    let (server, _) = create_test_server().await;

    let response = server
        .post("/oauth/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", "invalid-code"),
            ("redirect_uri", REDIRECT_URI),
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
        ])
        .await;

    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_grant");
}

// =============================================================================
// Userinfo and revocation errors
// =============================================================================

#[tokio::test]
async fn test_userinfo_no_token() {
    let (server, _) = create_test_server().await;

    let response = server.get("/oauth/userinfo").await;

    response.assert_status_unauthorized();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_token");
}

#[tokio::test]
async fn test_userinfo_invalid_token() {
    let (server, _) = create_test_server().await;

    let response = server
        .get("/oauth/userinfo")
        .add_header(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer invalid-token"),
        )
        .await;

    response.assert_status_unauthorized();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_token");
}

#[tokio::test]
async fn test_revoke_unknown_token_is_ok() {
    let (server, _) = create_test_server().await;

    let response = server
        .post("/oauth/revoke")
        .form(&[
            ("token", "never-issued"),
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
        ])
        .await;

    response.assert_status_ok();
}

#[tokio::test]
async fn test_revoke_requires_client_auth() {
    let (server, _) = create_test_server().await;

    let response = server
        .post("/oauth/revoke")
        .form(&[("token", "never-issued"), ("client_id", CLIENT_ID)])
        .await;

    response.assert_status_unauthorized();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_client");
}
