//! OAuth2 / OpenID Connect HTTP endpoints.
//!
//! Handlers are thin: they extract parameters and credentials, call into
//! [`GrantHandler`](crate::oauth2::grant::GrantHandler) and render the result.

use crate::error::{ErrorCode, ErrorResponse, OAuthError};
use crate::oauth2::grant::{
    AuthorizeError, AuthorizeRequest, ClientCredentials, TokenRequest, TokenResponse, UserInfo,
};
use crate::oauth2::keys::Jwks;
use crate::oauth2::session::bearer_token;
use crate::oauth2::{OAUTH2_TAG, state::OAuth2State};
use axum::{
    Form, Json,
    extract::{Query, State, rejection::FormRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// Routes nested under `/oauth`.
pub fn router(state: OAuth2State) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(authorize))
        .routes(routes!(token))
        .routes(routes!(revoke))
        .routes(routes!(userinfo))
        .with_state(state)
}

/// Discovery documents served from the issuer root.
pub fn well_known_router(state: OAuth2State) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(openid_configuration))
        .routes(routes!(jwks))
        .with_state(state)
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RevokeRequest {
    pub token: Option<String>,
    /// Accepted and ignored; only refresh tokens are revocable.
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OpenIdConfiguration {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    pub revocation_endpoint: String,
    pub jwks_uri: String,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
    pub id_token_signing_alg_values_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
    pub claims_supported: Vec<String>,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Authorization endpoint.
#[tracing::instrument(skip(state, headers))]
#[utoipa::path(
    get,
    path = "/authorize",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Authorize",
    summary = "Start the authorization code flow",
    description = "Validates the client, redirect URI, scopes and PKCE parameters, then redirects \
                   back to the client with a single-use authorization code.\n\n\
                   The resource owner is identified by a bearer token or the `oidc_session` cookie. \
                   Errors detected before the redirect URI is validated are returned as JSON; later \
                   errors are appended to the redirect URI together with `state`.\n\n\
                   Public clients must send `code_challenge`.",
    params(AuthorizeRequest),
    responses(
        (status = 303, description = "Redirect to the client with `code` and `state`, or with `error`"),
        (status = 400, description = "Unregistered or missing redirect URI", body = ErrorResponse),
        (status = 401, description = "Unknown client or no signed-in user", body = ErrorResponse),
    )
)]
pub async fn authorize(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    Query(params): Query<AuthorizeRequest>,
) -> Response {
    let user_id = state.sessions.authenticated_user(&headers).await;

    match state.grants.authorize(&params, user_id.as_deref()).await {
        Ok(grant) => {
            let mut redirect_url = match url::Url::parse(&grant.redirect_uri) {
                Ok(u) => u,
                Err(e) => {
                    tracing::error!(error = %e, "Registered redirect_uri is not a valid URL");
                    return OAuthError::server_error().into_response();
                }
            };
            redirect_url.query_pairs_mut().append_pair("code", &grant.code);
            if let Some(s) = grant.state.as_deref() {
                redirect_url.query_pairs_mut().append_pair("state", s);
            }
            Redirect::to(redirect_url.as_str()).into_response()
        }
        Err(AuthorizeError::Direct(error)) => error.into_response(),
        Err(AuthorizeError::Redirect {
            redirect_uri,
            state,
            error,
        }) => error_redirect(&redirect_uri, state.as_deref(), &error),
    }
}

/// Token endpoint.
#[tracing::instrument(skip(state, headers, payload))]
#[utoipa::path(
    post,
    path = "/token",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Token",
    summary = "Exchange an authorization code or refresh token",
    description = "**Supported grant types:**\n\
                   - `authorization_code`: redeem a code (plus `code_verifier` when PKCE was used)\n\
                   - `refresh_token`: rotate a refresh token; the presented token is revoked\n\n\
                   **Client authentication:** HTTP Basic auth or `client_id`/`client_secret` in the body. \
                   Public clients send only `client_id`.\n\n\
                   An ID token is included whenever the granted scopes contain `openid`.",
    request_body(
        content = TokenRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Token request parameters"
    ),
    responses(
        (status = 200, description = "Tokens issued", body = TokenResponse),
        (status = 400, description = "Invalid request, grant or scope", body = ErrorResponse),
        (status = 401, description = "Client authentication failed", body = ErrorResponse),
    )
)]
pub async fn token(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    payload: Result<Form<TokenRequest>, FormRejection>,
) -> Response {
    let Form(params) = match payload {
        Ok(form) => form,
        Err(rejection) => {
            return OAuthError::invalid_request(rejection.body_text()).into_response();
        }
    };
    let credentials =
        extract_client_credentials(&headers, params.client_id.clone(), params.client_secret.clone());

    match state.grants.exchange(credentials, &params).await {
        Ok(response) => (
            StatusCode::OK,
            [
                (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
                (header::PRAGMA, HeaderValue::from_static("no-cache")),
            ],
            Json(response),
        )
            .into_response(),
        Err(error) => error.into_response(),
    }
}

/// Token revocation endpoint (RFC 7009).
#[tracing::instrument(skip(state, headers, payload))]
#[utoipa::path(
    post,
    path = "/revoke",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Revoke Token",
    summary = "Revoke a refresh token",
    description = "Revokes a refresh token together with every token rotated from the same grant. \
                   Returns 200 even when the token is unknown or belongs to another client. \
                   Access tokens are self-contained JWTs and expire on their own.",
    request_body(
        content = RevokeRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Token revocation request"
    ),
    responses(
        (status = 200, description = "Token revoked (or was already invalid)"),
        (status = 400, description = "Missing token parameter", body = ErrorResponse),
        (status = 401, description = "Client authentication failed", body = ErrorResponse),
    )
)]
pub async fn revoke(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    payload: Result<Form<RevokeRequest>, FormRejection>,
) -> Response {
    let Form(params) = match payload {
        Ok(form) => form,
        Err(rejection) => {
            return OAuthError::invalid_request(rejection.body_text()).into_response();
        }
    };
    let credentials = extract_client_credentials(&headers, params.client_id, params.client_secret);

    match state
        .grants
        .revoke(credentials, params.token.as_deref())
        .await
    {
        Ok(()) => StatusCode::OK.into_response(),
        Err(error) => error.into_response(),
    }
}

/// OpenID Connect UserInfo endpoint.
#[tracing::instrument(skip(state, headers))]
#[utoipa::path(
    get,
    path = "/userinfo",
    tag = OAUTH2_TAG,
    operation_id = "OpenID Connect UserInfo",
    summary = "Claims about the authenticated user",
    description = "Requires a bearer access token carrying the `openid` scope.\n\n\
                   - `profile`: `name`, `preferred_username`, `nickname`, `picture`\n\
                   - `email`: `email`, `email_verified`",
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "User claims", body = UserInfo),
        (status = 401, description = "Missing or invalid access token", body = ErrorResponse),
        (status = 403, description = "Token lacks the `openid` scope", body = ErrorResponse),
    )
)]
pub async fn userinfo(State(state): State<OAuth2State>, headers: HeaderMap) -> Response {
    let Some(access_token) = bearer_token(&headers) else {
        return OAuthError::new(ErrorCode::InvalidToken, "Missing or invalid Authorization header")
            .into_response();
    };

    match state.grants.userinfo(access_token).await {
        Ok(info) => Json(info).into_response(),
        Err(error) => error.into_response(),
    }
}

/// OpenID Connect Discovery document.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/.well-known/openid-configuration",
    tag = OAUTH2_TAG,
    operation_id = "OpenID Connect Discovery",
    summary = "OpenID Connect Discovery document",
    responses(
        (status = 200, description = "Provider metadata", body = OpenIdConfiguration),
    )
)]
pub async fn openid_configuration(State(state): State<OAuth2State>) -> Json<OpenIdConfiguration> {
    Json(OpenIdConfiguration {
        issuer: state.issuer_url.clone(),
        authorization_endpoint: state.endpoint("/oauth/authorize"),
        token_endpoint: state.endpoint("/oauth/token"),
        userinfo_endpoint: state.endpoint("/oauth/userinfo"),
        revocation_endpoint: state.endpoint("/oauth/revoke"),
        jwks_uri: state.endpoint("/.well-known/jwks.json"),
        response_types_supported: strings(&["code"]),
        grant_types_supported: strings(&["authorization_code", "refresh_token"]),
        subject_types_supported: strings(&["public"]),
        id_token_signing_alg_values_supported: strings(&["RS256"]),
        scopes_supported: strings(&["openid", "profile", "email"]),
        token_endpoint_auth_methods_supported: strings(&[
            "client_secret_basic",
            "client_secret_post",
            "none",
        ]),
        code_challenge_methods_supported: strings(&["S256", "plain"]),
        claims_supported: strings(&[
            "sub",
            "iss",
            "aud",
            "exp",
            "iat",
            "auth_time",
            "nonce",
            "name",
            "preferred_username",
            "nickname",
            "picture",
            "email",
            "email_verified",
        ]),
    })
}

/// JSON Web Key Set of the active and retired signing keys.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/.well-known/jwks.json",
    tag = OAUTH2_TAG,
    operation_id = "JSON Web Key Set",
    summary = "Public keys for verifying issued tokens",
    responses(
        (status = 200, description = "JWKS document", body = Jwks),
    )
)]
pub async fn jwks(State(state): State<OAuth2State>) -> Response {
    (
        [(
            header::CACHE_CONTROL,
            HeaderValue::from_static("public, max-age=300"),
        )],
        Json(state.keys.jwks()),
    )
        .into_response()
}

// =============================================================================
// Helper Functions
// =============================================================================

fn extract_client_credentials(
    headers: &HeaderMap,
    form_client_id: Option<String>,
    form_client_secret: Option<String>,
) -> ClientCredentials {
    // Basic auth wins over the form body
    if let Some(auth) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        && let Ok(decoded) =
            base64::Engine::decode(&base64::engine::general_purpose::STANDARD, auth.trim())
        && let Ok(creds) = String::from_utf8(decoded)
        && let Some((id, secret)) = creds.split_once(':')
    {
        return ClientCredentials {
            client_id: Some(id.to_string()),
            client_secret: Some(secret.to_string()),
        };
    }

    ClientCredentials {
        client_id: form_client_id,
        client_secret: form_client_secret,
    }
}

fn error_redirect(redirect_uri: &str, state: Option<&str>, error: &OAuthError) -> Response {
    let mut redirect_url = match url::Url::parse(redirect_uri) {
        Ok(u) => u,
        Err(_) => return error.clone().into_response(),
    };

    redirect_url
        .query_pairs_mut()
        .append_pair("error", error.code.as_str());
    if let Some(desc) = error.description.as_deref() {
        redirect_url
            .query_pairs_mut()
            .append_pair("error_description", desc);
    }
    if let Some(s) = state {
        redirect_url.query_pairs_mut().append_pair("state", s);
    }

    Redirect::to(redirect_url.as_str()).into_response()
}
