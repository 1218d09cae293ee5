//! Error types for the authorization core.
//!
//! Component errors (`StoreError`, `CodeError`, `RefreshError`, `KeyError`,
//! `TokenError`) stay internal. Everything that reaches a client goes through
//! [`OAuthError`], which renders the RFC 6749 §5.2 JSON envelope.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("Storage deadline of {0:?} exceeded")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum CodeError {
    #[error("Authorization code not found")]
    NotFound,
    #[error("Authorization code already consumed")]
    AlreadyConsumed,
    #[error("Authorization code expired")]
    Expired,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("Refresh token not found")]
    NotFound,
    #[error("Refresh token expired")]
    Expired,
    #[error("Refresh token reused; rotation chain revoked")]
    Reused,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Failed to read key file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("RSA key must be at least 2048 bits, got {0}")]
    KeyTooSmall(usize),
    #[error("Key generation failed: {0}")]
    Generation(String),
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Failed to sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
    #[error("Token rejected: {0}")]
    Invalid(#[source] jsonwebtoken::errors::Error),
    #[error("Token header carries no key id")]
    MissingKeyId,
    #[error("Unknown signing key: {0}")]
    UnknownKey(String),
}

/// OAuth2 / OIDC error codes (RFC 6749 §4.1.2.1, §5.2; RFC 6750 §3.1; OIDC Core §3.1.2.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    InvalidScope,
    UnsupportedGrantType,
    UnsupportedResponseType,
    LoginRequired,
    InvalidToken,
    InsufficientScope,
    ServerError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant => "invalid_grant",
            Self::InvalidScope => "invalid_scope",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::UnsupportedResponseType => "unsupported_response_type",
            Self::LoginRequired => "login_required",
            Self::InvalidToken => "invalid_token",
            Self::InsufficientScope => "insufficient_scope",
            Self::ServerError => "server_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidClient | Self::InvalidToken | Self::LoginRequired => {
                StatusCode::UNAUTHORIZED
            }
            Self::InsufficientScope => StatusCode::FORBIDDEN,
            Self::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON error envelope returned to clients.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

/// A protocol-level error, safe to show to the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct OAuthError {
    pub code: ErrorCode,
    pub description: Option<String>,
}

impl fmt::Display for OAuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{}: {}", self.code, description),
            None => write!(f, "{}", self.code),
        }
    }
}

impl OAuthError {
    pub fn new(code: ErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: Some(description.into()),
        }
    }

    pub fn bare(code: ErrorCode) -> Self {
        Self {
            code,
            description: None,
        }
    }

    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, description)
    }

    pub fn invalid_client() -> Self {
        Self::new(ErrorCode::InvalidClient, "Client authentication failed")
    }

    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidGrant, description)
    }

    pub fn invalid_scope(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidScope, description)
    }

    pub fn server_error() -> Self {
        Self::bare(ErrorCode::ServerError)
    }

    pub fn status(&self) -> StatusCode {
        self.code.status()
    }

    pub fn to_response_body(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.code.as_str().to_string(),
            error_description: self.description.clone(),
        }
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let mut response = (self.status(), Json(self.to_response_body())).into_response();
        let headers = response.headers_mut();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        match self.code {
            ErrorCode::InvalidClient => {
                headers.insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Basic realm=\"oauth\""),
                );
            }
            ErrorCode::InvalidToken => {
                headers.insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Bearer error=\"invalid_token\""),
                );
            }
            ErrorCode::InsufficientScope => {
                headers.insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Bearer error=\"insufficient_scope\""),
                );
            }
            _ => {}
        }
        response
    }
}

impl From<StoreError> for OAuthError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "Storage failure");
        Self::server_error()
    }
}

impl From<TokenError> for OAuthError {
    fn from(err: TokenError) -> Self {
        tracing::error!(error = %err, "Token signing failure");
        Self::server_error()
    }
}

impl From<CodeError> for OAuthError {
    fn from(err: CodeError) -> Self {
        match err {
            CodeError::NotFound => Self::invalid_grant("Authorization code is invalid"),
            CodeError::AlreadyConsumed => {
                Self::invalid_grant("Authorization code has already been used")
            }
            CodeError::Expired => Self::invalid_grant("Authorization code expired"),
            CodeError::Store(e) => e.into(),
        }
    }
}

impl From<RefreshError> for OAuthError {
    fn from(err: RefreshError) -> Self {
        match err {
            RefreshError::NotFound => Self::invalid_grant("Refresh token is invalid"),
            RefreshError::Expired => Self::invalid_grant("Refresh token expired"),
            RefreshError::Reused => Self::invalid_grant("Refresh token has been revoked"),
            RefreshError::Store(e) => e.into(),
        }
    }
}
