//! Resolving the resource owner behind an authorization request.
//!
//! Login and consent UIs live outside this service. The authorization endpoint
//! only needs to know who, if anyone, is signed in.

use crate::oauth2::issuer::TokenIssuer;
use async_trait::async_trait;
use axum::http::{HeaderMap, header};
use std::sync::Arc;

/// Cookie carrying a first-party session token.
pub const SESSION_COOKIE: &str = "oidc_session";

#[async_trait]
pub trait SessionAuthenticator: Send + Sync {
    /// Stable user id of the signed-in user, if any.
    async fn authenticated_user(&self, headers: &HeaderMap) -> Option<String>;
}

/// Accepts access tokens minted by this issuer for the first-party session
/// audience, either as a bearer token or in the [`SESSION_COOKIE`] cookie.
///
/// Tokens issued to clients carry the client id as `aud` and are never a login.
pub struct BearerSession {
    issuer: Arc<TokenIssuer>,
    audience: String,
}

impl BearerSession {
    pub fn new(issuer: Arc<TokenIssuer>, audience: impl Into<String>) -> Self {
        Self {
            issuer,
            audience: audience.into(),
        }
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim())
        .filter(|token| !token.is_empty())
}

fn session_cookie(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value)
}

#[async_trait]
impl SessionAuthenticator for BearerSession {
    async fn authenticated_user(&self, headers: &HeaderMap) -> Option<String> {
        let token = bearer_token(headers).or_else(|| session_cookie(headers))?;
        match self.issuer.verify_access_token(token) {
            Ok(claims) if claims.aud == self.audience => Some(claims.sub),
            Ok(claims) => {
                tracing::debug!(aud = %claims.aud, "Ignoring token issued for another audience");
                None
            }
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring invalid session token");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth2::keys::KeyManager;
    use axum::http::HeaderValue;

    fn session() -> (BearerSession, Arc<TokenIssuer>) {
        let keys =
            KeyManager::from_private_pem(include_str!("../../tests/fixtures/signing_key.pem"), None)
                .unwrap();
        let issuer = Arc::new(TokenIssuer::new(Arc::new(keys), "https://id.example.com"));
        (BearerSession::new(issuer.clone(), "login"), issuer)
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    #[tokio::test]
    async fn session_audience_token_is_accepted() {
        let (session, issuer) = session();
        let token = issuer
            .issue_access_token("u1", "login", &["openid".to_string()])
            .unwrap();
        assert_eq!(
            session.authenticated_user(&bearer(&token)).await.as_deref(),
            Some("u1")
        );
    }

    #[tokio::test]
    async fn client_access_token_is_not_a_session() {
        let (session, issuer) = session();
        let token = issuer
            .issue_access_token("u1", "c1", &["openid".to_string()])
            .unwrap();
        assert_eq!(session.authenticated_user(&bearer(&token)).await, None);

        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("{SESSION_COOKIE}={token}")).unwrap(),
        );
        assert_eq!(session.authenticated_user(&headers).await, None);
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn session_cookie_is_found_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; oidc_session=tok; lang=en"),
        );
        assert_eq!(session_cookie(&headers), Some("tok"));
    }
}
