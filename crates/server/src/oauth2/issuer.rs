//! Signed access and ID tokens.

use crate::entity::oauth2_user;
use crate::error::TokenError;
use crate::oauth2::keys::KeyManager;
use jsonwebtoken::{Validation, decode, decode_header, encode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;

/// Claims of an RS256 access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub iss: String,
    pub sub: String,
    /// The client the token was issued to.
    pub aud: String,
    /// Space-separated granted scopes.
    pub scope: String,
    pub iat: i64,
    pub exp: i64,
}

impl AccessTokenClaims {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scope.split_whitespace().any(|s| s == scope)
    }
}

/// OpenID Connect ID token claims. Profile and email claims are only present
/// when the matching scope was granted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
}

/// Profile and email claims derived from granted scopes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopedClaims {
    pub name: Option<String>,
    pub preferred_username: Option<String>,
    pub nickname: Option<String>,
    pub picture: Option<String>,
    pub email: Option<String>,
    pub email_verified: Option<bool>,
}

impl ScopedClaims {
    pub fn for_user(user: &oauth2_user::Model, scopes: &[String]) -> Self {
        let mut claims = Self::default();
        if scopes.iter().any(|s| s == "profile") {
            claims.name = Some(user.username.clone());
            claims.preferred_username = Some(user.username.clone());
            claims.nickname = user.nickname.clone();
            claims.picture = user.avatar_url.clone();
        }
        if scopes.iter().any(|s| s == "email") {
            claims.email = Some(user.email.clone());
            claims.email_verified = Some(user.email_verified);
        }
        claims
    }
}

/// Inputs for an ID token beyond the subject and audience.
#[derive(Debug, Clone, Default)]
pub struct IdTokenContext<'a> {
    pub nonce: Option<&'a str>,
    pub auth_time: Option<OffsetDateTime>,
    /// Resolved user record; `None` yields an ID token without profile claims.
    pub user: Option<&'a oauth2_user::Model>,
}

pub struct TokenIssuer {
    keys: Arc<KeyManager>,
    issuer: String,
    access_token_lifetime: i64,
    id_token_lifetime: i64,
}

impl TokenIssuer {
    pub fn new(keys: Arc<KeyManager>, issuer: impl Into<String>) -> Self {
        Self {
            keys,
            issuer: issuer.into().trim_end_matches('/').to_string(),
            access_token_lifetime: 3600,
            id_token_lifetime: 3600,
        }
    }

    pub fn with_lifetimes(mut self, access_token_secs: i64, id_token_secs: i64) -> Self {
        self.access_token_lifetime = access_token_secs;
        self.id_token_lifetime = id_token_secs;
        self
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn access_token_lifetime(&self) -> i64 {
        self.access_token_lifetime
    }

    pub fn keys(&self) -> &KeyManager {
        &self.keys
    }

    pub fn issue_access_token(
        &self,
        user_id: &str,
        client_id: &str,
        scopes: &[String],
    ) -> Result<String, TokenError> {
        let iat = OffsetDateTime::now_utc().unix_timestamp();
        let claims = AccessTokenClaims {
            iss: self.issuer.clone(),
            sub: user_id.to_string(),
            aud: client_id.to_string(),
            scope: scopes.join(" "),
            iat,
            exp: iat + self.access_token_lifetime,
        };
        self.sign(&claims)
    }

    pub fn issue_id_token(
        &self,
        user_id: &str,
        client_id: &str,
        scopes: &[String],
        context: IdTokenContext<'_>,
    ) -> Result<String, TokenError> {
        let iat = OffsetDateTime::now_utc().unix_timestamp();
        let scoped = context
            .user
            .map(|user| ScopedClaims::for_user(user, scopes))
            .unwrap_or_default();
        let claims = IdTokenClaims {
            iss: self.issuer.clone(),
            sub: user_id.to_string(),
            aud: client_id.to_string(),
            iat,
            exp: iat + self.id_token_lifetime,
            scope: scopes.join(" "),
            auth_time: context.auth_time.map(OffsetDateTime::unix_timestamp),
            nonce: context.nonce.map(str::to_string),
            name: scoped.name,
            preferred_username: scoped.preferred_username,
            nickname: scoped.nickname,
            picture: scoped.picture,
            email: scoped.email,
            email_verified: scoped.email_verified,
        };
        self.sign(&claims)
    }

    /// Check signature, issuer and expiry of an access token.
    pub fn verify_access_token(&self, token: &str) -> Result<AccessTokenClaims, TokenError> {
        self.verify(token, None)
    }

    /// Check an ID token, additionally requiring `aud == client_id`.
    pub fn verify_id_token(&self, token: &str, client_id: &str) -> Result<IdTokenClaims, TokenError> {
        self.verify(token, Some(client_id))
    }

    fn sign<T: Serialize>(&self, claims: &T) -> Result<String, TokenError> {
        encode(&self.keys.header(), claims, self.keys.encoding_key()).map_err(TokenError::Signing)
    }

    fn verify<T: DeserializeOwned>(
        &self,
        token: &str,
        audience: Option<&str>,
    ) -> Result<T, TokenError> {
        let header = decode_header(token).map_err(TokenError::Invalid)?;
        let kid = header.kid.ok_or(TokenError::MissingKeyId)?;
        let key = self
            .keys
            .decoding_key(&kid)
            .ok_or_else(|| TokenError::UnknownKey(kid.clone()))?;

        let mut validation = Validation::new(self.keys.algorithm());
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        match audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        decode::<T>(token, key, &validation)
            .map(|data| data.claims)
            .map_err(TokenError::Invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use crate::config::{RetiredKeyConfig, SigningKeyConfig};

    const SIGNING_KEY: &str = include_str!("../../tests/fixtures/signing_key.pem");
    const RETIRED_KEY: &str = include_str!("../../tests/fixtures/retired_key.pem");
    const RETIRED_PUBLIC: &str = include_str!("../../tests/fixtures/retired_key.pub.pem");

    fn issuer() -> TokenIssuer {
        let keys = KeyManager::from_private_pem(SIGNING_KEY, Some("k1".into())).unwrap();
        TokenIssuer::new(Arc::new(keys), "https://id.example.com/")
    }

    fn user() -> oauth2_user::Model {
        oauth2_user::Model {
            id: "u1".into(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            email_verified: true,
            nickname: Some("Al".into()),
            avatar_url: Some("https://cdn.example.com/a.png".into()),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    fn scopes(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn access_token_round_trips() {
        let issuer = issuer();
        let token = issuer
            .issue_access_token("u1", "c1", &scopes(&["openid", "profile"]))
            .unwrap();
        let header = decode_header(&token).unwrap();
        assert_eq!(header.kid.as_deref(), Some("k1"));
        assert_eq!(header.alg, jsonwebtoken::Algorithm::RS256);

        let claims = issuer.verify_access_token(&token).unwrap();
        assert_eq!(claims.iss, "https://id.example.com");
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.aud, "c1");
        assert_eq!(claims.scope, "openid profile");
        assert_eq!(claims.exp - claims.iat, 3600);
        assert!(claims.has_scope("profile"));
    }

    #[test]
    fn id_token_claims_follow_scopes() {
        let issuer = issuer();
        let user = user();
        let token = issuer
            .issue_id_token(
                "u1",
                "c1",
                &scopes(&["openid", "profile"]),
                IdTokenContext {
                    nonce: Some("n-123"),
                    auth_time: None,
                    user: Some(&user),
                },
            )
            .unwrap();
        let claims = issuer.verify_id_token(&token, "c1").unwrap();
        assert_eq!(claims.nonce.as_deref(), Some("n-123"));
        assert_eq!(claims.name.as_deref(), Some("alice"));
        assert_eq!(claims.preferred_username.as_deref(), Some("alice"));
        assert_eq!(claims.nickname.as_deref(), Some("Al"));
        assert_eq!(claims.email, None);
        assert_eq!(claims.email_verified, None);
        assert!(issuer.verify_id_token(&token, "other").is_err());
    }

    #[test]
    fn id_token_email_scope_only() {
        let issuer = issuer();
        let user = user();
        let token = issuer
            .issue_id_token(
                "u1",
                "c1",
                &scopes(&["openid", "email"]),
                IdTokenContext {
                    user: Some(&user),
                    ..Default::default()
                },
            )
            .unwrap();
        let claims = issuer.verify_id_token(&token, "c1").unwrap();
        assert_eq!(claims.email.as_deref(), Some("alice@example.com"));
        assert_eq!(claims.email_verified, Some(true));
        assert_eq!(claims.name, None);
        assert_eq!(claims.nonce, None);
    }

    #[test]
    fn expired_token_is_rejected() {
        let issuer = issuer().with_lifetimes(-120, -120);
        let token = issuer
            .issue_access_token("u1", "c1", &scopes(&["openid"]))
            .unwrap();
        assert!(matches!(
            issuer.verify_access_token(&token),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let issuer = issuer();
        let token = issuer
            .issue_access_token("u1", "c1", &scopes(&["openid"]))
            .unwrap();
        let mut parts: Vec<String> = token.split('.').map(String::from).collect();
        let forged = serde_json::json!({
            "iss": "https://id.example.com",
            "sub": "admin",
            "aud": "c1",
            "scope": "openid",
            "iat": 0,
            "exp": i64::MAX / 2,
        });
        parts[1] = URL_SAFE_NO_PAD.encode(forged.to_string());
        assert!(issuer.verify_access_token(&parts.join(".")).is_err());
    }

    #[test]
    fn foreign_issuer_is_rejected() {
        let keys = Arc::new(KeyManager::from_private_pem(SIGNING_KEY, Some("k1".into())).unwrap());
        let other = TokenIssuer::new(keys.clone(), "https://evil.example.com");
        let ours = TokenIssuer::new(keys, "https://id.example.com");
        let token = other
            .issue_access_token("u1", "c1", &scopes(&["openid"]))
            .unwrap();
        assert!(ours.verify_access_token(&token).is_err());
    }

    #[test]
    fn tokens_from_retired_key_still_verify() {
        let old_keys = KeyManager::from_private_pem(RETIRED_KEY, Some("old".into())).unwrap();
        let old_issuer = TokenIssuer::new(Arc::new(old_keys), "https://id.example.com");
        let token = old_issuer
            .issue_access_token("u1", "c1", &scopes(&["openid"]))
            .unwrap();

        let rotated = KeyManager::from_private_pem(SIGNING_KEY, Some("new".into()))
            .unwrap()
            .with_retired_public_pem(RETIRED_PUBLIC, Some("old".into()))
            .unwrap();
        let current = TokenIssuer::new(Arc::new(rotated), "https://id.example.com");
        assert_eq!(current.verify_access_token(&token).unwrap().sub, "u1");

        let without_retired = issuer();
        assert!(matches!(
            without_retired.verify_access_token(&token),
            Err(TokenError::UnknownKey(_))
        ));
    }

    #[test]
    fn configured_rotation_verifies_tokens_under_old_key_id() {
        let old_keys = KeyManager::from_private_pem(RETIRED_KEY, Some("2026-04".into())).unwrap();
        let old_issuer = TokenIssuer::new(Arc::new(old_keys), "https://id.example.com");
        let token = old_issuer
            .issue_access_token("u1", "c1", &scopes(&["openid"]))
            .unwrap();

        let fixtures = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
        let config = SigningKeyConfig {
            private_key_path: Some(fixtures.join("signing_key.pem")),
            key_id: Some("2026-10".into()),
            retired_keys: vec![RetiredKeyConfig {
                public_key_path: fixtures.join("retired_key.pub.pem"),
                key_id: Some("2026-04".into()),
            }],
        };
        let rotated = KeyManager::from_config(&config).unwrap();
        let current = TokenIssuer::new(Arc::new(rotated), "https://id.example.com");
        assert_eq!(current.verify_access_token(&token).unwrap().sub, "u1");
    }
}
