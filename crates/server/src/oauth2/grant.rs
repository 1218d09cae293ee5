//! Grant handling: the authorization request and the token endpoint's
//! `authorization_code` and `refresh_token` grants.
//!
//! Every collaborator is passed in explicitly; the handler itself keeps no
//! state between requests.

use crate::entity::oauth2_client;
use crate::error::{ErrorCode, OAuthError};
use crate::oauth2::codes::{CodeStore, NewAuthorizationCode, PkceChallenge};
use crate::oauth2::issuer::{IdTokenContext, ScopedClaims, TokenIssuer};
use crate::oauth2::pkce::{self, ChallengeMethod};
use crate::oauth2::refresh::RefreshTokenStore;
use crate::oauth2::registrar::{ClientRegistry, parse_scope};
use crate::oauth2::repository::UserRepository;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use time::OffsetDateTime;
use utoipa::{IntoParams, ToSchema};

/// Parameters of `GET /oauth/authorize`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuthorizeRequest {
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    /// OpenID Connect nonce, echoed into the ID token
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    /// `S256` or `plain` (default)
    pub code_challenge_method: Option<String>,
}

/// Form body of `POST /oauth/token`.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct TokenRequest {
    #[serde(default)]
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Client credentials from HTTP Basic auth or the form body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    pub scope: String,
}

/// OpenID Connect UserInfo response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UserInfo {
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
}

/// A successful authorization request, to be sent back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationGrant {
    pub redirect_uri: String,
    pub code: String,
    pub state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizeError {
    /// The client or redirect URI cannot be trusted; answer the user agent directly.
    Direct(OAuthError),
    /// Report back to the validated redirect URI.
    Redirect {
        redirect_uri: String,
        state: Option<String>,
        error: OAuthError,
    },
}

impl AuthorizeError {
    pub fn error(&self) -> &OAuthError {
        match self {
            Self::Direct(error) | Self::Redirect { error, .. } => error,
        }
    }
}

/// How far a token request got; logged when it is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantStage {
    Received,
    ClientValidated,
    GrantDispatched,
    CodeExchanged,
    TokenRefreshed,
    Responded,
}

impl fmt::Display for GrantStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::ClientValidated => "client_validated",
            Self::GrantDispatched => "grant_dispatched",
            Self::CodeExchanged => "code_exchanged",
            Self::TokenRefreshed => "token_refreshed",
            Self::Responded => "responded",
        };
        f.write_str(name)
    }
}

/// Rows removed by a maintenance sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    pub codes: u64,
    pub refresh_tokens: u64,
}

fn required<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, OAuthError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| OAuthError::invalid_request(format!("{name} is required")))
}

pub struct GrantHandler {
    clients: ClientRegistry,
    codes: CodeStore,
    refresh_tokens: RefreshTokenStore,
    issuer: Arc<TokenIssuer>,
    users: Arc<dyn UserRepository>,
}

impl GrantHandler {
    pub fn new(
        clients: ClientRegistry,
        codes: CodeStore,
        refresh_tokens: RefreshTokenStore,
        issuer: Arc<TokenIssuer>,
        users: Arc<dyn UserRepository>,
    ) -> Self {
        Self {
            clients,
            codes,
            refresh_tokens,
            issuer,
            users,
        }
    }

    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    /// Validate an authorization request for a signed-in user and mint a code.
    ///
    /// Errors before the redirect URI is validated are answered directly;
    /// later ones go back to the client.
    pub async fn authorize(
        &self,
        request: &AuthorizeRequest,
        user_id: Option<&str>,
    ) -> Result<AuthorizationGrant, AuthorizeError> {
        let client_id =
            required(request.client_id.as_deref(), "client_id").map_err(AuthorizeError::Direct)?;
        let client = self
            .clients
            .find(client_id)
            .await
            .map_err(|e| AuthorizeError::Direct(e.into()))?
            .ok_or_else(|| {
                AuthorizeError::Direct(OAuthError::new(ErrorCode::InvalidClient, "Unknown client"))
            })?;

        let redirect_uri = match request.redirect_uri.as_deref() {
            Some(uri) if ClientRegistry::validate_redirect(&client, uri) => uri.to_string(),
            Some(_) => {
                tracing::warn!(client_id = %client.id, "Unregistered redirect_uri");
                return Err(AuthorizeError::Direct(OAuthError::invalid_request(
                    "redirect_uri is not registered for this client",
                )));
            }
            None => match client.redirect_uris_list().as_slice() {
                [only] => only.clone(),
                _ => {
                    return Err(AuthorizeError::Direct(OAuthError::invalid_request(
                        "redirect_uri is required",
                    )));
                }
            },
        };

        let redirect_err = |error: OAuthError| AuthorizeError::Redirect {
            redirect_uri: redirect_uri.clone(),
            state: request.state.clone(),
            error,
        };

        if request.response_type.as_deref() != Some("code") {
            return Err(redirect_err(OAuthError::new(
                ErrorCode::UnsupportedResponseType,
                "Only response_type=code is supported",
            )));
        }

        let scopes =
            ClientRegistry::validate_scopes(&client, &parse_scope(request.scope.as_deref()))
                .map_err(redirect_err)?;

        let challenge = self
            .pkce_challenge(&client, request)
            .map_err(redirect_err)?;

        let Some(user_id) = user_id else {
            return Err(AuthorizeError::Direct(OAuthError::new(
                ErrorCode::LoginRequired,
                "User is not signed in",
            )));
        };

        let record = self
            .codes
            .issue(NewAuthorizationCode {
                client_id: &client.id,
                user_id,
                redirect_uri: &redirect_uri,
                scopes: &scopes,
                challenge,
                nonce: request.nonce.as_deref(),
            })
            .await
            .map_err(|e| redirect_err(e.into()))?;

        tracing::info!(client_id = %client.id, scope = %record.scope, "Authorization code granted");

        Ok(AuthorizationGrant {
            redirect_uri,
            code: record.code,
            state: request.state.clone(),
        })
    }

    fn pkce_challenge(
        &self,
        client: &oauth2_client::Model,
        request: &AuthorizeRequest,
    ) -> Result<Option<PkceChallenge>, OAuthError> {
        let method = request.code_challenge_method.as_deref();
        match request.code_challenge.as_deref().filter(|c| !c.is_empty()) {
            Some(challenge) => {
                let method = ChallengeMethod::from_param(method)
                    .map_err(|e| OAuthError::invalid_request(e.to_string()))?;
                if !(43..=128).contains(&challenge.len()) {
                    return Err(OAuthError::invalid_request(
                        "code_challenge must be 43 to 128 characters",
                    ));
                }
                Ok(Some(PkceChallenge {
                    challenge: challenge.to_string(),
                    method,
                }))
            }
            None if client.is_public => Err(OAuthError::invalid_request(
                "code_challenge is required for public clients",
            )),
            None if method.is_some() => Err(OAuthError::invalid_request(
                "code_challenge_method given without code_challenge",
            )),
            None => Ok(None),
        }
    }

    /// Run the token endpoint for an already parsed request.
    pub async fn exchange(
        &self,
        credentials: ClientCredentials,
        request: &TokenRequest,
    ) -> Result<TokenResponse, OAuthError> {
        let mut stage = GrantStage::Received;
        let result = self.dispatch(&mut stage, &credentials, request).await;
        let client_id = credentials.client_id.as_deref().unwrap_or_default();
        match &result {
            Ok(_) => tracing::info!(
                client_id,
                grant_type = %request.grant_type,
                "Token issued"
            ),
            Err(err) => tracing::info!(
                client_id,
                grant_type = %request.grant_type,
                stage = %stage,
                error = %err.code,
                "Token request rejected"
            ),
        }
        result
    }

    async fn dispatch(
        &self,
        stage: &mut GrantStage,
        credentials: &ClientCredentials,
        request: &TokenRequest,
    ) -> Result<TokenResponse, OAuthError> {
        let Some(client_id) = credentials.client_id.as_deref().filter(|id| !id.is_empty()) else {
            return Err(OAuthError::invalid_client());
        };
        let client = self
            .clients
            .authenticate(client_id, credentials.client_secret.as_deref())
            .await?
            .ok_or_else(OAuthError::invalid_client)?;
        *stage = GrantStage::ClientValidated;

        let response = match request.grant_type.as_str() {
            "authorization_code" => {
                *stage = GrantStage::GrantDispatched;
                self.exchange_code(stage, &client, request).await?
            }
            "refresh_token" => {
                *stage = GrantStage::GrantDispatched;
                self.refresh(stage, &client, request).await?
            }
            "" => return Err(OAuthError::invalid_request("grant_type is required")),
            other => {
                return Err(OAuthError::new(
                    ErrorCode::UnsupportedGrantType,
                    format!("Grant type '{other}' is not supported"),
                ));
            }
        };
        *stage = GrantStage::Responded;
        Ok(response)
    }

    async fn exchange_code(
        &self,
        stage: &mut GrantStage,
        client: &oauth2_client::Model,
        request: &TokenRequest,
    ) -> Result<TokenResponse, OAuthError> {
        let code = required(request.code.as_deref(), "code")?;
        let redirect_uri = required(request.redirect_uri.as_deref(), "redirect_uri")?;

        let record = self.codes.consume_once(code).await?;

        if record.client_id != client.id {
            tracing::warn!(
                client_id = %client.id,
                code_client = %record.client_id,
                "Authorization code presented by a different client"
            );
            return Err(OAuthError::invalid_grant(
                "Authorization code was issued to another client",
            ));
        }
        if record.redirect_uri != redirect_uri {
            return Err(OAuthError::invalid_grant("redirect_uri does not match"));
        }
        if let Some(challenge) = record.code_challenge.as_deref() {
            let verifier = request
                .code_verifier
                .as_deref()
                .ok_or_else(|| OAuthError::invalid_grant("code_verifier is required"))?;
            let method = record.code_challenge_method.as_deref().unwrap_or("plain");
            if !pkce::verify(method, challenge, verifier) {
                return Err(OAuthError::invalid_grant("PKCE verification failed"));
            }
        }
        *stage = GrantStage::CodeExchanged;

        let scopes = record.scopes_list();
        let mut response = self
            .sign_tokens(
                &record.user_id,
                &client.id,
                &scopes,
                record.nonce.as_deref(),
                Some(record.created_at),
            )
            .await?;
        let refresh = self
            .refresh_tokens
            .issue(&record.user_id, &client.id, &scopes, None)
            .await?;
        response.refresh_token = Some(refresh.secret);
        Ok(response)
    }

    async fn refresh(
        &self,
        stage: &mut GrantStage,
        client: &oauth2_client::Model,
        request: &TokenRequest,
    ) -> Result<TokenResponse, OAuthError> {
        let secret = required(request.refresh_token.as_deref(), "refresh_token")?;
        let rotated = self.refresh_tokens.rotate(secret, &client.id).await?;
        *stage = GrantStage::TokenRefreshed;

        let scopes = rotated.record.scopes_list();
        let mut response = self
            .sign_tokens(&rotated.record.user_id, &client.id, &scopes, None, None)
            .await?;
        response.refresh_token = Some(rotated.secret);
        Ok(response)
    }

    async fn sign_tokens(
        &self,
        user_id: &str,
        client_id: &str,
        scopes: &[String],
        nonce: Option<&str>,
        auth_time: Option<OffsetDateTime>,
    ) -> Result<TokenResponse, OAuthError> {
        let access_token = self.issuer.issue_access_token(user_id, client_id, scopes)?;
        let id_token = if scopes.iter().any(|s| s == "openid") {
            let user = self.users.find_user(user_id).await?;
            if user.is_none() {
                tracing::warn!(user_id, "No user record; ID token carries no profile claims");
            }
            Some(self.issuer.issue_id_token(
                user_id,
                client_id,
                scopes,
                IdTokenContext {
                    nonce,
                    auth_time,
                    user: user.as_ref(),
                },
            )?)
        } else {
            None
        };
        Ok(TokenResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.issuer.access_token_lifetime(),
            refresh_token: None,
            id_token,
            scope: scopes.join(" "),
        })
    }

    /// RFC 7009 revocation. Unknown tokens and tokens of other clients are
    /// silently ignored.
    pub async fn revoke(
        &self,
        credentials: ClientCredentials,
        token: Option<&str>,
    ) -> Result<(), OAuthError> {
        let Some(client_id) = credentials.client_id.as_deref().filter(|id| !id.is_empty()) else {
            return Err(OAuthError::invalid_client());
        };
        let client = self
            .clients
            .authenticate(client_id, credentials.client_secret.as_deref())
            .await?
            .ok_or_else(OAuthError::invalid_client)?;
        let token = required(token, "token")?;
        let revoked = self.refresh_tokens.revoke(token, Some(&client.id)).await?;
        tracing::info!(client_id = %client.id, revoked, "Revocation request processed");
        Ok(())
    }

    /// Claims about the bearer of a valid access token.
    pub async fn userinfo(&self, access_token: &str) -> Result<UserInfo, OAuthError> {
        let claims = self.issuer.verify_access_token(access_token).map_err(|e| {
            tracing::debug!(error = %e, "Rejected access token");
            OAuthError::new(ErrorCode::InvalidToken, "Access token is invalid or expired")
        })?;
        if !claims.has_scope("openid") {
            return Err(OAuthError::new(
                ErrorCode::InsufficientScope,
                "The openid scope is required",
            ));
        }
        let user = self.users.find_user(&claims.sub).await?.ok_or_else(|| {
            OAuthError::new(ErrorCode::InvalidToken, "Token subject no longer exists")
        })?;
        let scopes = parse_scope(Some(claims.scope.as_str()));
        let scoped = ScopedClaims::for_user(&user, &scopes);
        Ok(UserInfo {
            sub: claims.sub,
            name: scoped.name,
            preferred_username: scoped.preferred_username,
            nickname: scoped.nickname,
            picture: scoped.picture,
            email: scoped.email,
            email_verified: scoped.email_verified,
        })
    }

    /// Delete expired codes and refresh tokens. Failures are logged and counted as zero.
    pub async fn purge_expired(&self) -> PurgeStats {
        let codes = self.codes.purge_expired().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to purge expired authorization codes");
            0
        });
        let refresh_tokens = self.refresh_tokens.purge_expired().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to purge expired refresh tokens");
            0
        });
        if codes > 0 || refresh_tokens > 0 {
            tracing::info!(codes, refresh_tokens, "Purged expired grants");
        }
        PurgeStats {
            codes,
            refresh_tokens,
        }
    }
}
