//! Refresh token issuance, rotation and revocation.
//!
//! Secrets are opaque and only their SHA-256 digest is stored. Each rotation
//! revokes the presented token and issues a successor in the same chain.
//! Presenting a token that was already rotated away revokes the whole chain.

use crate::entity::oauth2_refresh_token;
use crate::error::RefreshError;
use crate::oauth2::repository::RefreshTokenRepository;
use crate::oauth2::secret::{generate_token, hash_token};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// A freshly minted refresh token. `secret` is handed to the client once and
/// never stored.
#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    pub secret: String,
    pub record: oauth2_refresh_token::Model,
}

pub struct RefreshTokenStore {
    repo: Arc<dyn RefreshTokenRepository>,
    lifetime: Duration,
}

impl RefreshTokenStore {
    pub fn new(repo: Arc<dyn RefreshTokenRepository>) -> Self {
        Self {
            repo,
            lifetime: Duration::days(30),
        }
    }

    pub fn with_lifetime(mut self, seconds: i64) -> Self {
        self.lifetime = Duration::seconds(seconds);
        self
    }

    fn mint(
        &self,
        user_id: &str,
        client_id: &str,
        scope: String,
        rotated_from: Option<&oauth2_refresh_token::Model>,
    ) -> IssuedRefreshToken {
        let now = OffsetDateTime::now_utc();
        let secret = generate_token();
        let id = Uuid::new_v4().to_string();
        let chain_id = rotated_from.map_or_else(|| id.clone(), |parent| parent.chain_id.clone());
        let record = oauth2_refresh_token::Model {
            token_hash: hash_token(&secret),
            chain_id,
            rotated_from: rotated_from.map(|parent| parent.id.clone()),
            client_id: client_id.to_string(),
            user_id: user_id.to_string(),
            scope,
            expires_at: now + self.lifetime,
            revoked_at: None,
            created_at: now,
            id,
        };
        IssuedRefreshToken { secret, record }
    }

    /// Issue a token. With `rotated_from` the new token joins the parent's chain;
    /// otherwise it starts a chain of its own.
    pub async fn issue(
        &self,
        user_id: &str,
        client_id: &str,
        scopes: &[String],
        rotated_from: Option<&oauth2_refresh_token::Model>,
    ) -> Result<IssuedRefreshToken, RefreshError> {
        let issued = self.mint(user_id, client_id, scopes.join(" "), rotated_from);
        self.repo.insert_refresh_token(issued.record.clone()).await?;
        Ok(issued)
    }

    /// Exchange `old_secret` for a successor token.
    ///
    /// Tokens bound to another client are reported as `NotFound` and left
    /// untouched. The successor is written before the parent is revoked, so a
    /// caller losing the revoke race always finds its rival's successor in the
    /// chain it then revokes. If the parent cannot be revoked the successor is
    /// revoked before the storage error is returned.
    pub async fn rotate(
        &self,
        old_secret: &str,
        client_id: &str,
    ) -> Result<IssuedRefreshToken, RefreshError> {
        let Some(current) = self.repo.find_refresh_token(&hash_token(old_secret)).await? else {
            return Err(RefreshError::NotFound);
        };
        if current.client_id != client_id {
            tracing::warn!(
                token_client = %current.client_id,
                client_id = %client_id,
                "Refresh token presented by a different client"
            );
            return Err(RefreshError::NotFound);
        }
        let now = OffsetDateTime::now_utc();
        if current.is_revoked() {
            self.revoke_chain_after_reuse(&current, now).await?;
            return Err(RefreshError::Reused);
        }
        if current.is_expired_at(now) {
            return Err(RefreshError::Expired);
        }

        let successor = self.mint(
            &current.user_id,
            &current.client_id,
            current.scope.clone(),
            Some(&current),
        );
        self.repo
            .insert_refresh_token(successor.record.clone())
            .await?;

        match self.repo.revoke_if_active(&current.id, now).await {
            Ok(true) => {}
            Ok(false) => {
                self.revoke_chain_after_reuse(&current, now).await?;
                return Err(RefreshError::Reused);
            }
            Err(e) => {
                // The successor was never handed out and must not stay usable.
                if let Err(cleanup) = self.repo.revoke_if_active(&successor.record.id, now).await {
                    tracing::error!(
                        chain_id = %current.chain_id,
                        error = %cleanup,
                        "Failed to revoke orphaned refresh token; revoking chain"
                    );
                    self.repo.revoke_chain(&current.chain_id, now).await?;
                }
                return Err(e.into());
            }
        }

        tracing::debug!(chain_id = %current.chain_id, "Refresh token rotated");
        Ok(successor)
    }

    async fn revoke_chain_after_reuse(
        &self,
        token: &oauth2_refresh_token::Model,
        now: OffsetDateTime,
    ) -> Result<(), RefreshError> {
        let revoked = self.repo.revoke_chain(&token.chain_id, now).await?;
        tracing::warn!(
            chain_id = %token.chain_id,
            client_id = %token.client_id,
            user_id = %token.user_id,
            revoked,
            "Refresh token reuse detected; rotation chain revoked"
        );
        Ok(())
    }

    /// Revoke a token and every token in its chain. When `client_id` is given,
    /// tokens bound to other clients are ignored. Returns whether a token matched.
    pub async fn revoke(
        &self,
        secret: &str,
        client_id: Option<&str>,
    ) -> Result<bool, RefreshError> {
        let Some(token) = self.repo.find_refresh_token(&hash_token(secret)).await? else {
            return Ok(false);
        };
        if client_id.is_some_and(|id| id != token.client_id) {
            return Ok(false);
        }
        self.repo
            .revoke_chain(&token.chain_id, OffsetDateTime::now_utc())
            .await?;
        Ok(true)
    }

    pub async fn purge_expired(&self) -> Result<u64, RefreshError> {
        Ok(self
            .repo
            .delete_expired_refresh_tokens(OffsetDateTime::now_utc())
            .await?)
    }
}
