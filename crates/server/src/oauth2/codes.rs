//! Authorization code issuance and single-use redemption.

use crate::entity::oauth2_authorization;
use crate::error::CodeError;
use crate::oauth2::pkce::ChallengeMethod;
use crate::oauth2::repository::AuthorizationCodeRepository;
use crate::oauth2::secret::generate_token;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

/// PKCE parameters captured at authorization time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge {
    pub challenge: String,
    pub method: ChallengeMethod,
}

/// Everything bound into a new authorization code.
#[derive(Debug, Clone)]
pub struct NewAuthorizationCode<'a> {
    pub client_id: &'a str,
    pub user_id: &'a str,
    pub redirect_uri: &'a str,
    pub scopes: &'a [String],
    pub challenge: Option<PkceChallenge>,
    pub nonce: Option<&'a str>,
}

pub struct CodeStore {
    repo: Arc<dyn AuthorizationCodeRepository>,
    lifetime: Duration,
}

impl CodeStore {
    pub fn new(repo: Arc<dyn AuthorizationCodeRepository>) -> Self {
        Self {
            repo,
            lifetime: Duration::minutes(10),
        }
    }

    pub fn with_lifetime(mut self, seconds: i64) -> Self {
        self.lifetime = Duration::seconds(seconds);
        self
    }

    /// Persist a fresh code with `expires_at = now + lifetime`.
    pub async fn issue(
        &self,
        request: NewAuthorizationCode<'_>,
    ) -> Result<oauth2_authorization::Model, CodeError> {
        let now = OffsetDateTime::now_utc();
        let (code_challenge, code_challenge_method) = match request.challenge {
            Some(pkce) => (Some(pkce.challenge), Some(pkce.method.as_str().to_string())),
            None => (None, None),
        };
        let record = oauth2_authorization::Model {
            code: generate_token(),
            client_id: request.client_id.to_string(),
            user_id: request.user_id.to_string(),
            redirect_uri: request.redirect_uri.to_string(),
            scope: request.scopes.join(" "),
            nonce: request.nonce.map(str::to_string),
            code_challenge,
            code_challenge_method,
            consumed: false,
            consumed_at: None,
            expires_at: now + self.lifetime,
            created_at: now,
        };
        self.repo.insert_code(record.clone()).await?;
        tracing::debug!(client_id = %record.client_id, "Authorization code issued");
        Ok(record)
    }

    /// Redeem a code. Succeeds for at most one caller per code; the flip to
    /// consumed is a conditional write, so concurrent redemptions race on the
    /// store rather than on a prior read.
    ///
    /// An expired code is still marked consumed before `Expired` is returned.
    pub async fn consume_once(
        &self,
        code: &str,
    ) -> Result<oauth2_authorization::Model, CodeError> {
        let Some(record) = self.repo.find_code(code).await? else {
            return Err(CodeError::NotFound);
        };
        let now = OffsetDateTime::now_utc();
        if record.consumed {
            tracing::warn!(client_id = %record.client_id, "Authorization code replayed");
            return Err(CodeError::AlreadyConsumed);
        }
        if !self.repo.mark_consumed(code, now).await? {
            tracing::warn!(client_id = %record.client_id, "Authorization code replayed");
            return Err(CodeError::AlreadyConsumed);
        }
        if record.is_expired_at(now) {
            return Err(CodeError::Expired);
        }
        Ok(oauth2_authorization::Model {
            consumed: true,
            consumed_at: Some(now),
            ..record
        })
    }

    /// Delete codes past their expiry. Returns the number removed.
    pub async fn purge_expired(&self) -> Result<u64, CodeError> {
        Ok(self
            .repo
            .delete_expired_codes(OffsetDateTime::now_utc())
            .await?)
    }
}
