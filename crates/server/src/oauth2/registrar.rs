//! Database-backed client registry.
//!
//! Clients are provisioned out of band; this side only reads them.

use crate::entity::oauth2_client;
use crate::error::{OAuthError, StoreError};
use crate::oauth2::repository::ClientRepository;
use crate::oauth2::secret::verify_client_secret;
use std::sync::Arc;

/// Split a `scope` parameter into distinct scopes, keeping first-seen order.
pub fn parse_scope(scope: Option<&str>) -> Vec<String> {
    let mut scopes: Vec<String> = Vec::new();
    for s in scope.unwrap_or_default().split_whitespace() {
        if !scopes.iter().any(|existing| existing == s) {
            scopes.push(s.to_string());
        }
    }
    scopes
}

#[derive(Clone)]
pub struct ClientRegistry {
    repo: Arc<dyn ClientRepository>,
}

impl ClientRegistry {
    pub fn new(repo: Arc<dyn ClientRepository>) -> Self {
        Self { repo }
    }

    pub async fn find(&self, client_id: &str) -> Result<Option<oauth2_client::Model>, StoreError> {
        self.repo.find_client(client_id).await
    }

    /// Look up and authenticate a client. Returns the client only when the
    /// credentials check out; unknown clients and bad secrets are
    /// indistinguishable to the caller.
    pub async fn authenticate(
        &self,
        client_id: &str,
        secret: Option<&str>,
    ) -> Result<Option<oauth2_client::Model>, StoreError> {
        let Some(client) = self.find(client_id).await? else {
            return Ok(None);
        };
        Ok(Self::verify_secret(&client, secret).then_some(client))
    }

    /// Public clients carry no secret. Confidential clients must present one
    /// matching the stored hash.
    pub fn verify_secret(client: &oauth2_client::Model, secret: Option<&str>) -> bool {
        if client.is_public {
            return true;
        }
        match (client.secret_hash.as_deref(), secret) {
            (Some(hash), Some(secret)) => verify_client_secret(secret, hash),
            _ => false,
        }
    }

    /// Exact string comparison; no prefix or wildcard matching.
    pub fn validate_redirect(client: &oauth2_client::Model, redirect_uri: &str) -> bool {
        client.is_redirect_uri_allowed(redirect_uri)
    }

    /// Every requested scope must be allowed for the client. An empty request
    /// grants the client's full allowed set.
    pub fn validate_scopes(
        client: &oauth2_client::Model,
        requested: &[String],
    ) -> Result<Vec<String>, OAuthError> {
        let allowed = client.allowed_scopes();
        if requested.is_empty() {
            return Ok(allowed.into_iter().collect());
        }
        match requested.iter().find(|scope| !allowed.contains(*scope)) {
            Some(scope) => Err(OAuthError::invalid_scope(format!(
                "Scope '{scope}' is not allowed for this client"
            ))),
            None => Ok(requested.to_vec()),
        }
    }
}
