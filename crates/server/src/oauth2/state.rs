//! OAuth2 state management.
//!
//! Wires the authorization core together from a database connection, a key
//! manager and configuration.

use crate::config::OAuth2Config;
use crate::oauth2::codes::CodeStore;
use crate::oauth2::grant::GrantHandler;
use crate::oauth2::issuer::TokenIssuer;
use crate::oauth2::keys::KeyManager;
use crate::oauth2::refresh::RefreshTokenStore;
use crate::oauth2::registrar::ClientRegistry;
use crate::oauth2::repository::DbRepository;
use crate::oauth2::session::{BearerSession, SessionAuthenticator};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;

/// Shared state of the OAuth2 routers.
#[derive(Clone)]
pub struct OAuth2State {
    pub grants: Arc<GrantHandler>,
    pub keys: Arc<KeyManager>,
    pub sessions: Arc<dyn SessionAuthenticator>,
    /// Issuer URL without trailing slash
    pub issuer_url: String,
}

impl OAuth2State {
    pub fn new(db: Arc<DatabaseConnection>, keys: Arc<KeyManager>, config: &OAuth2Config) -> Self {
        let repo = Arc::new(DbRepository::new(
            db,
            Duration::from_millis(config.storage_timeout_ms),
        ));
        let issuer = Arc::new(
            TokenIssuer::new(keys.clone(), config.issuer())
                .with_lifetimes(config.access_token_lifetime, config.id_token_lifetime),
        );
        let grants = GrantHandler::new(
            ClientRegistry::new(repo.clone()),
            CodeStore::new(repo.clone()).with_lifetime(config.authorization_code_lifetime),
            RefreshTokenStore::new(repo.clone()).with_lifetime(config.refresh_token_lifetime),
            issuer.clone(),
            repo,
        );
        Self {
            grants: Arc::new(grants),
            keys,
            sessions: Arc::new(BearerSession::new(issuer, config.session_audience.clone())),
            issuer_url: config.issuer().to_string(),
        }
    }

    /// Replace the session authenticator, e.g. with one backed by a login service.
    pub fn with_sessions(mut self, sessions: Arc<dyn SessionAuthenticator>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.issuer_url, path)
    }
}
