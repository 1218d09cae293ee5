//! Shared fixtures: an in-memory database with seeded clients and users, and
//! a key manager loaded from `tests/fixtures`.

#![allow(dead_code)]

use migration::{Migrator, MigratorTrait};
use oidc_provider::{
    config::OAuth2Config,
    entity::{oauth2_client, oauth2_user},
    oauth2::{
        ClientRegistry, CodeStore, GrantHandler, KeyManager, OAuth2State, RefreshTokenStore,
        TokenIssuer, repository::DbRepository, secret::hash_client_secret,
    },
};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, Database, DatabaseConnection};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

pub const SIGNING_KEY: &str = include_str!("../fixtures/signing_key.pem");
pub const ISSUER: &str = "https://id.example.com";

pub const CLIENT_ID: &str = "c1";
pub const CLIENT_SECRET: &str = "s3cr3t";
pub const OTHER_CLIENT_ID: &str = "c2";
pub const OTHER_CLIENT_SECRET: &str = "other-secret";
pub const PUBLIC_CLIENT_ID: &str = "spa";
pub const REDIRECT_URI: &str = "https://a/cb";
pub const USER_ID: &str = "u1";

// RFC 7636 Appendix B
pub const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
pub const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

/// Migrated in-memory database with three clients and one user.
pub async fn create_test_db() -> Arc<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await.expect("connect");
    Migrator::up(&db, None).await.expect("migrate");

    let now = OffsetDateTime::now_utc();
    for (id, secret, is_public, redirect_uris) in [
        (CLIENT_ID, Some(CLIENT_SECRET), false, r#"["https://a/cb"]"#),
        (
            OTHER_CLIENT_ID,
            Some(OTHER_CLIENT_SECRET),
            false,
            r#"["https://a/cb", "https://b/cb"]"#,
        ),
        (PUBLIC_CLIENT_ID, None, true, r#"["https://spa/cb"]"#),
    ] {
        oauth2_client::ActiveModel {
            id: Set(id.to_string()),
            secret_hash: Set(secret.map(|s| hash_client_secret(s).expect("hash secret"))),
            name: Set(format!("Client {id}")),
            redirect_uris: Set(redirect_uris.to_string()),
            scopes: Set("openid profile email".to_string()),
            is_public: Set(is_public),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&db)
        .await
        .expect("insert client");
    }

    oauth2_user::ActiveModel {
        id: Set(USER_ID.to_string()),
        username: Set("alice".to_string()),
        email: Set("alice@example.com".to_string()),
        email_verified: Set(true),
        nickname: Set(Some("Al".to_string())),
        avatar_url: Set(Some("https://cdn.example.com/alice.png".to_string())),
        created_at: Set(now),
    }
    .insert(&db)
    .await
    .expect("insert user");

    Arc::new(db)
}

pub fn test_config() -> OAuth2Config {
    OAuth2Config::new(ISSUER)
}

pub fn test_keys() -> Arc<KeyManager> {
    Arc::new(KeyManager::from_private_pem(SIGNING_KEY, Some("test-key".into())).expect("keys"))
}

/// Grant handler over `db` with configurable code and refresh lifetimes.
pub fn grant_handler(
    db: Arc<DatabaseConnection>,
    code_lifetime: i64,
    refresh_lifetime: i64,
) -> (GrantHandler, Arc<TokenIssuer>) {
    let repo = Arc::new(DbRepository::new(db, Duration::from_secs(5)));
    let issuer = Arc::new(TokenIssuer::new(test_keys(), ISSUER));
    let handler = GrantHandler::new(
        ClientRegistry::new(repo.clone()),
        CodeStore::new(repo.clone()).with_lifetime(code_lifetime),
        RefreshTokenStore::new(repo.clone()).with_lifetime(refresh_lifetime),
        issuer.clone(),
        repo,
    );
    (handler, issuer)
}

pub async fn create_test_state() -> (OAuth2State, Arc<DatabaseConnection>) {
    let db = create_test_db().await;
    let state = OAuth2State::new(db.clone(), test_keys(), &test_config());
    (state, db)
}

/// A session token for [`USER_ID`], as the login service would hand out.
pub fn session_token(state: &OAuth2State) -> String {
    state
        .grants
        .issuer()
        .issue_access_token(
            USER_ID,
            &test_config().session_audience,
            &["openid".to_string()],
        )
        .expect("session token")
}
