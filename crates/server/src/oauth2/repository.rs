//! Storage seams for the authorization core.
//!
//! Each store talks to one of these traits. [`DbRepository`] implements all of
//! them on top of SeaORM and bounds every call by a deadline.

use crate::entity::{oauth2_authorization, oauth2_client, oauth2_refresh_token, oauth2_user};
use crate::error::StoreError;
use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

#[async_trait]
pub trait ClientRepository: Send + Sync {
    async fn find_client(&self, client_id: &str)
    -> Result<Option<oauth2_client::Model>, StoreError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_user(&self, user_id: &str) -> Result<Option<oauth2_user::Model>, StoreError>;
}

#[async_trait]
pub trait AuthorizationCodeRepository: Send + Sync {
    async fn insert_code(&self, code: oauth2_authorization::Model) -> Result<(), StoreError>;

    async fn find_code(&self, code: &str)
    -> Result<Option<oauth2_authorization::Model>, StoreError>;

    /// Flip `consumed` from false to true. Returns whether this call performed
    /// the transition; at most one caller per code ever sees `true`.
    async fn mark_consumed(&self, code: &str, at: OffsetDateTime) -> Result<bool, StoreError>;

    async fn delete_expired_codes(&self, now: OffsetDateTime) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    async fn insert_refresh_token(
        &self,
        token: oauth2_refresh_token::Model,
    ) -> Result<(), StoreError>;

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<oauth2_refresh_token::Model>, StoreError>;

    /// Set `revoked_at` if it is still unset. Returns whether this call revoked it.
    async fn revoke_if_active(&self, id: &str, at: OffsetDateTime) -> Result<bool, StoreError>;

    /// Revoke every still-active token of a rotation chain.
    async fn revoke_chain(&self, chain_id: &str, at: OffsetDateTime) -> Result<u64, StoreError>;

    async fn delete_expired_refresh_tokens(&self, now: OffsetDateTime)
    -> Result<u64, StoreError>;
}

/// SeaORM-backed implementation of every repository trait.
#[derive(Clone)]
pub struct DbRepository {
    db: Arc<DatabaseConnection>,
    deadline: Duration,
}

impl DbRepository {
    pub fn new(db: Arc<DatabaseConnection>, deadline: Duration) -> Self {
        Self { db, deadline }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, DbErr>> + Send,
    {
        match tokio::time::timeout(self.deadline, fut).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout(self.deadline)),
        }
    }
}

#[async_trait]
impl ClientRepository for DbRepository {
    async fn find_client(
        &self,
        client_id: &str,
    ) -> Result<Option<oauth2_client::Model>, StoreError> {
        self.bounded(oauth2_client::Entity::find_by_id(client_id).one(self.db.as_ref()))
            .await
    }
}

#[async_trait]
impl UserRepository for DbRepository {
    async fn find_user(&self, user_id: &str) -> Result<Option<oauth2_user::Model>, StoreError> {
        self.bounded(oauth2_user::Entity::find_by_id(user_id).one(self.db.as_ref()))
            .await
    }
}

#[async_trait]
impl AuthorizationCodeRepository for DbRepository {
    async fn insert_code(&self, code: oauth2_authorization::Model) -> Result<(), StoreError> {
        let active = oauth2_authorization::ActiveModel {
            code: Set(code.code),
            client_id: Set(code.client_id),
            user_id: Set(code.user_id),
            redirect_uri: Set(code.redirect_uri),
            scope: Set(code.scope),
            nonce: Set(code.nonce),
            code_challenge: Set(code.code_challenge),
            code_challenge_method: Set(code.code_challenge_method),
            consumed: Set(code.consumed),
            consumed_at: Set(code.consumed_at),
            expires_at: Set(code.expires_at),
            created_at: Set(code.created_at),
        };
        self.bounded(active.insert(self.db.as_ref()))
            .await
            .map(|_| ())
    }

    async fn find_code(
        &self,
        code: &str,
    ) -> Result<Option<oauth2_authorization::Model>, StoreError> {
        self.bounded(oauth2_authorization::Entity::find_by_id(code).one(self.db.as_ref()))
            .await
    }

    async fn mark_consumed(&self, code: &str, at: OffsetDateTime) -> Result<bool, StoreError> {
        let result = self
            .bounded(
                oauth2_authorization::Entity::update_many()
                    .col_expr(oauth2_authorization::Column::Consumed, Expr::value(true))
                    .col_expr(oauth2_authorization::Column::ConsumedAt, Expr::value(at))
                    .filter(oauth2_authorization::Column::Code.eq(code))
                    .filter(oauth2_authorization::Column::Consumed.eq(false))
                    .exec(self.db.as_ref()),
            )
            .await?;
        Ok(result.rows_affected == 1)
    }

    async fn delete_expired_codes(&self, now: OffsetDateTime) -> Result<u64, StoreError> {
        let result = self
            .bounded(
                oauth2_authorization::Entity::delete_many()
                    .filter(oauth2_authorization::Column::ExpiresAt.lte(now))
                    .exec(self.db.as_ref()),
            )
            .await?;
        Ok(result.rows_affected)
    }
}

#[async_trait]
impl RefreshTokenRepository for DbRepository {
    async fn insert_refresh_token(
        &self,
        token: oauth2_refresh_token::Model,
    ) -> Result<(), StoreError> {
        let active = oauth2_refresh_token::ActiveModel {
            id: Set(token.id),
            token_hash: Set(token.token_hash),
            chain_id: Set(token.chain_id),
            rotated_from: Set(token.rotated_from),
            client_id: Set(token.client_id),
            user_id: Set(token.user_id),
            scope: Set(token.scope),
            expires_at: Set(token.expires_at),
            revoked_at: Set(token.revoked_at),
            created_at: Set(token.created_at),
        };
        self.bounded(active.insert(self.db.as_ref()))
            .await
            .map(|_| ())
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<oauth2_refresh_token::Model>, StoreError> {
        self.bounded(
            oauth2_refresh_token::Entity::find()
                .filter(oauth2_refresh_token::Column::TokenHash.eq(token_hash))
                .one(self.db.as_ref()),
        )
        .await
    }

    async fn revoke_if_active(&self, id: &str, at: OffsetDateTime) -> Result<bool, StoreError> {
        let result = self
            .bounded(
                oauth2_refresh_token::Entity::update_many()
                    .col_expr(oauth2_refresh_token::Column::RevokedAt, Expr::value(at))
                    .filter(oauth2_refresh_token::Column::Id.eq(id))
                    .filter(oauth2_refresh_token::Column::RevokedAt.is_null())
                    .exec(self.db.as_ref()),
            )
            .await?;
        Ok(result.rows_affected == 1)
    }

    async fn revoke_chain(&self, chain_id: &str, at: OffsetDateTime) -> Result<u64, StoreError> {
        let result = self
            .bounded(
                oauth2_refresh_token::Entity::update_many()
                    .col_expr(oauth2_refresh_token::Column::RevokedAt, Expr::value(at))
                    .filter(oauth2_refresh_token::Column::ChainId.eq(chain_id))
                    .filter(oauth2_refresh_token::Column::RevokedAt.is_null())
                    .exec(self.db.as_ref()),
            )
            .await?;
        Ok(result.rows_affected)
    }

    async fn delete_expired_refresh_tokens(
        &self,
        now: OffsetDateTime,
    ) -> Result<u64, StoreError> {
        let result = self
            .bounded(
                oauth2_refresh_token::Entity::delete_many()
                    .filter(oauth2_refresh_token::Column::ExpiresAt.lte(now))
                    .exec(self.db.as_ref()),
            )
            .await?;
        Ok(result.rows_affected)
    }
}
