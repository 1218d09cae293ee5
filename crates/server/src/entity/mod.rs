//! SeaORM entities for the authorization core.

pub mod oauth2_authorization;
pub mod oauth2_client;
pub mod oauth2_refresh_token;
pub mod oauth2_user;
