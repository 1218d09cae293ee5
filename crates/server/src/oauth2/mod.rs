//! OAuth2 / OpenID Connect authorization core.
//!
//! ## Supported Flows
//!
//! - Authorization Code, with PKCE (mandatory for public clients)
//! - Refresh Token, with rotation and reuse detection
//!
//! ## Endpoints
//!
//! - `GET /oauth/authorize` - Authorization endpoint
//! - `POST /oauth/token` - Token endpoint
//! - `POST /oauth/revoke` - Token revocation
//! - `GET /oauth/userinfo` - OpenID Connect UserInfo
//! - `GET /.well-known/openid-configuration` - OpenID Connect Discovery
//! - `GET /.well-known/jwks.json` - Signing keys

pub mod codes;
pub mod endpoints;
pub mod grant;
pub mod issuer;
pub mod keys;
pub mod pkce;
pub mod refresh;
pub mod registrar;
pub mod repository;
pub mod secret;
pub mod session;
mod state;

pub use codes::CodeStore;
pub use endpoints::{router, well_known_router};
pub use grant::GrantHandler;
pub use issuer::TokenIssuer;
pub use keys::KeyManager;
pub use refresh::RefreshTokenStore;
pub use registrar::ClientRegistry;
pub use state::OAuth2State;

/// OpenAPI tag for OAuth2 endpoints
pub const OAUTH2_TAG: &str = "OAuth2";
