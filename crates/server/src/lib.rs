//! An OAuth 2.0 authorization server and OpenID Connect provider.
//!
//! Issues single-use authorization codes (with PKCE), RS256-signed access and
//! ID tokens, and rotating refresh tokens with reuse detection.

pub mod api;
pub mod config;
pub mod entity;
pub mod error;
pub mod oauth2;
