use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Apply pending migrations on startup.
    #[serde(default)]
    pub run_migrations: bool,
    pub oauth2: OAuth2Config,
}

#[derive(Clone, Debug, Deserialize)]
pub struct OAuth2Config {
    /// Value of the `iss` claim; must be an absolute URL.
    pub issuer_url: String,
    /// Access token lifetime in seconds
    #[serde(default = "default_access_token_lifetime")]
    pub access_token_lifetime: i64,
    #[serde(default = "default_id_token_lifetime")]
    pub id_token_lifetime: i64,
    /// Refresh token lifetime in seconds
    #[serde(default = "default_refresh_token_lifetime")]
    pub refresh_token_lifetime: i64,
    #[serde(default = "default_authorization_code_lifetime")]
    pub authorization_code_lifetime: i64,
    /// Upper bound for a single storage call, in milliseconds.
    #[serde(default = "default_storage_timeout_ms")]
    pub storage_timeout_ms: u64,
    /// How often expired codes and refresh tokens are purged.
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,
    #[serde(default)]
    pub signing_key: SigningKeyConfig,
    /// `aud` of the first-party tokens accepted as a signed-in session at
    /// `/oauth/authorize`. Must not be the id of any registered client.
    #[serde(default = "default_session_audience")]
    pub session_audience: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SigningKeyConfig {
    /// PEM-encoded RSA private key (PKCS#8 or PKCS#1). When unset an ephemeral
    /// key is generated at startup and every restart invalidates issued tokens.
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
    /// Published `kid`; defaults to the RFC 7638 thumbprint of the key.
    #[serde(default)]
    pub key_id: Option<String>,
    /// Retired signing keys that stay in the JWKS for verification.
    #[serde(default)]
    pub retired_keys: Vec<RetiredKeyConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RetiredKeyConfig {
    /// PEM-encoded RSA public key (SPKI or PKCS#1).
    pub public_key_path: PathBuf,
    /// The `kid` the key signed with while it was active. Defaults to the
    /// RFC 7638 thumbprint, matching an active key without `key_id`.
    #[serde(default)]
    pub key_id: Option<String>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_access_token_lifetime() -> i64 {
    3600 // 1 hour
}

fn default_id_token_lifetime() -> i64 {
    3600
}

fn default_refresh_token_lifetime() -> i64 {
    30 * 24 * 3600 // 30 days
}

fn default_authorization_code_lifetime() -> i64 {
    600 // 10 minutes
}

fn default_storage_timeout_ms() -> u64 {
    5000
}

fn default_purge_interval_secs() -> u64 {
    300
}

fn default_session_audience() -> String {
    "login".to_string()
}

impl OAuth2Config {
    pub fn new(issuer_url: impl Into<String>) -> Self {
        Self {
            issuer_url: issuer_url.into(),
            access_token_lifetime: default_access_token_lifetime(),
            id_token_lifetime: default_id_token_lifetime(),
            refresh_token_lifetime: default_refresh_token_lifetime(),
            authorization_code_lifetime: default_authorization_code_lifetime(),
            storage_timeout_ms: default_storage_timeout_ms(),
            purge_interval_secs: default_purge_interval_secs(),
            signing_key: SigningKeyConfig::default(),
            session_audience: default_session_audience(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let issuer = url::Url::parse(&self.issuer_url).map_err(|e| {
            ConfigError::Validation(format!("oauth2.issuer_url is not a valid URL: {e}"))
        })?;
        if issuer.cannot_be_a_base() || issuer.query().is_some() || issuer.fragment().is_some() {
            return Err(ConfigError::Validation(
                "oauth2.issuer_url must be an absolute URL without query or fragment".into(),
            ));
        }
        for (name, value) in [
            ("access_token_lifetime", self.access_token_lifetime),
            ("id_token_lifetime", self.id_token_lifetime),
            ("refresh_token_lifetime", self.refresh_token_lifetime),
            ("authorization_code_lifetime", self.authorization_code_lifetime),
        ] {
            if value <= 0 {
                return Err(ConfigError::Validation(format!(
                    "oauth2.{name} must be > 0"
                )));
            }
        }
        if self.storage_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "oauth2.storage_timeout_ms must be > 0".into(),
            ));
        }
        if self.session_audience.trim().is_empty() {
            return Err(ConfigError::Validation(
                "oauth2.session_audience must not be empty".into(),
            ));
        }
        if self.purge_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "oauth2.purge_interval_secs must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Issuer without a trailing slash, used to build endpoint URLs.
    pub fn issuer(&self) -> &str {
        self.issuer_url.trim_end_matches('/')
    }
}

/// Load application configuration from `config.yaml` + environment overrides.
///
/// Any environment variable matching the key path separated by double underscores
/// (e.g. `OAUTH2__ISSUER_URL`) overrides the file value.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    use config::{Config, Environment, File};
    let cfg = Config::builder()
        .add_source(File::with_name("config.yaml").required(false))
        .add_source(Environment::default().separator("__"))
        .build()?;

    let app: AppConfig = cfg.try_deserialize()?;
    app.oauth2.validate()?;

    Ok(app)
}

/// Convenience helper for binaries wanting panic-on-error behaviour.
pub fn load_config_or_panic() -> AppConfig {
    match load_config() {
        Ok(c) => c,
        Err(e) => panic!("Failed to load configuration: {e}"),
    }
}
