//! Signing key management.
//!
//! One active RSA key signs every token. Retired keys stay verification-only
//! so tokens signed before a rotation remain checkable until they expire. The
//! JWKS publishes the public half of all of them.

use crate::config::SigningKeyConfig;
use crate::error::KeyError;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use utoipa::ToSchema;

const MIN_RSA_BITS: usize = 2048;

/// A single JSON Web Key (RFC 7517), public RSA parameters only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Jwk {
    pub kty: String,
    pub kid: String,
    #[serde(rename = "use")]
    pub r#use: String,
    pub alg: String,
    pub n: String,
    pub e: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

struct VerificationKey {
    jwk: Jwk,
    decoding_key: DecodingKey,
}

impl VerificationKey {
    fn from_public(public: &RsaPublicKey, kid: Option<String>) -> Result<Self, KeyError> {
        let bits = public.size() * 8;
        if bits < MIN_RSA_BITS {
            return Err(KeyError::KeyTooSmall(bits));
        }
        let n = URL_SAFE_NO_PAD.encode(public.n().to_bytes_be());
        let e = URL_SAFE_NO_PAD.encode(public.e().to_bytes_be());
        let kid = kid.unwrap_or_else(|| thumbprint(&n, &e));
        let decoding_key = DecodingKey::from_rsa_components(&n, &e)
            .map_err(|err| KeyError::InvalidPublicKey(err.to_string()))?;
        Ok(Self {
            jwk: Jwk {
                kty: "RSA".to_string(),
                kid,
                r#use: "sig".to_string(),
                alg: "RS256".to_string(),
                n,
                e,
            },
            decoding_key,
        })
    }
}

/// RFC 7638 JWK thumbprint over the required RSA members, in lexical order.
fn thumbprint(n: &str, e: &str) -> String {
    let canonical = format!(r#"{{"e":"{e}","kty":"RSA","n":"{n}"}}"#);
    URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
}

fn parse_private_pem(pem: &str) -> Result<RsaPrivateKey, KeyError> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|err| KeyError::InvalidPrivateKey(err.to_string()))
}

fn parse_public_pem(pem: &str) -> Result<RsaPublicKey, KeyError> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|err| KeyError::InvalidPublicKey(err.to_string()))
}

fn read_pem(path: &Path) -> Result<String, KeyError> {
    std::fs::read_to_string(path).map_err(|source| KeyError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Holds the active signing key and the set of keys accepted for verification.
pub struct KeyManager {
    encoding_key: EncodingKey,
    active_kid: String,
    /// Active key first, then retired keys in configuration order.
    verification_keys: Vec<VerificationKey>,
}

impl fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyManager")
            .field("active_kid", &self.active_kid)
            .field("verification_keys", &self.verification_keys.len())
            .finish_non_exhaustive()
    }
}

impl KeyManager {
    /// Build from a PEM-encoded RSA private key (PKCS#8 or PKCS#1).
    pub fn from_private_pem(pem: &str, kid: Option<String>) -> Result<Self, KeyError> {
        let private_key = parse_private_pem(pem)?;
        let verification = VerificationKey::from_public(&private_key.to_public_key(), kid)?;
        let encoding_key = EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|err| KeyError::InvalidPrivateKey(err.to_string()))?;
        Ok(Self {
            encoding_key,
            active_kid: verification.jwk.kid.clone(),
            verification_keys: vec![verification],
        })
    }

    /// Generate a fresh 2048-bit key. Tokens signed with it do not survive a restart.
    pub fn generate() -> Result<Self, KeyError> {
        let private_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, MIN_RSA_BITS)
            .map_err(|err| KeyError::Generation(err.to_string()))?;
        let pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|err| KeyError::Generation(err.to_string()))?;
        Self::from_private_pem(&pem, None)
    }

    /// Load the keys named in configuration, generating an ephemeral key when
    /// no private key path is set.
    pub fn from_config(config: &SigningKeyConfig) -> Result<Self, KeyError> {
        let mut manager = match &config.private_key_path {
            Some(path) => Self::from_private_pem(&read_pem(path)?, config.key_id.clone())?,
            None => {
                tracing::warn!(
                    "No signing key configured; generating an ephemeral key. Issued tokens will not survive a restart."
                );
                Self::generate()?
            }
        };
        for retired in &config.retired_keys {
            manager = manager.with_retired_public_pem(
                &read_pem(&retired.public_key_path)?,
                retired.key_id.clone(),
            )?;
        }
        tracing::info!(
            kid = %manager.active_kid,
            retired = manager.verification_keys.len() - 1,
            "Signing keys loaded"
        );
        Ok(manager)
    }

    /// Add a verification-only key (public PEM, SPKI or PKCS#1).
    pub fn with_retired_public_pem(
        mut self,
        pem: &str,
        kid: Option<String>,
    ) -> Result<Self, KeyError> {
        let key = VerificationKey::from_public(&parse_public_pem(pem)?, kid)?;
        if self
            .verification_keys
            .iter()
            .any(|existing| existing.jwk.kid == key.jwk.kid)
        {
            tracing::warn!(kid = %key.jwk.kid, "Duplicate key id ignored");
            return Ok(self);
        }
        self.verification_keys.push(key);
        Ok(self)
    }

    pub fn algorithm(&self) -> Algorithm {
        Algorithm::RS256
    }

    /// Key id of the active signing key.
    pub fn kid(&self) -> &str {
        &self.active_kid
    }

    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    /// JWT header for newly signed tokens, carrying the active `kid`.
    pub fn header(&self) -> Header {
        let mut header = Header::new(self.algorithm());
        header.kid = Some(self.active_kid.clone());
        header
    }

    pub fn decoding_key(&self, kid: &str) -> Option<&DecodingKey> {
        self.verification_keys
            .iter()
            .find(|key| key.jwk.kid == kid)
            .map(|key| &key.decoding_key)
    }

    pub fn jwks(&self) -> Jwks {
        Jwks {
            keys: self
                .verification_keys
                .iter()
                .map(|key| key.jwk.clone())
                .collect(),
        }
    }
}
