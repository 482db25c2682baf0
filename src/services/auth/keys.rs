//! Verification material lookup for trusted issuers.
//!
//! The decoder only needs "a `DecodingKey` for this `kid`". Where that key
//! lives (a PEM in the environment, a JWKS document on disk) is behind
//! [`KeyResolver`].

use std::path::PathBuf;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, jwk::JwkSet};
use tokio::sync::OnceCell;

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    // Transient: the material could not be read right now.
    #[error("failed to read key material: {0}")]
    Io(#[from] std::io::Error),
    #[error("key material is not a valid JWKS document: {0}")]
    Document(#[from] serde_json::Error),

    // Permanent for this token.
    #[error("no verification key for kid {0:?}")]
    UnknownKey(Option<String>),
    #[error("unusable verification key: {0}")]
    Key(#[from] jsonwebtoken::errors::Error),
}

impl KeyError {
    /// Whether the failure is about resolving material rather than about the token.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Document(_))
    }
}

#[async_trait]
pub trait KeyResolver: Send + Sync {
    async fn resolve(&self, kid: Option<&str>) -> Result<DecodingKey, KeyError>;
}

/// A single public key, used for every `kid`.
#[derive(Clone)]
pub struct StaticKey {
    key: DecodingKey,
}

impl std::fmt::Debug for StaticKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Do not print key material
        f.debug_struct("StaticKey").finish_non_exhaustive()
    }
}

impl StaticKey {
    pub fn new(key: DecodingKey) -> Self {
        Self { key }
    }

    /// Parse a PEM public key matching the family of `algorithm`.
    pub fn from_pem(pem: &str, algorithm: Algorithm) -> Result<Self, KeyError> {
        let bytes = pem.as_bytes();
        let key = match algorithm {
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => DecodingKey::from_rsa_pem(bytes)?,
            Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(bytes)?,
            Algorithm::EdDSA => DecodingKey::from_ed_pem(bytes)?,
            // HMAC secrets are not public keys.
            _ => {
                return Err(KeyError::Key(
                    jsonwebtoken::errors::ErrorKind::InvalidAlgorithm.into(),
                ));
            }
        };
        Ok(Self { key })
    }
}

#[async_trait]
impl KeyResolver for StaticKey {
    async fn resolve(&self, _kid: Option<&str>) -> Result<DecodingKey, KeyError> {
        Ok(self.key.clone())
    }
}

/// A JWKS document on disk, read on first use and cached for the process lifetime.
///
/// A failed read is not cached, so the next call retries.
#[derive(Debug)]
pub struct JwksFile {
    path: PathBuf,
    keys: OnceCell<JwkSet>,
}

impl JwksFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            keys: OnceCell::new(),
        }
    }

    async fn load(&self) -> Result<&JwkSet, KeyError> {
        self.keys
            .get_or_try_init(|| async {
                let bytes = tokio::fs::read(&self.path).await?;
                let set: JwkSet = serde_json::from_slice(&bytes)?;
                tracing::info!(
                    path = %self.path.display(),
                    keys = set.keys.len(),
                    "loaded issuer key set"
                );
                Ok::<_, KeyError>(set)
            })
            .await
    }
}

#[async_trait]
impl KeyResolver for JwksFile {
    async fn resolve(&self, kid: Option<&str>) -> Result<DecodingKey, KeyError> {
        let set = self.load().await?;

        // Without a kid, only an unambiguous single-key set is usable.
        let jwk = match kid {
            Some(kid) => set.find(kid),
            None if set.keys.len() == 1 => set.keys.first(),
            None => None,
        }
        .ok_or_else(|| KeyError::UnknownKey(kid.map(str::to_string)))?;

        Ok(DecodingKey::from_jwk(jwk)?)
    }
}
