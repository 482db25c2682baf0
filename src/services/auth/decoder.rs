//! Bearer token decoding.
//!
//! Turns a compact JWT into [`NormalizedClaims`]. In safe mode the token must
//! come from a trusted issuer and pass full signature/claim verification. In
//! unsafe mode (developer machines only) the payload is read without looking
//! at the signature.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Map, Value};
use tracing::debug;

use crate::services::auth::claims::{self, NormalizeError, NormalizedClaims};
use crate::services::auth::issuers::{Issuer, IssuerTrustStore};
use crate::services::auth::keys::KeyError;

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("refusing unsafe decode in deployed environment")]
    UnsafeInDeployedEnvironment,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("untrusted issuer: {0}")]
    UntrustedIssuer(String),
    #[error("invalid token: {0}")]
    InvalidToken(#[source] jsonwebtoken::errors::Error),
    #[error("verification material unavailable: {0}")]
    VerificationUnavailable(String),
}

impl From<NormalizeError> for DecodeError {
    fn from(e: NormalizeError) -> Self {
        Self::Malformed(e.to_string())
    }
}

impl From<KeyError> for DecodeError {
    fn from(e: KeyError) -> Self {
        if e.is_unavailable() {
            return Self::VerificationUnavailable(e.to_string());
        }
        match e {
            KeyError::Key(e) => Self::InvalidToken(e),
            _ => Self::InvalidToken(jsonwebtoken::errors::ErrorKind::InvalidSignature.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderPolicy {
    pub unsafe_mode: bool,
    pub deployed: bool,
}

#[derive(Debug, Clone)]
enum Mode {
    Unsafe,
    Verified(IssuerTrustStore),
}

#[derive(Debug, Clone)]
pub struct TokenDecoder {
    mode: Mode,
}

impl TokenDecoder {
    /// Fails when unsafe mode is requested in a deployed environment, so such a
    /// decoder never exists.
    pub fn new(
        policy: DecoderPolicy,
        issuers: IssuerTrustStore,
    ) -> Result<Self, ConfigurationError> {
        let mode = match policy {
            DecoderPolicy {
                unsafe_mode: true,
                deployed: true,
            } => return Err(ConfigurationError::UnsafeInDeployedEnvironment),
            DecoderPolicy {
                unsafe_mode: true, ..
            } => {
                tracing::warn!("token signatures will NOT be verified (IAM_UNSAFE)");
                Mode::Unsafe
            }
            DecoderPolicy {
                unsafe_mode: false, ..
            } => Mode::Verified(issuers),
        };

        Ok(Self { mode })
    }

    pub fn is_unsafe(&self) -> bool {
        matches!(self.mode, Mode::Unsafe)
    }

    /// Issuers checked in safe mode; empty in unsafe mode, which checks none.
    pub fn issuer_ids(&self) -> Vec<&str> {
        match &self.mode {
            Mode::Unsafe => Vec::new(),
            Mode::Verified(issuers) => issuers.issuer_ids(),
        }
    }

    pub async fn decode(&self, token: &str) -> Result<NormalizedClaims, DecodeError> {
        let raw = match &self.mode {
            Mode::Unsafe => {
                debug!("skipping token verification (unsafe mode)");
                unverified_payload(token)?
            }
            Mode::Verified(issuers) => {
                let issuer_id = unverified_issuer(token)?;
                let issuer = issuers
                    .trusted(&issuer_id)
                    .ok_or(DecodeError::UntrustedIssuer(issuer_id))?;
                verify(&issuer, token).await?
            }
        };

        Ok(claims::normalize(raw)?)
    }
}

async fn verify(issuer: &Issuer, token: &str) -> Result<Map<String, Value>, DecodeError> {
    let header = jsonwebtoken::decode_header(token)
        .map_err(|e| DecodeError::Malformed(format!("invalid token header: {e}")))?;

    let timeout = issuer.verification().key_timeout;
    let key = tokio::time::timeout(
        timeout,
        issuer.verification().keys.resolve(header.kid.as_deref()),
    )
    .await
    .map_err(|_| {
        DecodeError::VerificationUnavailable(format!(
            "key resolution for {} timed out after {:?}",
            issuer.id(),
            timeout
        ))
    })??;

    let data = jsonwebtoken::decode::<Map<String, Value>>(token, &key, &issuer.validation())
        .map_err(DecodeError::InvalidToken)?;

    Ok(data.claims)
}

/// The claims segment of a compact JWS, without any verification.
fn unverified_payload(token: &str) -> Result<Map<String, Value>, DecodeError> {
    let segments: Vec<&str> = token.split('.').collect();
    let [_, payload, _] = segments.as_slice() else {
        return Err(DecodeError::Malformed(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| DecodeError::Malformed(format!("claims segment is not base64url: {e}")))?;

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(DecodeError::Malformed("claims segment is not an object".into())),
        Err(e) => Err(DecodeError::Malformed(format!("claims segment is not json: {e}"))),
    }
}

fn unverified_issuer(token: &str) -> Result<String, DecodeError> {
    match unverified_payload(token)?.remove("iss") {
        Some(Value::String(iss)) if !iss.is_empty() => Ok(iss),
        _ => Err(DecodeError::Malformed("missing 'iss' claim".into())),
    }
}
