//! Verified claims to an authenticated identity.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Map, Value};

use crate::services::auth::claims::NormalizedClaims;
use crate::services::auth::identity::{Authenticated, Authority, Principal};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Principal/authority derivation failed.
///
/// Displays only a fixed message; the cause is kept for logs via `source()`.
#[derive(Debug, thiserror::Error)]
#[error("Invalid token")]
pub struct ConversionError {
    #[source]
    cause: BoxError,
}

impl ConversionError {
    pub fn new(cause: impl Into<BoxError>) -> Self {
        Self {
            cause: cause.into(),
        }
    }

    pub fn cause(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.cause.as_ref()
    }
}

/// How a token's claims map to a principal and authorities.
pub trait ClaimsStrategy: Send + Sync {
    fn authorities(&self, claims: &NormalizedClaims) -> Vec<Authority>;

    fn principal(&self, token: &str) -> Result<Principal, BoxError>;
}

/// Scopes become authorities; `sub`/`tid` describe the principal.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardClaims;

#[derive(Debug, thiserror::Error)]
enum PrincipalError {
    #[error("token has no claims segment")]
    NoPayload,
    #[error("claims segment is not base64url: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("claims segment is not a json object")]
    NotAnObject,
    #[error("missing or empty 'sub' claim")]
    MissingSubject,
}

impl ClaimsStrategy for StandardClaims {
    fn authorities(&self, claims: &NormalizedClaims) -> Vec<Authority> {
        claims.scopes().into_iter().map(Authority::from).collect()
    }

    fn principal(&self, token: &str) -> Result<Principal, BoxError> {
        // The decoder has already verified this token; only the payload is read.
        let payload = token.split('.').nth(1).ok_or(PrincipalError::NoPayload)?;
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(PrincipalError::from)?;
        let Ok(Value::Object(mut claims)) = serde_json::from_slice::<Value>(&bytes) else {
            return Err(PrincipalError::NotAnObject.into());
        };

        let subject = match claims.remove("sub") {
            Some(Value::String(sub)) if !sub.trim().is_empty() => sub,
            _ => return Err(PrincipalError::MissingSubject.into()),
        };
        let tenant = take_string(&mut claims, "tid").or_else(|| take_string(&mut claims, "tenant"));
        let issuer = take_string(&mut claims, "iss");

        Ok(Principal {
            subject,
            tenant,
            issuer,
            attributes: claims,
        })
    }
}

fn take_string(claims: &mut Map<String, Value>, name: &str) -> Option<String> {
    match claims.remove(name) {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        Some(other) => {
            claims.insert(name.to_string(), other);
            None
        }
        None => None,
    }
}

#[derive(Clone)]
pub struct PrincipalConverter {
    strategy: Arc<dyn ClaimsStrategy>,
}

impl std::fmt::Debug for PrincipalConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrincipalConverter").finish_non_exhaustive()
    }
}

impl Default for PrincipalConverter {
    fn default() -> Self {
        Self::new(Arc::new(StandardClaims))
    }
}

impl PrincipalConverter {
    pub fn new(strategy: Arc<dyn ClaimsStrategy>) -> Self {
        Self { strategy }
    }

    pub fn convert(
        &self,
        claims: &NormalizedClaims,
        token: &str,
    ) -> Result<Authenticated, ConversionError> {
        let authorities = self.strategy.authorities(claims);
        let principal = self.strategy.principal(token).map_err(ConversionError::new)?;

        Ok(Authenticated::new(principal, authorities, token))
    }
}
