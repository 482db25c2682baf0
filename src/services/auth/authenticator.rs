//! Per-call authentication: decode, convert, or fall back to anonymous.
//!
//! An invalid, expired or untrusted token does not reject the call. The caller
//! continues as [`Identity::Anonymous`] and authorization further down decides
//! whether that is enough.

use tracing::debug;

use crate::services::auth::converter::{ConversionError, PrincipalConverter};
use crate::services::auth::decoder::{DecodeError, TokenDecoder};
use crate::services::auth::identity::{Authenticated, Identity};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

#[derive(Debug, Clone)]
pub struct CallAuthenticator {
    decoder: TokenDecoder,
    converter: PrincipalConverter,
}

impl CallAuthenticator {
    pub fn new(decoder: TokenDecoder, converter: PrincipalConverter) -> Self {
        Self { decoder, converter }
    }

    /// Always yields an identity; failures are logged and demoted to anonymous.
    pub async fn authenticate(&self, token: Option<&str>) -> Identity {
        let Some(token) = token else {
            debug!("no bearer token on call, continuing as anonymous");
            return Identity::Anonymous;
        };

        match self.try_authenticate(token).await {
            Ok(auth) => {
                debug!(
                    subject = %auth.principal().subject,
                    authorities = auth.authorities().len(),
                    "call authenticated"
                );
                Identity::Authenticated(auth)
            }
            Err(err) => {
                debug!(error = ?err, "authentication failed, continuing as anonymous");
                Identity::Anonymous
            }
        }
    }

    /// Decode then convert, surfacing the failure cause.
    pub async fn try_authenticate(&self, token: &str) -> Result<Authenticated, AuthError> {
        let claims = self.decoder.decode(token).await?;
        Ok(self.converter.convert(&claims, token)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header};
    use serde_json::json;

    use crate::services::auth::decoder::DecoderPolicy;
    use crate::services::auth::identity::Authority;
    use crate::services::auth::issuers::{IssuerTrustStore, IssuerVerification};
    use crate::services::auth::keys::StaticKey;

    const SECRET: &[u8] = b"authenticator-secret";

    fn authenticator() -> CallAuthenticator {
        let verification = IssuerVerification {
            keys: Arc::new(StaticKey::new(DecodingKey::from_secret(SECRET))),
            algorithms: vec![Algorithm::HS256],
            audience: Some("orders".into()),
            leeway_seconds: 0,
            key_timeout: Duration::from_secs(1),
        };
        let decoder = TokenDecoder::new(
            DecoderPolicy {
                unsafe_mode: false,
                deployed: false,
            },
            IssuerTrustStore::default()
                .with_issuer("partner.example", verification.clone())
                .with_issuer("iam.internal", verification),
        )
        .unwrap();
        CallAuthenticator::new(decoder, PrincipalConverter::default())
    }

    fn sign(claims: serde_json::Value) -> String {
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap()
    }

    fn exp() -> i64 {
        chrono::Utc::now().timestamp() + 600
    }

    #[tokio::test]
    async fn no_token_is_anonymous() {
        assert_eq!(authenticator().authenticate(None).await, Identity::Anonymous);
    }

    #[tokio::test]
    async fn valid_token_is_authenticated_with_scopes() {
        let token = sign(json!({
            "iss": "partner.example",
            "aud": "orders",
            "sub": "u-42",
            "exp": exp(),
            "scope": "orders:read orders:write",
        }));

        let identity = authenticator().authenticate(Some(&token)).await;
        let Identity::Authenticated(auth) = identity else {
            panic!("expected an authenticated identity");
        };
        assert_eq!(auth.principal().subject, "u-42");
        assert_eq!(auth.token(), token);
        let labels: Vec<&str> = auth.authorities().iter().map(Authority::as_str).collect();
        assert_eq!(labels, vec!["orders:read", "orders:write"]);
    }

    #[tokio::test]
    async fn untrusted_issuer_is_anonymous() {
        let token = sign(json!({ "iss": "elsewhere", "aud": "orders", "sub": "u", "exp": exp() }));
        let authenticator = authenticator();

        assert!(matches!(
            authenticator.try_authenticate(&token).await,
            Err(AuthError::Decode(DecodeError::UntrustedIssuer(_)))
        ));
        assert_eq!(authenticator.authenticate(Some(&token)).await, Identity::Anonymous);
    }

    #[tokio::test]
    async fn wrong_audience_is_anonymous() {
        let token = sign(json!({ "iss": "iam.internal", "aud": "billing", "sub": "u", "exp": exp() }));
        assert_eq!(authenticator().authenticate(Some(&token)).await, Identity::Anonymous);
    }

    #[tokio::test]
    async fn conversion_failure_is_anonymous() {
        let token = sign(json!({ "iss": "iam.internal", "aud": "orders", "exp": exp() }));
        let authenticator = authenticator();

        assert!(matches!(
            authenticator.try_authenticate(&token).await,
            Err(AuthError::Conversion(_))
        ));
        assert_eq!(authenticator.authenticate(Some(&token)).await, Identity::Anonymous);
    }

    #[tokio::test]
    async fn garbage_is_anonymous() {
        for token in ["", "garbage", "a.b.c"] {
            assert_eq!(authenticator().authenticate(Some(token)).await, Identity::Anonymous);
        }
    }
}
