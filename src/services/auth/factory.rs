/// Factory: build `CallAuthenticator` from application `Config`.
use std::sync::Arc;

use crate::config::{AppEnv, IamConfig, KeySource};
use crate::services::auth::converter::PrincipalConverter;
use crate::services::auth::decoder::{ConfigurationError, DecoderPolicy, TokenDecoder};
use crate::services::auth::issuers::{IssuerTrustStore, IssuerVerification};
use crate::services::auth::keys::{JwksFile, KeyError, KeyResolver, StaticKey};
use crate::services::auth::CallAuthenticator;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(
        "no verification keys for issuer {0} (IAM_JWKS_PATH/IAM_PUBLIC_KEY_PEM for the own host, \
         IAM_JWKS_DIR for extra issuers) unless IAM_UNSAFE is set"
    )]
    MissingKeys(String),
    #[error("invalid IAM_PUBLIC_KEY_PEM: {0}")]
    InvalidKey(#[from] KeyError),
}

pub fn build_authenticator(
    iam: &IamConfig,
    app_env: AppEnv,
) -> Result<Arc<CallAuthenticator>, BuildError> {
    let policy = DecoderPolicy {
        unsafe_mode: iam.unsafe_mode,
        deployed: app_env.is_deployed(),
    };

    // Checked before touching key material so the refusal is the reported error.
    if policy.unsafe_mode && policy.deployed {
        return Err(ConfigurationError::UnsafeInDeployedEnvironment.into());
    }

    let own = verification(iam, &iam.host)?;
    let issuers = IssuerTrustStore::build(&iam.extra_issuers, &iam.host, own.clone(), |id| {
        // Replaced by the own host entry anyway.
        if id == iam.host {
            return Ok(own.clone());
        }
        verification(iam, id)
    })?;

    let decoder = TokenDecoder::new(policy, issuers)?;
    tracing::info!(
        issuers = ?decoder.issuer_ids(),
        unsafe_mode = decoder.is_unsafe(),
        "trusted token issuers"
    );

    Ok(Arc::new(CallAuthenticator::new(
        decoder,
        PrincipalConverter::default(),
    )))
}

fn verification(iam: &IamConfig, issuer: &str) -> Result<IssuerVerification, BuildError> {
    let keys: Arc<dyn KeyResolver> = match (iam.issuer_key_source(issuer), iam.unsafe_mode) {
        (Some(KeySource::JwksPath(path)), _) => {
            tracing::debug!(issuer, path = %path.display(), "issuer key set");
            Arc::new(JwksFile::new(path))
        }
        (Some(KeySource::PublicKeyPem(pem)), _) => {
            let algorithm = iam.algorithms.first().copied().unwrap_or_default();
            Arc::new(StaticKey::from_pem(&pem, algorithm)?)
        }
        // Unsafe mode never verifies, so there is nothing to resolve.
        (None, true) => Arc::new(NoKeys),
        (None, false) => return Err(BuildError::MissingKeys(issuer.to_string())),
    };

    Ok(IssuerVerification {
        keys,
        algorithms: iam.algorithms.clone(),
        audience: iam.audience.clone(),
        leeway_seconds: iam.leeway_seconds,
        key_timeout: iam.key_timeout,
    })
}

struct NoKeys;

#[async_trait::async_trait]
impl KeyResolver for NoKeys {
    async fn resolve(
        &self,
        kid: Option<&str>,
    ) -> Result<jsonwebtoken::DecodingKey, KeyError> {
        Err(KeyError::UnknownKey(kid.map(str::to_string)))
    }
}
