//! Trusted issuers.
//!
//! Built once at startup; read concurrently by every call afterwards.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, Validation};

use crate::services::auth::keys::KeyResolver;

/// How tokens from an issuer are verified.
#[derive(Clone)]
pub struct IssuerVerification {
    pub keys: Arc<dyn KeyResolver>,
    pub algorithms: Vec<Algorithm>,
    pub audience: Option<String>,
    pub leeway_seconds: u64,
    // Upper bound on key resolution for a single call.
    pub key_timeout: Duration,
}

impl std::fmt::Debug for IssuerVerification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuerVerification")
            .field("algorithms", &self.algorithms)
            .field("audience", &self.audience)
            .field("leeway_seconds", &self.leeway_seconds)
            .field("key_timeout", &self.key_timeout)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct Issuer {
    id: String,
    verification: IssuerVerification,
}

impl Issuer {
    pub fn new(id: impl Into<String>, verification: IssuerVerification) -> Self {
        Self {
            id: id.into(),
            verification,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn verification(&self) -> &IssuerVerification {
        &self.verification
    }

    /// `jsonwebtoken` validation pinned to this issuer.
    pub fn validation(&self) -> Validation {
        let v = &self.verification;
        let mut validation = Validation::new(v.algorithms.first().copied().unwrap_or_default());
        validation.algorithms = v.algorithms.clone();
        validation.set_issuer(&[self.id.as_str()]);
        match v.audience.as_deref() {
            Some(aud) => validation.set_audience(&[aud]),
            // No configured audience: accept whatever the token carries.
            None => validation.validate_aud = false,
        }
        validation.validate_nbf = true;
        validation.leeway = v.leeway_seconds;
        validation
    }
}

#[derive(Debug, Clone, Default)]
pub struct IssuerTrustStore {
    issuers: HashMap<String, Arc<Issuer>>,
}

impl IssuerTrustStore {
    /// Trust every whitespace-delimited id in `extra_issuers`, each with the
    /// verification `verification_for` returns for it, then `own_host` with `own`.
    ///
    /// `own_host` is inserted last, so it replaces an extra issuer with the same id.
    pub fn build<E>(
        extra_issuers: &str,
        own_host: &str,
        own: IssuerVerification,
        mut verification_for: impl FnMut(&str) -> Result<IssuerVerification, E>,
    ) -> Result<Self, E> {
        let mut store = Self::default();
        for id in extra_issuers.split_whitespace() {
            store = store.with_issuer(id, verification_for(id)?);
        }
        Ok(store.with_issuer(own_host, own))
    }

    /// Trust `id` with its own verification, replacing any earlier entry.
    pub fn with_issuer(mut self, id: &str, verification: IssuerVerification) -> Self {
        self.issuers
            .insert(id.to_string(), Arc::new(Issuer::new(id, verification)));
        self
    }

    pub fn trusted(&self, issuer_id: &str) -> Option<Arc<Issuer>> {
        self.issuers.get(issuer_id).cloned()
    }

    /// Sorted, for logs and diagnostics.
    pub fn issuer_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.issuers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}
