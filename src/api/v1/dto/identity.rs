use serde::Serialize;

use crate::services::auth::Identity;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct IdentityResponse {
    pub authenticated: bool,
    pub subject: Option<String>,
    pub tenant: Option<String>,
    pub authorities: Vec<String>,
}

impl From<&Identity> for IdentityResponse {
    fn from(identity: &Identity) -> Self {
        let principal = identity.principal();
        Self {
            authenticated: identity.is_authenticated(),
            subject: principal.map(|p| p.subject.clone()),
            tenant: principal.and_then(|p| p.tenant.clone()),
            authorities: identity
                .authorities()
                .into_iter()
                .map(|a| a.as_str().to_string())
                .collect(),
        }
    }
}
