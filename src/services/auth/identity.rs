/*
 * Responsibility
 * - 1 コール分の Identity (Authenticated | Anonymous) の型
 * - コールスコープ (task-local) への bind と参照
 *
 * Notes
 * - プロセス共有の可変 "current user" は持たない
 * - bind されるのは CallAuth middleware の中だけ
 */
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde_json::{Map, Value};

pub const ANONYMOUS_AUTHORITY: &str = "ANONYMOUS";

tokio::task_local! {
    static CURRENT_IDENTITY: Arc<Identity>;
}

/// A granted-permission label, e.g. a scope or role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Authority(String);

impl Authority {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Authority {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Who the token says the caller is.
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    pub subject: String,
    pub tenant: Option<String>,
    pub issuer: Option<String>,
    // Everything else the token carried, uninterpreted.
    pub attributes: Map<String, Value>,
}

impl Principal {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            tenant: None,
            issuer: None,
            attributes: Map::new(),
        }
    }
}

#[derive(Clone, PartialEq)]
pub struct Authenticated {
    principal: Principal,
    authorities: Vec<Authority>,
    token: String,
}

impl fmt::Debug for Authenticated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Do not print the bearer token
        f.debug_struct("Authenticated")
            .field("principal", &self.principal)
            .field("authorities", &self.authorities)
            .finish_non_exhaustive()
    }
}

impl Authenticated {
    pub fn new(principal: Principal, authorities: Vec<Authority>, token: impl Into<String>) -> Self {
        Self {
            principal,
            authorities,
            token: token.into(),
        }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn authorities(&self) -> &[Authority] {
        &self.authorities
    }

    /// The raw bearer token, for forwarding to downstream calls.
    pub fn token(&self) -> &str {
        &self.token
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Identity {
    Authenticated(Authenticated),
    Anonymous,
}

impl Identity {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Self::Authenticated(auth) => Some(auth.principal()),
            Self::Anonymous => None,
        }
    }

    pub fn authorities(&self) -> Vec<Authority> {
        match self {
            Self::Authenticated(auth) => auth.authorities().to_vec(),
            Self::Anonymous => vec![Authority::new(ANONYMOUS_AUTHORITY)],
        }
    }
}

impl From<Authenticated> for Identity {
    fn from(auth: Authenticated) -> Self {
        Self::Authenticated(auth)
    }
}

/// The identity bound to the current call, if any.
///
/// Returns `None` outside a call handled by the auth middleware, including in
/// tasks spawned from a handler.
pub fn current() -> Option<Arc<Identity>> {
    CURRENT_IDENTITY.try_with(Arc::clone).ok()
}

/// Run `fut` with `identity` bound. The binding ends when the future
/// completes, panics or is dropped.
pub async fn scope<F: Future>(identity: Arc<Identity>, fut: F) -> F::Output {
    CURRENT_IDENTITY.scope(identity, fut).await
}

/// Synchronous counterpart of [`scope`].
pub fn sync_scope<R>(identity: Arc<Identity>, f: impl FnOnce() -> R) -> R {
    CURRENT_IDENTITY.sync_scope(identity, f)
}
