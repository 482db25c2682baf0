//! Bearer token → Identity をコールスコープに bind する middleware
//!
//! Per call:
//! - `authorization: Bearer <token>` を取り出す (取れなければ token なし扱い)
//! - `CallAuthenticator` で Identity を得る (失敗は Anonymous)
//! - 内側の service の `call` と返された future の間だけ Identity を bind する
//! - future が完了 / エラー / panic / drop (cancel) したら bind は外れる
//!
//! `http::Request<B>` を扱う tower の Service なので axum の Router にも
//! tonic の server にも掛けられる。

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::Router;
use axum::http::{HeaderMap, Request, header};
use tower::{Layer, Service};
use tracing::{debug, warn};

use crate::services::auth::{CallAuthenticator, identity};

/// `/api/v1/*` などに認証を掛けるための layer を適用する。
///
/// 例：
/// ```ignore
/// let v1 = api::v1::routes();
/// let v1 = middleware::auth::access::apply(v1, state.auth.clone());
/// app = app.nest("/api/v1", v1);
/// ```
pub fn apply<S>(router: Router<S>, authenticator: Arc<CallAuthenticator>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(CallAuthLayer::new(authenticator))
}

#[derive(Debug, Clone)]
pub struct CallAuthLayer {
    authenticator: Arc<CallAuthenticator>,
}

impl CallAuthLayer {
    pub fn new(authenticator: Arc<CallAuthenticator>) -> Self {
        Self { authenticator }
    }
}

impl<S> Layer<S> for CallAuthLayer {
    type Service = CallAuth<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CallAuth {
            inner,
            authenticator: self.authenticator.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallAuth<S> {
    inner: S,
    authenticator: Arc<CallAuthenticator>,
}

impl<S, B> Service<Request<B>> for CallAuth<S>
where
    S: Service<Request<B>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        // The ready service is the one that must be called; keep a fresh clone in its place.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let authenticator = self.authenticator.clone();

        Box::pin(async move {
            let token = bearer_token(req.headers());
            let identity = Arc::new(authenticator.authenticate(token.as_deref()).await);

            // Unbound -> Bound
            let fut = identity::sync_scope(identity.clone(), || inner.call(req));
            // Bound -> Cleared when `scope` returns, unwinds or is dropped.
            let _log = LogClearOnDrop;
            identity::scope(identity, fut).await
        })
    }
}

// Logging only; the binding itself ends with `identity::scope`.
struct LogClearOnDrop;

impl Drop for LogClearOnDrop {
    fn drop(&mut self) {
        debug!("call identity cleared");
    }
}

/// The bearer token of a call, if one can be read.
///
/// Anything unexpected (missing header, non-ASCII value, another scheme, an
/// empty token) counts as "no token".
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?;

    let Ok(value) = value.to_str() else {
        warn!("unreadable authorization header, authenticating anonymously");
        return None;
    };

    let Some((scheme, token)) = value.split_once(' ') else {
        warn!("malformed authorization header, authenticating anonymously");
        return None;
    };

    if !scheme.eq_ignore_ascii_case("bearer") {
        debug!(scheme = %scheme, "non-bearer authorization scheme, authenticating anonymously");
        return None;
    }

    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}
