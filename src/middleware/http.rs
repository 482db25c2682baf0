//! HTTP shell around the call auth layer: a request id and a `call` span per
//! request, so authentication logs carry both. The auth layer itself is
//! applied per route group in `middleware::auth::access`.

use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::error_handling::HandleErrorLayer;
use axum::http::{Request, StatusCode, header::HeaderName};
use tower::timeout::TimeoutLayer;
use tower::{BoxError, ServiceBuilder};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

const REQUEST_ID: &str = "x-request-id";
// Calls carry small payloads; the token travels in a header.
const BODY_LIMIT: usize = 64 * 1024;
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Request id, per-call span, body limit and timeout (answered with 408).
pub fn apply(router: Router) -> Router {
    let request_id_header = HeaderName::from_static(REQUEST_ID);

    let layers = ServiceBuilder::new()
        .layer(HandleErrorLayer::new(|err: BoxError| async move {
            if err.is::<tower::timeout::error::Elapsed>() {
                StatusCode::REQUEST_TIMEOUT
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }))
        .layer(SetRequestIdLayer::new(
            request_id_header.clone(),
            MakeRequestUuid,
        ))
        .layer(PropagateRequestIdLayer::new(request_id_header))
        // Outside the body limit, which changes the request body type.
        .layer(TraceLayer::new_for_http().make_span_with(call_span))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(TimeoutLayer::new(CALL_TIMEOUT));

    router.layer(layers)
}

// One span per call, tagged with the request id set above.
fn call_span(req: &Request<Body>) -> tracing::Span {
    let request_id = req
        .headers()
        .get(REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");

    tracing::info_span!(
        "call",
        method = %req.method(),
        path = %req.uri().path(),
        request_id = %request_id,
    )
}
