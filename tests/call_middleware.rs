//! Call middleware tests
//!
//! These drive `CallAuthLayer` the way a server would:
//! request with (or without) a bearer token -> layer -> handler reading the
//! call identity.

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, header};
use call_auth::middleware::CallAuthLayer;
use call_auth::services::auth::converter::PrincipalConverter;
use call_auth::services::auth::decoder::{DecoderPolicy, TokenDecoder};
use call_auth::services::auth::identity;
use call_auth::services::auth::issuers::{IssuerTrustStore, IssuerVerification};
use call_auth::services::auth::keys::StaticKey;
use call_auth::services::auth::{CallAuthenticator, Identity};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header};
use serde_json::json;
use tower::{Layer, ServiceExt, service_fn};

const SECRET: &[u8] = b"middleware-test-secret";

fn authenticator() -> Arc<CallAuthenticator> {
    let verification = IssuerVerification {
        keys: Arc::new(StaticKey::new(DecodingKey::from_secret(SECRET))),
        algorithms: vec![Algorithm::HS256],
        audience: None,
        leeway_seconds: 0,
        key_timeout: Duration::from_secs(1),
    };
    let decoder = TokenDecoder::new(
        DecoderPolicy {
            unsafe_mode: false,
            deployed: true,
        },
        IssuerTrustStore::default()
            .with_issuer("issuerA", verification.clone())
            .with_issuer("issuerB", verification.clone())
            .with_issuer("iam.internal", verification),
    )
    .expect("safe decoder always builds");

    Arc::new(CallAuthenticator::new(decoder, PrincipalConverter::default()))
}

fn token(iss: &str, sub: &str, scope: &str) -> String {
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &json!({
            "iss": iss,
            "sub": sub,
            "scope": scope,
            "exp": chrono::Utc::now().timestamp() + 600,
        }),
        &EncodingKey::from_secret(SECRET),
    )
    .expect("Failed to sign token")
}

fn request(token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri("/call");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

/// "subject" for authenticated calls, "anonymous" otherwise, "unbound" if nothing is bound.
fn describe_current() -> String {
    match identity::current().as_deref() {
        Some(Identity::Authenticated(auth)) => auth.principal().subject.clone(),
        Some(Identity::Anonymous) => "anonymous".to_string(),
        None => "unbound".to_string(),
    }
}

#[tokio::test]
async fn call_without_token_proceeds_as_anonymous() {
    let svc = CallAuthLayer::new(authenticator()).layer(service_fn(|_req: Request<Body>| async {
        Ok::<_, Infallible>(describe_current())
    }));

    let seen = svc.oneshot(request(None)).await.unwrap();
    assert_eq!(seen, "anonymous");
    assert!(identity::current().is_none());
}

#[tokio::test]
async fn trusted_token_binds_authenticated_identity() {
    let svc = CallAuthLayer::new(authenticator()).layer(service_fn(|_req: Request<Body>| async {
        let identity = identity::current().expect("identity bound during call");
        let labels: Vec<String> = identity
            .authorities()
            .iter()
            .map(|a| a.to_string())
            .collect();
        Ok::<_, Infallible>((describe_current(), labels))
    }));

    let token = token("issuerB", "user-7", "read write");
    let (subject, labels) = svc.oneshot(request(Some(&token))).await.unwrap();

    assert_eq!(subject, "user-7");
    assert_eq!(labels, vec!["read", "write"]);
}

#[tokio::test]
async fn untrusted_issuer_proceeds_as_anonymous() {
    let svc = CallAuthLayer::new(authenticator()).layer(service_fn(|_req: Request<Body>| async {
        Ok::<_, Infallible>(describe_current())
    }));

    let token = token("issuerC", "mallory", "admin");
    assert_eq!(svc.oneshot(request(Some(&token))).await.unwrap(), "anonymous");
}

#[tokio::test]
async fn non_bearer_header_proceeds_as_anonymous() {
    let svc = CallAuthLayer::new(authenticator()).layer(service_fn(|_req: Request<Body>| async {
        Ok::<_, Infallible>(describe_current())
    }));

    let req = Request::builder()
        .header(header::AUTHORIZATION, "Basic dXNlcjpwYXNz")
        .body(Body::empty())
        .unwrap();
    assert_eq!(svc.oneshot(req).await.unwrap(), "anonymous");
}

#[tokio::test]
async fn identity_is_cleared_when_handler_fails() {
    let saw_identity = Arc::new(AtomicBool::new(false));
    let flag = saw_identity.clone();

    let svc = CallAuthLayer::new(authenticator()).layer(service_fn(move |_req: Request<Body>| {
        let flag = flag.clone();
        async move {
            flag.store(identity::current().is_some(), Ordering::SeqCst);
            Err::<String, &'static str>("handler failed")
        }
    }));

    let token = token("iam.internal", "user-1", "read");
    let result = svc.oneshot(request(Some(&token))).await;

    assert_eq!(result, Err("handler failed"));
    assert!(saw_identity.load(Ordering::SeqCst));
    assert!(identity::current().is_none());
}

#[tokio::test]
async fn identity_is_cleared_when_handler_panics() {
    let svc = CallAuthLayer::new(authenticator()).layer(service_fn(|_req: Request<Body>| async {
        // Only panics when bound, so an unbound call fails the test below.
        if identity::current().is_some() {
            panic!("handler blew up");
        }
        Ok::<String, Infallible>(String::new())
    }));

    let token = token("iam.internal", "user-1", "read");
    let joined = tokio::spawn(svc.oneshot(request(Some(&token)))).await;

    assert!(joined.unwrap_err().is_panic());
    assert!(identity::current().is_none());
}

#[tokio::test]
async fn identity_is_cleared_when_call_is_cancelled() {
    let entered = Arc::new(tokio::sync::Notify::new());
    let notify = entered.clone();

    let svc = CallAuthLayer::new(authenticator()).layer(service_fn(move |_req: Request<Body>| {
        let notify = notify.clone();
        async move {
            notify.notify_one();
            std::future::pending::<()>().await;
            Ok::<String, Infallible>(describe_current())
        }
    }));

    let token = token("iam.internal", "user-1", "read");
    let call = tokio::spawn(svc.oneshot(request(Some(&token))));
    entered.notified().await;
    call.abort();

    assert!(call.await.unwrap_err().is_cancelled());
    assert!(identity::current().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_calls_never_see_each_other() {
    let auth = authenticator();
    let mut calls = Vec::new();

    for (sub, delay_ms) in [("alice", 30_u64), ("bob", 5), ("carol", 15), ("dave", 0)] {
        let svc = CallAuthLayer::new(auth.clone()).layer(service_fn(
            move |_req: Request<Body>| async move {
                let mut seen = Vec::new();
                for _ in 0..5 {
                    seen.push(describe_current());
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    tokio::task::yield_now().await;
                }
                Ok::<_, Infallible>(seen)
            },
        ));
        let token = token("iam.internal", sub, "read");
        calls.push((sub, tokio::spawn(svc.oneshot(request(Some(&token))))));
    }

    for (sub, call) in calls {
        let seen = call.await.unwrap().unwrap();
        assert!(seen.iter().all(|s| s == sub), "{sub} saw {seen:?}");
    }
}

#[tokio::test]
async fn spawned_tasks_do_not_inherit_the_identity() {
    let svc = CallAuthLayer::new(authenticator()).layer(service_fn(|_req: Request<Body>| async {
        let inner = tokio::spawn(async { describe_current() }).await.unwrap();
        Ok::<_, Infallible>((describe_current(), inner))
    }));

    let token = token("iam.internal", "user-9", "read");
    let (outer, inner) = svc.oneshot(request(Some(&token))).await.unwrap();
    assert_eq!(outer, "user-9");
    assert_eq!(inner, "unbound");
}
