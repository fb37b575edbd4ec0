//! Backend RPC proxy against an in-process HTTP/2 backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::any;
use axum::Router;
use futures_util::future::join_all;
use tokio::net::TcpListener;
use tower::ServiceExt;

use serving_core::auth::Credential;
use serving_core::rpc::forward::forward;
use serving_core::rpc::{
    DialOptions, Dialer, Http2Connection, Http2Dialer, RpcClient, RpcError, RpcProxy,
};
use serving_core::ServingEngine;

mod common;
use common::{bare_config, body_text, serve_h2_backend, start_h2_backend};

/// Counts dials before delegating to the real HTTP/2 dialer.
#[derive(Default)]
struct CountingDialer {
    dials: Arc<AtomicUsize>,
}

impl Dialer for CountingDialer {
    type Conn = Http2Connection;

    async fn dial(
        &self,
        target: &str,
        credential: &Credential,
        options: &DialOptions,
    ) -> Result<RpcClient<Http2Connection>, RpcError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        // Widen the window in which concurrent callers overlap.
        tokio::time::sleep(Duration::from_millis(20)).await;
        Http2Dialer.dial(target, credential, options).await
    }
}

fn options() -> DialOptions {
    DialOptions {
        pool_size: 2,
        dial_timeout: Duration::from_secs(1),
    }
}

fn rpc_request(path: &str, app: Option<&str>, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(path);
    if let Some(app) = app {
        builder = builder.header("app", app);
    }
    if let Some(token) = token {
        builder = builder.header("token", token);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn concurrent_first_use_dials_once() {
    let backend = start_h2_backend().await;
    let dialer = CountingDialer::default();
    let dials = Arc::clone(&dialer.dials);
    let proxy = RpcProxy::new(backend.to_string(), dialer, options());
    let alice = Credential::new("shop", "alice");

    let conns = join_all((0..32).map(|_| proxy.take_conn(&alice))).await;
    assert!(conns.iter().all(Result::is_ok));
    assert_eq!(dials.load(Ordering::SeqCst), 1);
    assert_eq!(proxy.cached_clients(), 1);

    // Cached afterwards.
    proxy.take_conn(&alice).await.unwrap();
    assert_eq!(dials.load(Ordering::SeqCst), 1);

    // Another tenant gets its own client.
    proxy.take_conn(&Credential::new("shop", "bob")).await.unwrap();
    assert_eq!(dials.load(Ordering::SeqCst), 2);
    assert_eq!(proxy.cached_clients(), 2);

    proxy.close();
}

#[tokio::test]
async fn connection_carries_tenant_credential() {
    let backend = start_h2_backend().await;
    let proxy = RpcProxy::new(backend.to_string(), Http2Dialer, options());

    let conn = proxy
        .take_conn(&Credential::new("shop", "alice"))
        .await
        .unwrap();
    let response = conn
        .send(rpc_request("/orders/7", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_text(response.map(Body::new)).await;
    assert_eq!(body, "shop:alice:/orders/7");
}

#[tokio::test]
async fn dial_failure_is_not_cached() {
    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let target = closed.local_addr().unwrap().to_string();
    drop(closed);

    let proxy = RpcProxy::new(target, Http2Dialer, options());
    let credential = Credential::new("shop", "alice");

    assert!(matches!(
        proxy.take_conn(&credential).await,
        Err(RpcError::Dial { .. })
    ));
    assert_eq!(proxy.cached_clients(), 0);
}

#[tokio::test]
async fn tenant_recovers_after_backend_restart() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let backend = serve_h2_backend(listener);

    let dialer = CountingDialer::default();
    let dials = Arc::clone(&dialer.dials);
    let proxy = RpcProxy::new(addr.to_string(), dialer, options());
    let alice = Credential::new("shop", "alice");
    proxy.take_conn(&alice).await.unwrap();

    backend.abort();
    // Calls fail once both pooled sessions have seen the backend go away.
    let err = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match proxy.take_conn(&alice).await {
                Ok(_) => tokio::time::sleep(Duration::from_millis(10)).await,
                Err(err) => break err,
            }
        }
    })
    .await
    .expect("pool should die with the backend");
    assert_eq!(err, RpcError::Unavailable);
    assert_eq!(proxy.cached_clients(), 0);
    assert_eq!(dials.load(Ordering::SeqCst), 1);

    let _restarted = serve_h2_backend(TcpListener::bind(addr).await.unwrap());
    let conn = proxy.take_conn(&alice).await.unwrap();
    assert_eq!(dials.load(Ordering::SeqCst), 2);

    let response = conn.send(rpc_request("/orders/8", None, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_text(response.map(Body::new)).await,
        "shop:alice:/orders/8"
    );
}

#[tokio::test]
async fn forward_route_through_engine() {
    let backend = start_h2_backend().await;
    let proxy = Arc::new(RpcProxy::new(backend.to_string(), Http2Dialer, options()));
    let engine = ServingEngine::new(bare_config()).unwrap().merge(
        Router::new()
            .route("/rpc/{*path}", any(forward))
            .with_state(Arc::clone(&proxy)),
    );
    let router = engine.router();

    let response = router
        .clone()
        .oneshot(rpc_request("/rpc/users", Some("crm"), Some("t-1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "crm:t-1:/rpc/users");

    let anonymous = router
        .clone()
        .oneshot(rpc_request("/rpc/users", Some("crm"), None))
        .await
        .unwrap();
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    proxy.close();
}
