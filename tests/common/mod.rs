//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};

use serving_core::config::ServingConfig;
use serving_core::observability::{MetricsSink, TimingSample};
use serving_core::resilience::CpuSampler;
use serving_core::ServingEngine;

/// CPU sampler returning whatever the test sets.
#[derive(Debug, Default)]
pub struct FixedCpu(AtomicU64);

impl FixedCpu {
    pub fn new(usage: u64) -> Arc<Self> {
        Arc::new(Self(AtomicU64::new(usage)))
    }

    pub fn set(&self, usage: u64) {
        self.0.store(usage, Ordering::Relaxed);
    }
}

impl CpuSampler for FixedCpu {
    fn usage_per_mille(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Sink counting recorded samples.
#[derive(Debug, Default)]
pub struct CountingSink(AtomicUsize);

impl CountingSink {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl MetricsSink for CountingSink {
    fn record(&self, _sample: TimingSample) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Config with every optional stage off; tests enable what they exercise.
pub fn bare_config() -> ServingConfig {
    ServingConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        max_connections: 0,
        max_body_bytes: 0,
        timeout_millis: 0,
        cpu_threshold_per_mille: 0,
        shutdown_grace_millis: 1000,
        ..ServingConfig::default()
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Serve `engine` on an ephemeral port and wait until it is running.
pub async fn spawn_engine(
    engine: ServingEngine,
) -> (Arc<ServingEngine>, SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let engine = Arc::new(engine);

    let server = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.serve(listener).await.unwrap() }
    });
    engine.ready().await;
    (engine, addr, server)
}

/// Start an HTTP/2 (prior knowledge) backend answering `app:token:path`
/// from the credential headers it receives.
pub async fn start_h2_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    serve_h2_backend(listener);
    addr
}

/// Serve the echo backend on `listener`. Aborting the returned handle closes
/// the listener and every open connection.
pub fn serve_h2_backend(listener: TcpListener) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut connections = JoinSet::new();
        while let Ok((stream, _)) = listener.accept().await {
            connections.spawn(async move {
                let service = service_fn(|request: Request<Incoming>| async move {
                    let header = |name: &str| {
                        request
                            .headers()
                            .get(name)
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("-")
                            .to_string()
                    };
                    let body = format!(
                        "{}:{}:{}",
                        header("app"),
                        header("token"),
                        request.uri().path()
                    );
                    Ok::<_, Infallible>(Response::new(Full::new(Bytes::from(body))))
                });
                let _ = auto::Builder::new(TokioExecutor::new())
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    })
}
