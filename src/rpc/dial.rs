//! Backend dialing.
//!
//! # Responsibilities
//! - Define the dial contract used by the proxy (`Dialer`)
//! - Provide an HTTP/2 (prior knowledge) dialer built on hyper client connections
//! - Attach the tenant credential to every call made on a dialed connection
//!
//! # Design Decisions
//! - A client is all-or-nothing: if any pooled connection fails, the dial fails
//!   and connections opened so far are torn down
//! - Every connect + handshake is bounded by `DialOptions::dial_timeout`
//! - Connection driver tasks are aborted when the last handle is dropped

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{
    header,
    uri::{Authority, PathAndQuery, Scheme},
    HeaderMap, Request, Response, Uri, Version,
};
use futures_util::future::try_join_all;
use hyper::body::Incoming;
use hyper::client::conn::http2::{self, SendRequest};
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpStream;
use tokio::task::AbortHandle;

use crate::auth::Credential;
use crate::config::BackendConfig;
use crate::rpc::client::{Connection, RpcClient};
use crate::rpc::RpcError;

/// Static options applied to every client the proxy dials.
#[derive(Debug, Clone)]
pub struct DialOptions {
    /// Connections opened per client.
    pub pool_size: usize,
    /// Upper bound for connect + handshake of a single connection.
    pub dial_timeout: Duration,
}

impl Default for DialOptions {
    fn default() -> Self {
        Self {
            pool_size: 4,
            dial_timeout: Duration::from_secs(3),
        }
    }
}

impl From<&BackendConfig> for DialOptions {
    fn from(config: &BackendConfig) -> Self {
        Self {
            pool_size: config.pool_size,
            dial_timeout: Duration::from_millis(config.dial_timeout_millis),
        }
    }
}

/// Creates a per-credential client against a backend target.
pub trait Dialer: Send + Sync + 'static {
    type Conn: Connection;

    fn dial(
        &self,
        target: &str,
        credential: &Credential,
        options: &DialOptions,
    ) -> impl Future<Output = Result<RpcClient<Self::Conn>, RpcError>> + Send;
}

/// Dials HTTP/2 connections over plain TCP.
#[derive(Debug, Clone, Default)]
pub struct Http2Dialer;

impl Dialer for Http2Dialer {
    type Conn = Http2Connection;

    async fn dial(
        &self,
        target: &str,
        credential: &Credential,
        options: &DialOptions,
    ) -> Result<RpcClient<Http2Connection>, RpcError> {
        let authority = parse_target(target)?;
        let credential = Arc::new(credential.clone());

        let attempts = (0..options.pool_size).map(|_| async {
            tokio::time::timeout(
                options.dial_timeout,
                connect(target, &authority, credential.clone()),
            )
            .await
            .map_err(|_| {
                RpcError::dial(target, format!("timed out after {:?}", options.dial_timeout))
            })?
        });
        // Connections that did open are dropped on failure, which aborts their drivers.
        let conns = try_join_all(attempts).await?;

        tracing::info!(
            backend = %target,
            app = %credential.app(),
            pool_size = conns.len(),
            "Backend client dialed"
        );
        Ok(RpcClient::new(target, conns))
    }
}

async fn connect(
    target: &str,
    authority: &Authority,
    credential: Arc<Credential>,
) -> Result<Http2Connection, RpcError> {
    let stream = TcpStream::connect(authority.as_str())
        .await
        .map_err(|e| RpcError::dial(target, e))?;
    stream
        .set_nodelay(true)
        .map_err(|e| RpcError::dial(target, e))?;

    let (sender, conn) = http2::handshake(TokioExecutor::new(), TokioIo::new(stream))
        .await
        .map_err(|e| RpcError::dial(target, e))?;

    let backend = target.to_string();
    let task = tokio::spawn(async move {
        if let Err(err) = conn.await {
            tracing::debug!(backend = %backend, error = %err, "Backend connection ended with error");
        }
    });

    Ok(Http2Connection {
        sender,
        authority: authority.clone(),
        credential,
        driver: Arc::new(Driver {
            task: task.abort_handle(),
            closed: AtomicBool::new(false),
        }),
    })
}

/// Accepts `host:port` or a `http://host[:port]` URL.
fn parse_target(target: &str) -> Result<Authority, RpcError> {
    let host_port = if target.contains("://") {
        let url = url::Url::parse(target).map_err(|e| RpcError::dial(target, e))?;
        let host = url
            .host_str()
            .ok_or_else(|| RpcError::dial(target, "missing host"))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| RpcError::dial(target, "missing port"))?;
        format!("{host}:{port}")
    } else {
        target.to_string()
    };

    let authority: Authority = host_port
        .parse()
        .map_err(|e| RpcError::dial(target, e))?;
    if authority.port_u16().is_none() {
        return Err(RpcError::dial(target, "missing port"));
    }
    Ok(authority)
}

/// Owns the spawned task driving one HTTP/2 session.
struct Driver {
    task: AbortHandle,
    closed: AtomicBool,
}

impl Driver {
    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.task.abort();
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// One multiplexed HTTP/2 session to the backend, bound to a tenant credential.
#[derive(Clone)]
pub struct Http2Connection {
    sender: SendRequest<Body>,
    authority: Authority,
    credential: Arc<Credential>,
    driver: Arc<Driver>,
}

impl Http2Connection {
    /// Issue a single call. The URI is rewritten to the backend authority and
    /// the tenant credential replaces any `app`/`token` metadata on the request.
    pub async fn send(&self, request: Request<Body>) -> Result<Response<Incoming>, RpcError> {
        let (mut parts, body) = request.into_parts();

        let mut uri = parts.uri.into_parts();
        uri.scheme = Some(Scheme::HTTP);
        uri.authority = Some(self.authority.clone());
        if uri.path_and_query.is_none() {
            uri.path_and_query = Some(PathAndQuery::from_static("/"));
        }
        parts.uri = Uri::from_parts(uri).map_err(|e| RpcError::Call(e.to_string()))?;
        parts.version = Version::HTTP_2;

        strip_hop_by_hop(&mut parts.headers);
        self.credential.apply(&mut parts.headers)?;

        let mut sender = self.sender.clone();
        sender
            .ready()
            .await
            .map_err(|e| RpcError::Call(e.to_string()))?;
        sender
            .send_request(Request::from_parts(parts, body))
            .await
            .map_err(|e| RpcError::Call(e.to_string()))
    }
}

impl Connection for Http2Connection {
    fn is_available(&self) -> bool {
        !self.driver.closed.load(Ordering::Acquire) && !self.sender.is_closed()
    }

    fn close(&self) {
        self.driver.close();
    }
}

impl fmt::Debug for Http2Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Http2Connection")
            .field("authority", &self.authority)
            .field("app", &self.credential.app())
            .field("available", &self.is_available())
            .finish()
    }
}

/// Connection-specific headers are illegal in HTTP/2.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in [
        header::CONNECTION,
        header::HOST,
        header::TRANSFER_ENCODING,
        header::UPGRADE,
        header::TE,
    ] {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    headers.remove("proxy-connection");
}
