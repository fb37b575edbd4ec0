//! Multiplexes tenant credentials over pooled backend connections.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::{Credential, CredentialSource};
use crate::observability::metrics;
use crate::rpc::cache::ClientCache;
use crate::rpc::client::RpcClient;
use crate::rpc::dial::{DialOptions, Dialer};
use crate::rpc::RpcError;
use crate::sync::SharedCalls;

/// Hands out backend connections for the caller's credential, dialing a
/// client at most once per credential even under concurrent first use.
pub struct RpcProxy<D: Dialer> {
    backend: String,
    dialer: D,
    options: DialOptions,
    clients: ClientCache<D::Conn>,
    shared_calls: SharedCalls<Credential, Arc<RpcClient<D::Conn>>, RpcError>,
}

impl<D: Dialer> RpcProxy<D> {
    pub fn new(backend: impl Into<String>, dialer: D, options: DialOptions) -> Self {
        Self {
            backend: backend.into(),
            dialer,
            options,
            clients: ClientCache::new(),
            shared_calls: SharedCalls::new(),
        }
    }

    /// Resolve the caller's credential and return a connection for one call.
    pub async fn take_conn<S>(&self, source: &S) -> Result<D::Conn, RpcError>
    where
        S: CredentialSource + ?Sized,
    {
        let credential = source.credential()?;
        let client = self
            .shared_calls
            .call(credential.clone(), || self.client_for(&credential))
            .await?;

        match client.next() {
            Some(conn) => Ok(conn),
            None => {
                // Every pooled connection is gone; the next call dials afresh.
                let discarded = self.clients.discard(&credential, &client);
                tracing::warn!(
                    backend = %self.backend,
                    app = %credential.app(),
                    pool_size = client.pool_size(),
                    discarded,
                    "No available backend connection"
                );
                metrics::record_backend_unavailable();
                Err(RpcError::Unavailable)
            }
        }
    }

    async fn client_for(&self, credential: &Credential) -> Result<Arc<RpcClient<D::Conn>>, RpcError> {
        if let Some(client) = self.clients.get(credential) {
            return Ok(client);
        }

        match self.dialer.dial(&self.backend, credential, &self.options).await {
            Ok(client) => {
                metrics::record_dial("success");
                Ok(self.clients.insert(credential.clone(), client))
            }
            Err(err) => {
                tracing::warn!(backend = %self.backend, app = %credential.app(), error = %err, "Backend dial failed");
                metrics::record_dial("failure");
                Err(err)
            }
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn cached_clients(&self) -> usize {
        self.clients.len()
    }

    /// Close clients idle for longer than `max_idle`.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        self.clients.evict_idle(max_idle)
    }

    /// Close every cached client.
    pub fn close(&self) {
        tracing::info!(backend = %self.backend, clients = self.clients.len(), "Closing RPC proxy");
        self.clients.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::client::Connection;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Clone, Debug)]
    struct FakeConn(Arc<AtomicBool>);

    impl Connection for FakeConn {
        fn is_available(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }

        fn close(&self) {
            self.0.store(false, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct CountingDialer {
        dials: AtomicUsize,
        fail: AtomicBool,
        dead_pool: AtomicBool,
    }

    impl Dialer for Arc<CountingDialer> {
        type Conn = FakeConn;

        async fn dial(
            &self,
            target: &str,
            _credential: &Credential,
            options: &DialOptions,
        ) -> Result<RpcClient<FakeConn>, RpcError> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(RpcError::dial(target, "connection refused"));
            }
            let up = !self.dead_pool.load(Ordering::SeqCst);
            let conns = (0..options.pool_size)
                .map(|_| FakeConn(Arc::new(AtomicBool::new(up))))
                .collect();
            Ok(RpcClient::new(target, conns))
        }
    }

    fn proxy(dialer: &Arc<CountingDialer>) -> RpcProxy<Arc<CountingDialer>> {
        RpcProxy::new("backend:9000", dialer.clone(), DialOptions::default())
    }

    #[tokio::test]
    async fn reuses_cached_client() {
        let dialer = Arc::new(CountingDialer::default());
        let proxy = proxy(&dialer);
        let cred = Credential::new("app", "token");

        for _ in 0..5 {
            proxy.take_conn(&cred).await.unwrap();
        }
        assert_eq!(dialer.dials.load(Ordering::SeqCst), 1);
        assert_eq!(proxy.cached_clients(), 1);
    }

    #[tokio::test]
    async fn failed_dial_is_not_cached() {
        let dialer = Arc::new(CountingDialer::default());
        dialer.fail.store(true, Ordering::SeqCst);
        let proxy = proxy(&dialer);
        let cred = Credential::new("app", "token");

        let err = proxy.take_conn(&cred).await.unwrap_err();
        assert!(matches!(err, RpcError::Dial { .. }));
        assert_eq!(proxy.cached_clients(), 0);

        dialer.fail.store(false, Ordering::SeqCst);
        proxy.take_conn(&cred).await.unwrap();
        assert_eq!(dialer.dials.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dead_pool_is_unavailable_then_redialed() {
        let dialer = Arc::new(CountingDialer::default());
        dialer.dead_pool.store(true, Ordering::SeqCst);
        let proxy = proxy(&dialer);
        let cred = Credential::new("a", "t");

        let err = proxy.take_conn(&cred).await.unwrap_err();
        assert_eq!(err, RpcError::Unavailable);
        assert_eq!(proxy.cached_clients(), 0);

        dialer.dead_pool.store(false, Ordering::SeqCst);
        let conn = proxy.take_conn(&cred).await.unwrap();
        assert!(conn.is_available());
        assert_eq!(dialer.dials.load(Ordering::SeqCst), 2);
        assert_eq!(proxy.cached_clients(), 1);
    }

    #[tokio::test]
    async fn connections_dying_after_dial_are_replaced() {
        let dialer = Arc::new(CountingDialer::default());
        let proxy = proxy(&dialer);
        let cred = Credential::new("a", "t");

        // Kill the pool one connection at a time.
        while let Ok(conn) = proxy.take_conn(&cred).await {
            conn.close();
        }
        assert_eq!(proxy.cached_clients(), 0);

        proxy.take_conn(&cred).await.unwrap();
        assert_eq!(dialer.dials.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unresolvable_credential_skips_dial() {
        let dialer = Arc::new(CountingDialer::default());
        let proxy = proxy(&dialer);

        let err = proxy
            .take_conn(&axum::http::HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Credential(_)));
        assert_eq!(dialer.dials.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn evict_then_redial() {
        let dialer = Arc::new(CountingDialer::default());
        let proxy = proxy(&dialer);
        let cred = Credential::new("app", "token");

        let conn = proxy.take_conn(&cred).await.unwrap();
        assert_eq!(proxy.evict_idle(Duration::ZERO), 1);
        assert!(!conn.is_available());

        proxy.take_conn(&cred).await.unwrap();
        assert_eq!(dialer.dials.load(Ordering::SeqCst), 2);
    }
}
