//! Per-credential RPC client owning a small pool of backend connections.
//!
//! # Responsibilities
//! - Hold the connections dialed for one tenant against one backend
//! - Select a connection per call (round-robin, skipping dead connections)
//! - Close every connection on request

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A backend transport connection that can carry calls.
///
/// Cloning yields another handle to the same underlying connection.
pub trait Connection: Clone + Send + Sync + 'static {
    /// Whether calls can currently be issued on this connection.
    fn is_available(&self) -> bool;

    /// Tear the connection down. Later `is_available` calls return false.
    fn close(&self);
}

/// Pooled client for a single credential.
pub struct RpcClient<C> {
    target: String,
    conns: Vec<C>,
    counter: AtomicUsize,
}

impl<C: Connection> RpcClient<C> {
    /// Wrap already-established connections. Selection starts at a random
    /// offset so tenants dialed together do not all favour connection 0.
    pub fn new(target: impl Into<String>, conns: Vec<C>) -> Self {
        let start = if conns.is_empty() {
            0
        } else {
            fastrand::usize(..conns.len())
        };
        Self {
            target: target.into(),
            conns,
            counter: AtomicUsize::new(start),
        }
    }

    /// Next available connection in round-robin order, or `None` when every
    /// connection is closed or unhealthy.
    pub fn next(&self) -> Option<C> {
        if self.conns.is_empty() {
            return None;
        }

        let start = self.counter.fetch_add(1, Ordering::Relaxed);
        let len = self.conns.len();

        for i in 0..len {
            let conn = &self.conns[start.wrapping_add(i) % len];
            if conn.is_available() {
                return Some(conn.clone());
            }
        }
        None
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn pool_size(&self) -> usize {
        self.conns.len()
    }

    pub fn available(&self) -> usize {
        self.conns.iter().filter(|c| c.is_available()).count()
    }

    pub fn close(&self) {
        for conn in &self.conns {
            conn.close();
        }
        tracing::debug!(backend = %self.target, connections = self.conns.len(), "RPC client closed");
    }
}

impl<C: Connection> fmt::Debug for RpcClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcClient")
            .field("target", &self.target)
            .field("pool_size", &self.conns.len())
            .field("available", &self.available())
            .finish()
    }
}
