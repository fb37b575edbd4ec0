//! Backend RPC proxy subsystem.
//!
//! # Data Flow
//! ```text
//! handler calls proxy.take_conn(&headers)
//!     → auth::Credential resolved from the request
//!     → sync::SharedCalls keyed by credential (one dial per tenant at a time)
//!         → cache.rs hit: reuse RpcClient
//!         → miss: dial.rs opens a pooled RpcClient, cache.rs stores it
//!     → client.rs selects a connection (round-robin over live connections)
//!     → connection used for a single call
//! ```
//!
//! # Design Decisions
//! - No implicit retries anywhere; retry policy belongs to the caller
//! - Dial failures are never cached
//! - An empty pool is a distinct `Unavailable` error, not a default connection

pub mod cache;
pub mod client;
pub mod dial;
pub mod forward;
pub mod proxy;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::auth::CredentialError;

pub use cache::ClientCache;
pub use client::{Connection, RpcClient};
pub use dial::{DialOptions, Dialer, Http2Connection, Http2Dialer};
pub use proxy::RpcProxy;

/// Errors surfaced by the backend proxy.
///
/// `Clone` so a single dial outcome can be handed to every waiting caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// The caller's credential could not be resolved.
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// Establishing the backend client failed.
    #[error("failed to dial backend {target}: {reason}")]
    Dial { target: String, reason: String },

    /// The client holds no usable connection.
    #[error("backend unavailable")]
    Unavailable,

    /// A call on an established connection failed.
    #[error("backend call failed: {0}")]
    Call(String),
}

impl RpcError {
    pub fn dial(target: &str, reason: impl ToString) -> Self {
        Self::Dial {
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RpcError::Credential(_) => StatusCode::UNAUTHORIZED,
            RpcError::Dial { .. } | RpcError::Call(_) => StatusCode::BAD_GATEWAY,
            RpcError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}
