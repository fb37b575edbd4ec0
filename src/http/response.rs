//! Terminal responses produced by the pipeline itself.
//!
//! # Design Decisions
//! - Every rejection is counted in `rejected_requests_total{reason}` when rendered
//! - Bodies are short plain-text reasons; handlers never see rejected requests

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::observability::metrics;

/// A request answered by the pipeline instead of the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("service overloaded")]
    Overloaded,

    #[error("too many connections")]
    TooManyConnections,

    #[error("payload too large")]
    PayloadTooLarge,

    #[error("invalid request body")]
    InvalidBody,

    #[error("signature verification failed")]
    SignatureInvalid,

    #[error("request timed out")]
    TimedOut,

    #[error("internal error")]
    Internal,
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::Overloaded | Rejection::TooManyConnections => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Rejection::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Rejection::InvalidBody => StatusCode::BAD_REQUEST,
            Rejection::SignatureInvalid => StatusCode::UNAUTHORIZED,
            Rejection::TimedOut => StatusCode::GATEWAY_TIMEOUT,
            Rejection::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Label used in metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::Overloaded => "overloaded",
            Rejection::TooManyConnections => "too_many_connections",
            Rejection::PayloadTooLarge => "payload_too_large",
            Rejection::InvalidBody => "invalid_body",
            Rejection::SignatureInvalid => "signature_invalid",
            Rejection::TimedOut => "timed_out",
            Rejection::Internal => "internal",
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        metrics::record_rejection(self.reason());
        (self.status(), self.to_string()).into_response()
    }
}
