//! Signature verification stage.
//!
//! Buffers the body, checks the `X-Content-Security` header and hands the
//! buffered body to the handler. Buffering never exceeds `MAX_BODY_BYTES_LIMIT`,
//! even with the body limit stage disabled.

use std::sync::Arc;
use std::time::SystemTime;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::config::MAX_BODY_BYTES_LIMIT;
use crate::http::middleware::max_bytes::is_length_limit;
use crate::http::response::Rejection;
use crate::security::{SignatureGuard, SignedContent};

pub async fn verify_signature(
    State(guard): State<Arc<SignatureGuard>>,
    request: Request,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES_LIMIT as usize).await {
        Ok(bytes) => bytes,
        Err(err) if is_length_limit(&err) => return Rejection::PayloadTooLarge.into_response(),
        Err(err) => {
            tracing::debug!(error = %err, "Failed to read request body");
            return Rejection::InvalidBody.into_response();
        }
    };

    let content = SignedContent {
        method: parts.method.as_str(),
        path: parts.uri.path(),
        query: parts.uri.query().unwrap_or_default(),
        body: &bytes,
    };
    if let Err(violation) = guard.check(&parts.headers, &content, SystemTime::now()) {
        guard.record(violation, content.path);
        if guard.is_strict() {
            return Rejection::SignatureInvalid.into_response();
        }
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}
