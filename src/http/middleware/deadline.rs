//! Deadline stage.
//!
//! The rest of the chain runs on its own task. When the deadline passes first the
//! client gets 504 and the task's eventual result is discarded.

use std::time::Duration;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::Instrument;

use crate::http::request::request_id;
use crate::http::response::Rejection;
use crate::resilience::Deadline;

pub async fn enforce_deadline(
    State(timeout): State<Duration>,
    mut request: Request,
    next: Next,
) -> Response {
    let deadline = Deadline::after(timeout);
    request.extensions_mut().insert(deadline);
    let path = request.uri().path().to_owned();
    let id = request_id(&request).unwrap_or("-").to_owned();

    let task = tokio::spawn(next.run(request).in_current_span());
    match tokio::time::timeout_at(deadline.instant(), task).await {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => {
            tracing::error!(path = %path, request_id = %id, error = %err, "Request task failed");
            Rejection::Internal.into_response()
        }
        Err(_) => {
            tracing::warn!(path = %path, request_id = %id, timeout_ms = timeout.as_millis() as u64, "Request timed out");
            Rejection::TimedOut.into_response()
        }
    }
}
