//! Concurrent request limiting stage.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::http::response::Rejection;
use crate::security::ConnectionLimiter;

pub async fn limit_connections(
    State(limiter): State<ConnectionLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let Some(_slot) = limiter.try_acquire() else {
        tracing::warn!(
            path = %request.uri().path(),
            max = limiter.max(),
            "Concurrent request limit reached"
        );
        return Rejection::TooManyConnections.into_response();
    };
    next.run(request).await
}
