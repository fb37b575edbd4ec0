//! Body size limiting stage.
//!
//! Requests declaring a larger `Content-Length` are rejected up front. All other
//! bodies are wrapped so that reading past the limit fails.

use std::error::Error as StdError;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http_body_util::{LengthLimitError, Limited};

use crate::http::response::Rejection;
use crate::security::limits::content_length;

pub async fn limit_body(State(max): State<usize>, request: Request, next: Next) -> Response {
    if let Some(declared) = content_length(request.headers()) {
        if declared > max as u64 {
            tracing::debug!(declared, max, "Request body too large");
            return Rejection::PayloadTooLarge.into_response();
        }
    }

    let (parts, body) = request.into_parts();
    let limited = Body::new(Limited::new(body, max));
    next.run(Request::from_parts(parts, limited)).await
}

/// Whether a body error was caused by the size limit.
pub fn is_length_limit(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if err.is::<LengthLimitError>() {
            return true;
        }
        current = err.source();
    }
    false
}
