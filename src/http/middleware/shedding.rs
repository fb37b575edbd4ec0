//! Load shedding stage.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::http::response::Rejection;
use crate::resilience::LoadShedder;

pub async fn shed_load(State(shedder): State<LoadShedder>, request: Request, next: Next) -> Response {
    if shedder.should_shed() {
        tracing::warn!(
            path = %request.uri().path(),
            threshold = shedder.threshold(),
            "Request dropped, CPU overloaded"
        );
        return Rejection::Overloaded.into_response();
    }
    next.run(request).await
}
