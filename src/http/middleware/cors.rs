//! Cross-origin resource sharing.
//!
//! # Rules
//! ```text
//! no origins configured         → Access-Control-Allow-Origin: *
//! request origin in the list    → echo the request origin
//! list contains "*"             → echo the request origin
//! otherwise                     → no allow-origin header
//! ```
//! Preflight (`OPTIONS`) requests are answered with 204 by the middleware and
//! never reach the handler. Unmatched routes go to [`not_allowed`].

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

const ALLOW_ALL: &str = "*";
const ALLOW_METHODS: &str = "GET, HEAD, POST, PATCH, PUT, DELETE";
const ALLOW_HEADERS: &str =
    "Content-Type, Origin, X-CSRF-Token, Authorization, AccessToken, Token, Range";
const EXPOSE_HEADERS: &str =
    "Content-Length, Access-Control-Allow-Origin, Access-Control-Allow-Headers";
const MAX_AGE: &str = "86400";

/// Allowed origins, shared by the middleware and the fallback responder.
#[derive(Debug, Clone, Default)]
pub struct CorsPolicy {
    origins: Arc<[String]>,
}

impl CorsPolicy {
    pub fn new(origins: Vec<String>) -> Self {
        Self {
            origins: origins.into(),
        }
    }

    pub fn origins(&self) -> &[String] {
        &self.origins
    }

    fn decorate(&self, request_headers: &HeaderMap, response_headers: &mut HeaderMap) {
        let origin = request_origin(request_headers);
        if let Some(allowed) = allowed_origin(origin, &self.origins) {
            set_cors_headers(response_headers, allowed);
        }
    }
}

/// The `Access-Control-Allow-Origin` value for a request origin, if allowed.
pub fn allowed_origin(request_origin: Option<&str>, origins: &[String]) -> Option<HeaderValue> {
    if origins.is_empty() {
        return Some(HeaderValue::from_static(ALLOW_ALL));
    }

    let origin = request_origin.filter(|origin| !origin.is_empty())?;
    origins
        .iter()
        .any(|allowed| allowed == ALLOW_ALL || allowed == origin)
        .then(|| HeaderValue::from_str(origin).ok())
        .flatten()
}

/// Responder for requests no route matched: 204 for preflight, 404 otherwise.
pub fn not_allowed(method: &Method, origin: Option<&str>, origins: &[String]) -> Response {
    let status = if method == Method::OPTIONS {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    };

    let mut response = status.into_response();
    if let Some(allowed) = allowed_origin(origin, origins) {
        set_cors_headers(response.headers_mut(), allowed);
    }
    response
}

/// Answer a request no route matched.
pub fn fallback(policy: &CorsPolicy, request: &Request) -> Response {
    not_allowed(
        request.method(),
        request_origin(request.headers()),
        policy.origins(),
    )
}

pub async fn cors(State(policy): State<CorsPolicy>, request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        policy.decorate(request.headers(), response.headers_mut());
        return response;
    }

    let request_headers = request.headers().clone();
    let mut response = next.run(request).await;
    policy.decorate(&request_headers, response.headers_mut());
    response
}

fn request_origin(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
}

fn set_cors_headers(headers: &mut HeaderMap, allowed: HeaderValue) {
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, allowed);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static(EXPOSE_HEADERS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static(MAX_AGE));
}
