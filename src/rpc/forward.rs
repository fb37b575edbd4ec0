//! Handler forwarding an inbound request through the proxy.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    response::{IntoResponse, Response},
};

use crate::rpc::dial::Http2Dialer;
use crate::rpc::proxy::RpcProxy;

/// Forward the request to the backend on a connection bound to the caller's
/// credential. The request's `app`/`token` headers select the tenant.
pub async fn forward(
    State(proxy): State<Arc<RpcProxy<Http2Dialer>>>,
    request: Request<Body>,
) -> Response {
    let conn = match proxy.take_conn(request.headers()).await {
        Ok(conn) => conn,
        Err(err) => {
            tracing::debug!(error = %err, "No backend connection for request");
            return err.into_response();
        }
    };

    let path = request.uri().path().to_string();
    match conn.send(request).await {
        Ok(response) => {
            let (parts, body) = response.into_parts();
            Response::from_parts(parts, Body::new(body))
        }
        Err(err) => {
            tracing::warn!(backend = %proxy.backend(), path = %path, error = %err, "Backend call failed");
            err.into_response()
        }
    }
}
