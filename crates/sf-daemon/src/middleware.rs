// SPDX-License-Identifier: MIT OR Apache-2.0
//! Ambient HTTP middleware for the Job API: request ids, structured
//! request logging, and permissive CORS so a browser-hosted SlideForge
//! client can call the daemon and open its status WebSocket directly.

use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use uuid::Uuid;

/// A unique request identifier, available as an axum extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub Uuid);

/// Generates a [`RequestId`] for each request and echoes it back as
/// `x-request-id`, so a client's job-submission log line and the
/// daemon's own trace for the same request can be correlated.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let id = RequestId(Uuid::new_v4());
    req.extensions_mut().insert(id);
    let mut resp = next.run(req).await;
    resp.headers_mut().insert(
        "x-request-id",
        HeaderValue::from_str(&id.0.to_string()).unwrap_or_else(|_| HeaderValue::from_static("invalid")),
    );
    resp
}

/// Logs method, path, status, and duration for every request.
pub async fn request_logger(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let start = Instant::now();

    let resp = next.run(req).await;

    info!(
        http.method = %method,
        http.path = %path,
        http.status = resp.status().as_u16(),
        http.duration_ms = start.elapsed().as_millis() as u64,
        "request completed"
    );

    resp
}

/// The Job API has no cookie-based session to protect and is meant to
/// be called directly from browser-hosted clients, so CORS is wide
/// open rather than configured per deployment.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}
