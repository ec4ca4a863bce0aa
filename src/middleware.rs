//! HTTP middleware: request-id tagging, structured access log, panic recovery.

use axum::{
    body::Body,
    extract::Request,
    http::{header::HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Tag every request with an id (echoed from the client or synthesised) and
/// emit one structured access-log line per request.
pub async fn request_context(mut request: Request, next: Next) -> Response {
    let start = Instant::now();

    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map_or_else(|| Uuid::new_v4().to_string(), ToString::to_string);

    let method = request.method().clone();
    let path = request.uri().path().to_string();

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        request
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }

    let status = response.status().as_u16();
    let duration_ms = start.elapsed().as_millis();

    if status >= 500 {
        error!(%request_id, %method, %path, status, duration_ms, "Request completed with server error");
    } else if status >= 400 {
        warn!(%request_id, %method, %path, status, duration_ms, "Request completed with client error");
    } else {
        info!(%request_id, %method, %path, status, duration_ms, "Request completed");
    }

    response
}

/// Turn a caught handler panic into a logged 500 response.
///
/// Wired through `tower_http::catch_panic::CatchPanicLayer::custom`.
#[must_use]
pub fn panic_response(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".to_string()
    };

    error!(panic = %detail, backtrace = %std::backtrace::Backtrace::force_capture(), "Panic recovered in HTTP handler");

    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header("content-type", "application/json")
        .body(Body::from(
            r#"{"error":"Internal server error","message":"An unexpected error occurred"}"#,
        ))
        .unwrap_or_default()
}
