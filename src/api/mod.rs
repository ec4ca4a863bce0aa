//! HTTP API: router assembly and error mapping.

mod coordination;
mod detection;
mod health;
mod remediation;

pub use coordination::coordination_routes;
pub use detection::detection_routes;
pub use health::{health_routes, HealthState};
pub use remediation::remediation_routes;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{middleware as axum_middleware, Json, Router};
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::coordination::WorkflowRegistry;
use crate::detector::DeploymentDetector;
use crate::middleware;
use crate::remediation::RemediationEngine;

/// JSON error payload returned by every failing handler.
#[derive(Debug, serde::Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Maps engine errors onto HTTP statuses.
pub struct ApiError(pub crate::error::EngineError);

impl From<crate::error::EngineError> for ApiError {
    fn from(err: crate::error::EngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        use crate::error::EngineError;
        let (status, message) = match &self.0 {
            EngineError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            EngineError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            EngineError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
            other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

/// Assemble the full API router with middleware.
pub fn build_router(
    config: &Config,
    health_state: HealthState,
    detector: Arc<DeploymentDetector>,
    engine: Arc<RemediationEngine>,
    registry: Arc<WorkflowRegistry>,
) -> Router {
    let cors = if config.enable_cors {
        if config.cors_allow_origin.iter().any(|o| o == "*") {
            CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
        } else {
            let origins: Vec<axum::http::HeaderValue> = config
                .cors_allow_origin
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new().allow_origin(origins).allow_methods(Any).allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .merge(health_routes(health_state))
        .merge(detection_routes(detector))
        .merge(remediation_routes(engine))
        .merge(coordination_routes(registry))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::custom(middleware::panic_response))
                .layer(axum_middleware::from_fn(middleware::request_context))
                .layer(cors)
                .layer(TimeoutLayer::new(Duration::from_secs(60))),
        )
}

/// The metrics listener's router.
pub fn build_metrics_router() -> Router {
    use axum::routing::get;
    Router::new().route(
        "/metrics",
        get(|| async {
            (
                StatusCode::OK,
                [("content-type", "text/plain; charset=utf-8")],
                crate::metrics::gather(),
            )
        }),
    )
}
