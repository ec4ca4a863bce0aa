//! On-demand deployment detection endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tracing::{error, info};

use super::ApiError;
use crate::detector::{CacheStats, DeploymentDetector};
use crate::models::DeploymentInfo;

/// Standard envelope for detection responses.
#[derive(Debug, Serialize)]
pub struct DetectionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<DeploymentInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Detection routes, including cache management.
pub fn detection_routes(detector: Arc<DeploymentDetector>) -> Router {
    Router::new()
        .route("/api/v1/detect/deployment/:namespace/:name", get(detect_deployment))
        .route("/api/v1/detect/statefulset/:namespace/:name", get(detect_statefulset))
        .route("/api/v1/detect/daemonset/:namespace/:name", get(detect_daemonset))
        .route("/api/v1/detect/cache/clear", post(clear_cache))
        .route("/api/v1/detect/cache/stats", get(cache_stats))
        .with_state(detector)
}

async fn detect_deployment(
    State(detector): State<Arc<DeploymentDetector>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<DetectionResponse>, ApiError> {
    info!(namespace, deployment = %name, "Deployment detection request received");
    let info = detector.detect_deployment(&namespace, &name).await.map_err(|err| {
        error!(namespace, deployment = %name, error = %err, "Failed to detect deployment method");
        err
    })?;
    Ok(Json(DetectionResponse {
        success: true,
        data: Some(info),
        message: Some("Deployment method detected successfully".into()),
    }))
}

async fn detect_statefulset(
    State(detector): State<Arc<DeploymentDetector>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<DetectionResponse>, ApiError> {
    info!(namespace, statefulset = %name, "StatefulSet detection request received");
    let info = detector.detect_statefulset(&namespace, &name).await.map_err(|err| {
        error!(namespace, statefulset = %name, error = %err, "Failed to detect StatefulSet method");
        err
    })?;
    Ok(Json(DetectionResponse {
        success: true,
        data: Some(info),
        message: Some("StatefulSet method detected successfully".into()),
    }))
}

async fn detect_daemonset(
    State(detector): State<Arc<DeploymentDetector>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<DetectionResponse>, ApiError> {
    info!(namespace, daemonset = %name, "DaemonSet detection request received");
    let info = detector.detect_daemonset(&namespace, &name).await.map_err(|err| {
        error!(namespace, daemonset = %name, error = %err, "Failed to detect DaemonSet method");
        err
    })?;
    Ok(Json(DetectionResponse {
        success: true,
        data: Some(info),
        message: Some("DaemonSet method detected successfully".into()),
    }))
}

async fn clear_cache(
    State(detector): State<Arc<DeploymentDetector>>,
) -> (StatusCode, Json<DetectionResponse>) {
    detector.clear_cache();
    (
        StatusCode::OK,
        Json(DetectionResponse {
            success: true,
            data: None,
            message: Some("Cache cleared successfully".into()),
        }),
    )
}

async fn cache_stats(State(detector): State<Arc<DeploymentDetector>>) -> Json<CacheStats> {
    Json(detector.cache_stats())
}
