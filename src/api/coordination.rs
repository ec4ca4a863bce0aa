//! Multi-layer coordination endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::ApiError;
use crate::coordination::{CoordinationWorkflow, WorkflowRegistry};
use crate::models::{Layer, Resource};

#[derive(Debug, Deserialize)]
pub struct TriggerCoordinationRequest {
    #[serde(default)]
    pub incident_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub resources: Vec<Resource>,
}

#[derive(Debug, Serialize)]
pub struct TriggerCoordinationResponse {
    pub workflow_id: String,
    pub status: String,
    pub affected_layers: Vec<Layer>,
    pub root_cause_layer: Layer,
    pub estimated_steps: usize,
}

/// Coordination routes: trigger and workflow lookup.
pub fn coordination_routes(registry: Arc<WorkflowRegistry>) -> Router {
    Router::new()
        .route("/api/v1/coordination/trigger", post(trigger_coordination))
        .route("/api/v1/coordination/workflows", get(list_workflows))
        .route("/api/v1/coordination/workflows/:id", get(get_workflow))
        .with_state(registry)
}

async fn trigger_coordination(
    State(registry): State<Arc<WorkflowRegistry>>,
    Json(req): Json<TriggerCoordinationRequest>,
) -> Result<(StatusCode, Json<TriggerCoordinationResponse>), ApiError> {
    let outcome = registry
        .trigger(&req.incident_id, &req.description, &req.resources)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerCoordinationResponse {
            workflow_id: outcome.workflow_id,
            status: outcome.status,
            affected_layers: outcome.affected_layers,
            root_cause_layer: outcome.root_cause_layer,
            estimated_steps: outcome.estimated_steps,
        }),
    ))
}

async fn get_workflow(
    State(registry): State<Arc<WorkflowRegistry>>,
    Path(id): Path<String>,
) -> Result<Json<CoordinationWorkflow>, ApiError> {
    Ok(Json(registry.workflow(&id)?))
}

async fn list_workflows(State(registry): State<Arc<WorkflowRegistry>>) -> Json<Value> {
    let workflows = registry.list_workflows();
    Json(json!({
        "workflows": workflows,
        "total": workflows.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::{HealthProbes, MultiLayerOrchestrator};
    use crate::detector::MethodResolver;
    use crate::error::EngineError;
    use crate::models::{DeploymentInfo, DeploymentMethod, Issue};
    use crate::remediation::Remediator;
    use async_trait::async_trait;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    struct AlwaysHealthy;

    #[async_trait]
    impl HealthProbes for AlwaysHealthy {
        async fn check_infrastructure(&self) -> Result<(), EngineError> {
            Ok(())
        }
        async fn check_platform(&self) -> Result<(), EngineError> {
            Ok(())
        }
        async fn check_application(&self) -> Result<(), EngineError> {
            Ok(())
        }
    }

    struct DirectResolver;

    #[async_trait]
    impl MethodResolver for DirectResolver {
        async fn resolve(
            &self,
            namespace: &str,
            name: &str,
            kind: &str,
        ) -> Result<DeploymentInfo, EngineError> {
            Ok(DeploymentInfo::new(namespace, name, kind, DeploymentMethod::Direct, 0.60))
        }
    }

    struct NoopRemediator;

    #[async_trait]
    impl Remediator for NoopRemediator {
        async fn remediate(&self, _info: &DeploymentInfo, _issue: &Issue) -> Result<(), EngineError> {
            Ok(())
        }
        fn can_handle(&self, _info: &DeploymentInfo) -> bool {
            true
        }
        fn name(&self) -> &'static str {
            "noop"
        }
    }

    fn app() -> Router {
        let orchestrator = Arc::new(MultiLayerOrchestrator::new(
            Arc::new(AlwaysHealthy),
            Arc::new(DirectResolver),
            Arc::new(NoopRemediator),
            CancellationToken::new(),
        ));
        coordination_routes(Arc::new(WorkflowRegistry::new(orchestrator)))
    }

    fn trigger_request(body: serde_json::Value) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri("/api/v1/coordination/trigger")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn trigger_returns_202_with_layers() {
        let response = app()
            .oneshot(trigger_request(json!({
                "incident_id": "inc-1",
                "description": "node memory pressure causing pod crash loops",
                "resources": [
                    {"kind": "Node", "name": "worker-1"},
                    {"kind": "Pod", "name": "p1", "namespace": "default"}
                ]
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["root_cause_layer"], "infrastructure");
        assert_eq!(json["estimated_steps"], 2);
        assert_eq!(
            json["affected_layers"].as_array().unwrap().len(),
            2
        );
        assert!(json["workflow_id"].as_str().unwrap().starts_with("cwf-"));
    }

    #[tokio::test]
    async fn trigger_without_incident_id_is_400() {
        let response = app()
            .oneshot(trigger_request(json!({
                "description": "pod crash loop",
                "resources": [{"kind": "Pod", "name": "p1", "namespace": "default"}]
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert!(json["error"].as_str().unwrap().contains("incident_id"));
    }

    #[tokio::test]
    async fn missing_workflow_is_404() {
        let response = app()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/v1/coordination/workflows/cwf-missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn workflow_listing_counts() {
        let app = app();
        let response = app
            .clone()
            .oneshot(trigger_request(json!({
                "incident_id": "inc-2",
                "description": "pod crash loop",
                "resources": [{"kind": "Pod", "name": "p1", "namespace": "default"}]
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/v1/coordination/workflows")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["total"], 1);
    }
}
