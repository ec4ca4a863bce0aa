//! Single-workflow remediation endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::ApiError;
use crate::models::{Issue, WorkflowStatus, WorkflowStep};
use crate::remediation::RemediationEngine;

#[derive(Debug, Deserialize)]
pub struct TriggerRemediationRequest {
    #[serde(default)]
    pub incident_id: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub resource: ResourceRef,
    #[serde(default)]
    pub issue: IssueBody,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResourceRef {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct IssueBody {
    #[serde(default, rename = "type")]
    pub issue_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub severity: String,
}

#[derive(Debug, Serialize)]
pub struct TriggerRemediationResponse {
    pub workflow_id: String,
    pub status: String,
    pub deployment_method: String,
    pub estimated_duration: String,
}

#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    pub id: String,
    pub incident_id: String,
    pub status: String,
    pub deployment_method: String,
    pub namespace: String,
    pub resource_name: String,
    pub resource_kind: String,
    pub issue_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub remediator: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error_message: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub started_at: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub completed_at: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub duration: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<WorkflowStep>,
}

/// Remediation routes: trigger, workflow lookup, incident listing.
pub fn remediation_routes(engine: Arc<RemediationEngine>) -> Router {
    Router::new()
        .route("/api/v1/remediation/trigger", post(trigger_remediation))
        .route("/api/v1/workflows/:id", get(get_workflow))
        .route("/api/v1/incidents", get(list_incidents))
        .with_state(engine)
}

async fn trigger_remediation(
    State(engine): State<Arc<RemediationEngine>>,
    Json(req): Json<TriggerRemediationRequest>,
) -> Result<(StatusCode, Json<TriggerRemediationResponse>), ApiError> {
    if req.incident_id.is_empty() {
        return Err(crate::error::EngineError::Validation("incident_id is required".into()).into());
    }
    if req.namespace.is_empty() {
        return Err(crate::error::EngineError::Validation("namespace is required".into()).into());
    }
    if req.resource.name.is_empty() || req.resource.kind.is_empty() {
        return Err(crate::error::EngineError::Validation(
            "resource.name and resource.kind are required".into(),
        )
        .into());
    }
    if req.issue.issue_type.is_empty() {
        return Err(crate::error::EngineError::Validation("issue.type is required".into()).into());
    }

    info!(
        incident_id = %req.incident_id,
        namespace = %req.namespace,
        resource = %req.resource.name,
        issue_type = %req.issue.issue_type,
        "Triggering remediation workflow"
    );

    let issue = Issue {
        id: req.incident_id.clone(),
        issue_type: req.issue.issue_type,
        severity: if req.issue.severity.is_empty() {
            "medium".to_string()
        } else {
            req.issue.severity
        },
        namespace: req.namespace,
        resource_type: req.resource.kind,
        resource_name: req.resource.name,
        description: req.issue.description,
        detected_at: Utc::now(),
    };

    let workflow = engine.trigger(&req.incident_id, issue).await?;

    info!(workflow_id = %workflow.id, status = workflow.status.as_str(), "Remediation workflow triggered successfully");
    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerRemediationResponse {
            workflow_id: workflow.id,
            status: workflow.status.as_str().to_string(),
            deployment_method: workflow.deployment_method,
            estimated_duration: "5m".to_string(),
        }),
    ))
}

async fn get_workflow(
    State(engine): State<Arc<RemediationEngine>>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    let workflow = engine.workflow(&id)?;

    let rfc3339 =
        |t: chrono::DateTime<Utc>| t.to_rfc3339_opts(SecondsFormat::Secs, true);
    let response = WorkflowResponse {
        id: workflow.id.clone(),
        incident_id: workflow.incident_id.clone(),
        status: workflow.status.as_str().to_string(),
        deployment_method: workflow.deployment_method.clone(),
        namespace: workflow.namespace.clone(),
        resource_name: workflow.resource_name.clone(),
        resource_kind: workflow.resource_kind.clone(),
        issue_type: workflow.issue_type.clone(),
        remediator: workflow.remediator.clone(),
        error_message: workflow.error_message.clone(),
        created_at: rfc3339(workflow.created_at),
        started_at: workflow.started_at.map(rfc3339).unwrap_or_default(),
        completed_at: workflow.completed_at.map(rfc3339).unwrap_or_default(),
        duration: if workflow.completed_at.is_some() {
            format!("{}s", workflow.duration().num_seconds())
        } else {
            String::new()
        },
        steps: workflow.steps,
    };
    Ok(Json(response))
}

async fn list_incidents(State(engine): State<Arc<RemediationEngine>>) -> Json<Value> {
    let workflows = engine.list_workflows();

    let incidents: Vec<Value> = workflows
        .iter()
        .map(|wf| {
            let status = match wf.status {
                WorkflowStatus::Completed => "remediated",
                WorkflowStatus::Failed => "failed",
                _ => "in_progress",
            };
            json!({
                "id": wf.incident_id,
                "namespace": wf.namespace,
                "resource": format!("{}/{}", wf.resource_kind, wf.resource_name),
                "issue_type": wf.issue_type,
                "created_at": wf.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                "status": status,
                "workflow_id": wf.id,
            })
        })
        .collect();

    Json(json!({
        "incidents": incidents,
        "total": incidents.len(),
    }))
}
