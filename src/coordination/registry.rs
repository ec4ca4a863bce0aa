//! In-memory registry of multi-layer workflows and their background
//! execution. Ids are generated per trigger, so each workflow has at most
//! one execution by construction.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use super::orchestrator::{ExecutionResult, MultiLayerOrchestrator};
use super::planner::MultiLayerPlanner;
use super::{LayerDetector, MlLayerDetector};
use crate::error::EngineError;
use crate::models::{Layer, LayeredIssue, RemediationPlan, Resource};

/// A tracked multi-layer remediation workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationWorkflow {
    pub id: String,
    pub incident_id: String,
    /// `pending`, `executing`, `completed`, `failed`.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layered_issue: Option<LayeredIssue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation_plan: Option<RemediationPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_result: Option<ExecutionResult>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
}

/// What a trigger call hands back immediately.
#[derive(Debug, Clone)]
pub struct TriggerOutcome {
    pub workflow_id: String,
    pub status: String,
    pub affected_layers: Vec<Layer>,
    pub root_cause_layer: Layer,
    pub estimated_steps: usize,
}

/// Owns coordination workflows for the process lifetime and runs their plans
/// in background tasks.
pub struct WorkflowRegistry {
    layer_detector: LayerDetector,
    ml_detector: Option<Arc<MlLayerDetector>>,
    planner: MultiLayerPlanner,
    orchestrator: Arc<MultiLayerOrchestrator>,
    workflows: RwLock<HashMap<String, CoordinationWorkflow>>,
}

impl WorkflowRegistry {
    #[must_use]
    pub fn new(orchestrator: Arc<MultiLayerOrchestrator>) -> Self {
        Self {
            layer_detector: LayerDetector::new(),
            ml_detector: None,
            planner: MultiLayerPlanner::new(),
            orchestrator,
            workflows: RwLock::new(HashMap::new()),
        }
    }

    /// Enable ML-enhanced layer detection.
    #[must_use]
    pub fn with_ml_detector(mut self, detector: Arc<MlLayerDetector>) -> Self {
        info!("ML-enhanced layer detection enabled for coordination workflows");
        self.ml_detector = Some(detector);
        self
    }

    /// Detect layers, build the plan, store a pending workflow, and spawn its
    /// execution. Returns immediately.
    ///
    /// # Errors
    ///
    /// `Validation` when required fields are missing.
    pub async fn trigger(
        self: &Arc<Self>,
        incident_id: &str,
        description: &str,
        resources: &[Resource],
    ) -> Result<TriggerOutcome, EngineError> {
        if incident_id.is_empty() {
            return Err(EngineError::Validation("incident_id is required".into()));
        }
        if description.is_empty() {
            return Err(EngineError::Validation("description is required".into()));
        }
        if resources.is_empty() {
            return Err(EngineError::Validation("at least one resource is required".into()));
        }

        info!(
            incident_id,
            resources = resources.len(),
            ml_detection = self.ml_detector.is_some(),
            "Triggering multi-layer remediation"
        );

        let layered_issue = match &self.ml_detector {
            Some(ml) => ml.detect_layers(incident_id, description, resources).await,
            None => self.layer_detector.detect_layers(incident_id, description, resources),
        };

        let plan = self.planner.generate_plan(&layered_issue)?;

        let workflow = CoordinationWorkflow {
            id: format!("cwf-{}", &Uuid::new_v4().to_string()[..8]),
            incident_id: incident_id.to_string(),
            status: "pending".to_string(),
            layered_issue: Some(layered_issue.clone()),
            remediation_plan: Some(plan.clone()),
            execution_result: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: String::new(),
        };

        let outcome = TriggerOutcome {
            workflow_id: workflow.id.clone(),
            status: workflow.status.clone(),
            affected_layers: layered_issue.affected_layers.clone(),
            root_cause_layer: layered_issue.root_cause_layer,
            estimated_steps: plan.steps.len(),
        };

        self.save(workflow.clone());

        let registry = self.clone();
        tokio::spawn(async move {
            registry.execute_workflow(workflow, plan).await;
        });

        Ok(outcome)
    }

    /// Fetch one workflow.
    ///
    /// # Errors
    ///
    /// `NotFound` when no workflow has the id.
    pub fn workflow(&self, id: &str) -> Result<CoordinationWorkflow, EngineError> {
        self.workflows
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("workflow not found: {id}")))
    }

    /// All workflows, unordered.
    #[must_use]
    pub fn list_workflows(&self) -> Vec<CoordinationWorkflow> {
        self.workflows
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    async fn execute_workflow(&self, mut workflow: CoordinationWorkflow, mut plan: RemediationPlan) {
        info!(workflow_id = %workflow.id, "Starting multi-layer remediation workflow");

        workflow.status = "executing".to_string();
        workflow.started_at = Some(Utc::now());
        self.save(workflow.clone());

        let result = self.orchestrator.execute(&mut plan).await;

        workflow.completed_at = Some(Utc::now());
        workflow.remediation_plan = Some(plan);
        if result.status == "success" {
            info!(workflow_id = %workflow.id, "Multi-layer remediation completed successfully");
            workflow.status = "completed".to_string();
        } else {
            error!(workflow_id = %workflow.id, reason = %result.reason, "Multi-layer remediation failed");
            workflow.status = "failed".to_string();
            workflow.error_message = result.reason.clone();
        }
        workflow.execution_result = Some(result);

        info!(
            workflow_id = %workflow.id,
            status = %workflow.status,
            "Multi-layer remediation workflow completed"
        );
        self.save(workflow);
    }

    fn save(&self, workflow: CoordinationWorkflow) {
        self.workflows
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(workflow.id.clone(), workflow);
    }
}
