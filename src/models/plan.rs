//! Ordered remediation plans with health checkpoints and rollback mirrors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use super::Layer;
use crate::error::EngineError;

/// A single remediation action inside a multi-layer plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationStep {
    pub layer: Layer,
    /// 1-based position in the plan, strictly ascending.
    pub order: usize,
    pub description: String,
    /// `restart_pod`, `monitor_node_update`, `trigger_operator_reconciliation`, ...
    pub action_type: String,
    /// Resource identifier, `ns/name` for namespaced targets.
    pub target: String,
    /// Settle time after the step completes.
    pub wait_time_seconds: u64,
    /// When false, a failure is logged and execution continues.
    pub required: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl RemediationStep {
    #[must_use]
    pub fn wait_time(&self) -> Duration {
        Duration::from_secs(self.wait_time_seconds)
    }
}

impl fmt::Display for RemediationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Step {} [{}]: {} ({} on {})",
            self.order, self.layer, self.description, self.action_type, self.target
        )
    }
}

/// Layer-scoped health verification anchored after a layer's last step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckpoint {
    pub layer: Layer,
    /// Equals the `order` of the last step of this checkpoint's layer.
    pub after_step: usize,
    /// Labels of the probes to run, e.g. `nodes_ready`.
    pub checks: Vec<String>,
    pub timeout_seconds: u64,
    pub required: bool,
}

impl HealthCheckpoint {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Lifecycle of a remediation plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    RolledBack,
}

/// Ordered steps plus checkpoints for multi-layer remediation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationPlan {
    pub id: String,
    pub issue_id: String,
    /// Affected layers in priority order.
    pub layers: Vec<Layer>,
    pub steps: Vec<RemediationStep>,
    pub checkpoints: Vec<HealthCheckpoint>,
    /// Reverse-ordered mirror of `steps`, action types prefixed `rollback_`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rollback_steps: Vec<RemediationStep>,
    pub status: PlanStatus,
    /// Index of the next step to execute.
    pub current_step: usize,
    pub created_at: DateTime<Utc>,
}

impl RemediationPlan {
    #[must_use]
    pub fn new(id: String, issue_id: &str, layers: Vec<Layer>) -> Self {
        Self {
            id,
            issue_id: issue_id.to_string(),
            layers,
            steps: Vec::new(),
            checkpoints: Vec::new(),
            rollback_steps: Vec::new(),
            status: PlanStatus::Pending,
            current_step: 0,
            created_at: Utc::now(),
        }
    }

    /// Append a step, auto-assigning the next order when unset.
    pub fn add_step(&mut self, mut step: RemediationStep) {
        if step.order == 0 {
            step.order = self.steps.len() + 1;
        }
        self.steps.push(step);
    }

    /// The checkpoint anchored after a given step order, if any.
    #[must_use]
    pub fn checkpoint_after_step(&self, step_order: usize) -> Option<&HealthCheckpoint> {
        self.checkpoints.iter().find(|c| c.after_step == step_order)
    }

    pub fn advance_step(&mut self) {
        self.current_step += 1;
    }

    pub fn mark_executing(&mut self) {
        self.status = PlanStatus::Executing;
    }

    pub fn mark_completed(&mut self) {
        self.status = PlanStatus::Completed;
    }

    pub fn mark_failed(&mut self) {
        self.status = PlanStatus::Failed;
    }

    pub fn mark_rolled_back(&mut self) {
        self.status = PlanStatus::RolledBack;
    }

    /// Check structural invariants.
    ///
    /// # Errors
    ///
    /// Returns `Validation` when the step orders are not exactly `1..=N`, a
    /// checkpoint references a non-existent step order, or identity fields
    /// are missing.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.id.is_empty() {
            return Err(EngineError::Validation("plan id is required".into()));
        }
        if self.issue_id.is_empty() {
            return Err(EngineError::Validation("issue id is required".into()));
        }
        if self.layers.is_empty() {
            return Err(EngineError::Validation("at least one layer is required".into()));
        }
        if self.steps.is_empty() {
            return Err(EngineError::Validation("at least one step is required".into()));
        }
        for (i, step) in self.steps.iter().enumerate() {
            if step.order != i + 1 {
                return Err(EngineError::Validation(format!(
                    "step {} has wrong order: expected {}, got {}",
                    i,
                    i + 1,
                    step.order
                )));
            }
        }
        for checkpoint in &self.checkpoints {
            if !self.steps.iter().any(|s| s.order == checkpoint.after_step) {
                return Err(EngineError::Validation(format!(
                    "checkpoint for layer {} anchored to unknown step {}",
                    checkpoint.layer, checkpoint.after_step
                )));
            }
        }
        Ok(())
    }
}
