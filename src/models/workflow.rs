//! Remediation workflow records owned by the registries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a remediation workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "in_progress")]
    InProgress,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
}

impl WorkflowStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// A single step inside a workflow record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub order: usize,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub layer: String,
    pub description: String,
    /// `pending`, `running`, `completed`, `failed`.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
}

/// A remediation workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub incident_id: String,
    pub status: WorkflowStatus,
    pub deployment_method: String,
    pub namespace: String,
    pub resource_name: String,
    pub resource_kind: String,
    pub issue_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remediator: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<WorkflowStep>,
}

impl Workflow {
    /// Wall-clock duration of the execution so far, zero before it starts.
    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        let Some(started) = self.started_at else {
            return chrono::Duration::zero();
        };
        let end = self.completed_at.unwrap_or_else(Utc::now);
        end - started
    }

    /// Append a pending step and return its order.
    pub fn add_step(&mut self, description: &str) -> usize {
        let order = self.steps.len();
        self.steps.push(WorkflowStep {
            order,
            layer: String::new(),
            description: description.to_string(),
            status: "pending".to_string(),
            started_at: None,
            completed_at: None,
            error_message: String::new(),
        });
        order
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self.status, WorkflowStatus::Pending | WorkflowStatus::InProgress)
    }
}
