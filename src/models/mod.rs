//! Data model for detection, layering, planning and workflow tracking.

mod deployment_info;
mod health;
mod issue;
mod layered_issue;
mod plan;
mod workflow;

pub use deployment_info::{DeploymentInfo, DeploymentMethod};
pub use health::{
    ComponentState, DependencyHealth, HealthResponse, HealthStatus, RbacStatus,
};
pub use issue::Issue;
pub use layered_issue::{Layer, LayerPrediction, LayeredIssue, MlLayerPredictions, Resource};
pub use plan::{HealthCheckpoint, PlanStatus, RemediationPlan, RemediationStep};
pub use workflow::{Workflow, WorkflowStatus, WorkflowStep};
