//! Per-method remediation back-ends and their routing.
//!
//! Each deployment method gets a back-end implementing [`Remediator`]; the
//! [`StrategySelector`] picks the first registered back-end whose
//! `can_handle` accepts the classified workload, falling back to the direct
//! remediator. New back-ends are appended at startup, no other wiring.

mod controller;
mod direct;
mod engine;
mod gitops;
mod selector;
mod template_tool;

pub use controller::ControllerResourceRemediator;
pub use direct::DirectRemediator;
pub use engine::RemediationEngine;
pub use gitops::GitOpsRemediator;
pub use selector::StrategySelector;
pub use template_tool::{ReleaseStatus, TemplateToolRemediator};

use async_trait::async_trait;

use crate::error::EngineError;
use crate::models::{DeploymentInfo, Issue};

/// A remediation back-end for one deployment method.
#[async_trait]
pub trait Remediator: Send + Sync {
    /// Execute remediation for the issue on the classified workload.
    ///
    /// Implementations honour cancellation by being drop-safe: every await
    /// point is an external call or a sleep, so aborting the owning task
    /// stops the work.
    async fn remediate(&self, info: &DeploymentInfo, issue: &Issue) -> Result<(), EngineError>;

    /// Whether this back-end can handle the classified workload.
    fn can_handle(&self, info: &DeploymentInfo) -> bool;

    /// Stable name used in logs and metric labels.
    fn name(&self) -> &'static str;
}
