//! Clients for external services: the GitOps API, the ML pattern-analysis
//! service, and the machine-config operator's pool resources.

mod gitops;
mod mco;
mod ml;

pub use gitops::{
    Application, ApplicationStatus, GitOpsClient, HealthState, SyncRequest, SyncState,
};
pub use mco::{McoClient, PoolStatus};
pub use ml::{
    MetricData, MlClient, Pattern, PatternAnalysisRequest, PatternAnalysisResponse,
    PatternSummary, TimeRange,
};
