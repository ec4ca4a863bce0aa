//! Multi-layer coordination: decide which layers an incident touches, plan
//! an ordered remediation with health checkpoints, execute it with bounded
//! rollback, and track the workflows.

mod health;
mod layer_detector;
mod ml_detector;
mod orchestrator;
mod planner;
mod registry;

pub use health::{HealthChecker, HealthProbes, KubeHealthChecker};
pub use layer_detector::LayerDetector;
pub use ml_detector::MlLayerDetector;
pub use orchestrator::{ExecutionResult, MultiLayerOrchestrator};
pub use planner::MultiLayerPlanner;
pub use registry::{CoordinationWorkflow, TriggerOutcome, WorkflowRegistry};
