//! Multi-layer coordination flow: detection through planning to execution,
//! with health probes and the cluster edge faked.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use strata::coordination::{
    HealthProbes, LayerDetector, MultiLayerOrchestrator, MultiLayerPlanner,
};
use strata::detector::MethodResolver;
use strata::error::EngineError;
use strata::models::{
    DeploymentInfo, DeploymentMethod, Issue, Layer, PlanStatus, Resource,
};
use strata::remediation::Remediator;

struct Probes {
    nodes_ready_fails: AtomicBool,
}

impl Probes {
    fn healthy() -> Arc<Self> {
        Arc::new(Self { nodes_ready_fails: AtomicBool::new(false) })
    }

    fn nodes_not_ready() -> Arc<Self> {
        Arc::new(Self { nodes_ready_fails: AtomicBool::new(true) })
    }
}

#[async_trait]
impl HealthProbes for Probes {
    async fn check_infrastructure(&self) -> Result<(), EngineError> {
        if self.nodes_ready_fails.load(Ordering::SeqCst) {
            return Err(EngineError::upstream(
                "infrastructure health",
                anyhow::anyhow!("2 node(s) are not ready"),
            ));
        }
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

fn node_and_pod() -> Vec<Resource> {
    vec![
        Resource {
            kind: "Node".into(),
            name: "worker-1".into(),
            namespace: String::new(),
            issue: "memory pressure".into(),
        },
        Resource {
            kind: "Pod".into(),
            name: "p1".into(),
            namespace: "default".into(),
            issue: "crash loop".into(),
        },
    ]
}

fn orchestrator(probes: Arc<Probes>) -> MultiLayerOrchestrator {
    MultiLayerOrchestrator::new(
        probes,
        Arc::new(DirectResolver),
        Arc::new(NoopRemediator),
        CancellationToken::new(),
    )
}

#[test]
fn multi_layer_detection_plans_infra_before_app() {
    let issue = LayerDetector::new().detect_layers(
        "inc-1",
        "node memory pressure causing pod crash loops",
        &node_and_pod(),
    );

    assert_eq!(issue.root_cause_layer, Layer::Infrastructure);
    assert!(issue.is_multi_layer());

    let plan = MultiLayerPlanner::new().generate_plan(&issue).unwrap();
    plan.validate().unwrap();

    assert_eq!(plan.steps.len(), 2);
    assert_eq!(plan.steps[0].action_type, "monitor_node_update");
    assert_eq!(plan.steps[0].wait_time_seconds, 300);
    assert_eq!(plan.steps[1].action_type, "restart_pod");
    assert_eq!(plan.steps[1].wait_time_seconds, 120);

    assert_eq!(plan.checkpoints.len(), 2);
    assert_eq!(plan.checkpoints[0].after_step, 1);
    assert_eq!(plan.checkpoints[1].after_step, 2);

    assert_eq!(plan.rollback_steps.len(), 2);
    assert_eq!(plan.rollback_steps[0].action_type, "rollback_restart_pod");
    assert_eq!(plan.rollback_steps[1].action_type, "rollback_monitor_node_update");
}

#[tokio::test]
async fn healthy_cluster_executes_full_plan() {
    let issue = LayerDetector::new().detect_layers(
        "inc-2",
        "node memory pressure causing pod crash loops",
        &node_and_pod(),
    );
    let mut plan = MultiLayerPlanner::new().generate_plan(&issue).unwrap();
    for step in &mut plan.steps {
        step.wait_time_seconds = 0;
    }

    let result = orchestrator(Probes::healthy()).execute(&mut plan).await;
    assert_eq!(result.status, "success");
    assert_eq!(result.executed_steps, 2);
    assert_eq!(plan.status, PlanStatus::Completed);
    assert_eq!(plan.current_step, 2);
}

#[tokio::test]
async fn failed_nodes_ready_probe_fails_plan_and_rolls_back() {
    let issue = LayerDetector::new().detect_layers(
        "inc-3",
        "node memory pressure causing pod crash loops",
        &node_and_pod(),
    );
    let mut plan = MultiLayerPlanner::new().generate_plan(&issue).unwrap();
    for step in &mut plan.steps {
        step.wait_time_seconds = 0;
    }

    let result = orchestrator(Probes::nodes_not_ready()).execute(&mut plan).await;
    assert_eq!(result.status, "failed");
    assert!(result.reason.contains("checkpoint failed"));
    assert!(result.reason.contains("not ready"));
    assert_eq!(result.failed_step, Some(0));
    assert_eq!(result.executed_steps, 1);
    assert_eq!(plan.status, PlanStatus::Failed);
}
