//! Plan generation: ordered steps per layer, a checkpoint after each
//! layer's last step, and a reverse-ordered rollback mirror.

use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::EngineError;
use crate::metrics;
use crate::models::{
    HealthCheckpoint, Layer, LayeredIssue, RemediationPlan, RemediationStep, Resource,
};

const CHECKPOINT_TIMEOUT_SECONDS: u64 = 600;

/// Generates ordered remediation plans from layered issues.
pub struct MultiLayerPlanner;

impl Default for MultiLayerPlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiLayerPlanner {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Build the plan: steps layer by layer in priority order, one health
    /// checkpoint per affected layer, rollback steps mirroring the forward
    /// steps in reverse.
    ///
    /// # Errors
    ///
    /// `Validation` when the issue itself is invalid.
    pub fn generate_plan(&self, issue: &LayeredIssue) -> Result<RemediationPlan, EngineError> {
        issue.validate()?;

        let plan_id = format!("plan-{}", &Uuid::new_v4().to_string()[..8]);
        let started = Instant::now();

        info!(
            plan_id = %plan_id,
            issue_id = %issue.id,
            layers = ?issue.affected_layers,
            root_cause = %issue.root_cause_layer,
            "Generating multi-layer remediation plan"
        );

        let ordered_layers = issue.layers_by_priority();
        let mut plan = RemediationPlan::new(plan_id.clone(), &issue.id, ordered_layers.clone());

        let mut order = 1;
        for layer in &ordered_layers {
            for step in steps_for_layer(*layer, issue.resources_for_layer(*layer), &mut order) {
                plan.add_step(step);
            }
        }

        for checkpoint in checkpoints(&ordered_layers, &plan.steps) {
            plan.checkpoints.push(checkpoint);
        }

        plan.rollback_steps = rollback_steps(&plan.steps);

        info!(
            plan_id = %plan_id,
            total_steps = plan.steps.len(),
            checkpoints = plan.checkpoints.len(),
            rollbacks = plan.rollback_steps.len(),
            "Multi-layer remediation plan generated"
        );

        metrics::record_plan_generation(
            ordered_layers.len(),
            started.elapsed().as_secs_f64(),
            true,
        );
        metrics::record_plan_steps(ordered_layers.len(), plan.steps.len());

        Ok(plan)
    }
}

fn steps_for_layer(
    layer: Layer,
    resources: &[Resource],
    order: &mut usize,
) -> Vec<RemediationStep> {
    debug!(layer = %layer, resources = resources.len(), "Generating steps for layer");
    match layer {
        Layer::Infrastructure => infrastructure_steps(resources, order),
        Layer::Platform => platform_steps(resources, order),
        Layer::Application => application_steps(resources, order),
    }
}

fn take_order(order: &mut usize) -> usize {
    let current = *order;
    *order += 1;
    current
}

fn infrastructure_steps(resources: &[Resource], order: &mut usize) -> Vec<RemediationStep> {
    let mut steps = Vec::new();
    for resource in resources {
        match resource.kind.as_str() {
            // Node recovery is driven by the machine-config operator; the
            // step observes the rollout rather than mutating the node.
            "Node" => steps.push(RemediationStep {
                layer: Layer::Infrastructure,
                order: take_order(order),
                description: format!("Monitor config rollout for node {}", resource.name),
                action_type: "monitor_node_update".into(),
                target: resource.name.clone(),
                wait_time_seconds: 300,
                required: true,
                metadata: HashMap::from([("node".to_string(), resource.name.clone())]),
            }),
            "MachineConfig" => steps.push(RemediationStep {
                layer: Layer::Infrastructure,
                order: take_order(order),
                description: format!("Monitor MachineConfig {} application", resource.name),
                action_type: "monitor_machineconfig".into(),
                target: resource.name.clone(),
                wait_time_seconds: 600,
                required: true,
                metadata: HashMap::from([("machineconfig".to_string(), resource.name.clone())]),
            }),
            "MachineConfigPool" => steps.push(RemediationStep {
                layer: Layer::Infrastructure,
                order: take_order(order),
                description: format!("Monitor MachineConfigPool {} update", resource.name),
                action_type: "monitor_mcp".into(),
                target: resource.name.clone(),
                wait_time_seconds: 900,
                required: true,
                metadata: HashMap::from([("mcp".to_string(), resource.name.clone())]),
            }),
            _ => {}
        }
    }
    steps
}

fn platform_steps(resources: &[Resource], order: &mut usize) -> Vec<RemediationStep> {
    let mut steps = Vec::new();
    for resource in resources {
        if resource.kind.contains("Operator") && resource.kind != "ClusterOperator" {
            steps.push(RemediationStep {
                layer: Layer::Platform,
                order: take_order(order),
                description: format!("Trigger reconciliation for {}", resource.name),
                action_type: "trigger_operator_reconciliation".into(),
                target: format!("{}/{}", resource.namespace, resource.name),
                wait_time_seconds: 180,
                required: true,
                metadata: HashMap::from([
                    ("operator".to_string(), resource.name.clone()),
                    ("namespace".to_string(), resource.namespace.clone()),
                ]),
            });
        }
        if resource.kind == "ClusterOperator" {
            steps.push(RemediationStep {
                layer: Layer::Platform,
                order: take_order(order),
                description: format!("Monitor ClusterOperator {} status", resource.name),
                action_type: "monitor_clusteroperator".into(),
                target: resource.name.clone(),
                wait_time_seconds: 300,
                required: true,
                metadata: HashMap::from([("clusteroperator".to_string(), resource.name.clone())]),
            });
        }
    }
    steps
}

fn application_steps(resources: &[Resource], order: &mut usize) -> Vec<RemediationStep> {
    let mut steps = Vec::new();
    for resource in resources {
        // Application restarts are optional: an upstream fix often clears
        // the symptom on its own.
        let (action, wait, key) = match resource.kind.as_str() {
            "Pod" => ("restart_pod", 120, "pod"),
            "Deployment" => ("restart_deployment", 120, "deployment"),
            "StatefulSet" => ("restart_statefulset", 180, "statefulset"),
            _ => continue,
        };
        steps.push(RemediationStep {
            layer: Layer::Application,
            order: take_order(order),
            description: format!(
                "Restart {} {}/{}",
                resource.kind.to_lowercase(),
                resource.namespace,
                resource.name
            ),
            action_type: action.into(),
            target: format!("{}/{}", resource.namespace, resource.name),
            wait_time_seconds: wait,
            required: false,
            metadata: HashMap::from([
                (key.to_string(), resource.name.clone()),
                ("namespace".to_string(), resource.namespace.clone()),
            ]),
        });
    }
    steps
}

fn checkpoints(layers: &[Layer], steps: &[RemediationStep]) -> Vec<HealthCheckpoint> {
    let mut last_step_per_layer: HashMap<Layer, usize> = HashMap::new();
    for step in steps {
        last_step_per_layer.insert(step.layer, step.order);
    }

    let mut checkpoints = Vec::with_capacity(layers.len());
    for layer in layers {
        let Some(after_step) = last_step_per_layer.get(layer).copied() else {
            continue;
        };
        checkpoints.push(HealthCheckpoint {
            layer: *layer,
            after_step,
            checks: layer_checks(*layer),
            timeout_seconds: CHECKPOINT_TIMEOUT_SECONDS,
            required: true,
        });
    }
    checkpoints
}

fn layer_checks(layer: Layer) -> Vec<String> {
    let checks: &[&str] = match layer {
        Layer::Infrastructure => {
            &["nodes_ready", "mco_stable", "storage_available", "system_pods_running"]
        }
        Layer::Platform => &[
            "operators_ready",
            "clusteroperators_available",
            "networking_functional",
            "ingress_available",
        ],
        Layer::Application => {
            &["pods_running", "deployments_ready", "endpoints_healthy", "services_responding"]
        }
    };
    checks.iter().map(ToString::to_string).collect()
}

fn rollback_steps(steps: &[RemediationStep]) -> Vec<RemediationStep> {
    steps
        .iter()
        .rev()
        .enumerate()
        .map(|(i, step)| RemediationStep {
            layer: step.layer,
            order: i + 1,
            description: format!("Rollback: {}", step.description),
            action_type: format!("rollback_{}", step.action_type),
            target: step.target.clone(),
            wait_time_seconds: step.wait_time_seconds,
            required: step.required,
            metadata: step.metadata.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LayeredIssue;

    fn resource(kind: &str, namespace: &str, name: &str) -> Resource {
        Resource {
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
            issue: String::new(),
        }
    }

    fn infra_app_issue() -> LayeredIssue {
        let mut issue = LayeredIssue::new(
            "inc-1",
            "node memory pressure causing pod crash loops",
            Layer::Infrastructure,
        );
        issue.add_affected_layer(Layer::Application);
        issue.add_impacted_resource(Layer::Infrastructure, resource("Node", "", "worker-1"));
        issue.add_impacted_resource(Layer::Application, resource("Pod", "default", "p1"));
        issue
    }

    #[test]
    fn infra_then_app_with_two_checkpoints() {
        let plan = MultiLayerPlanner::new().generate_plan(&infra_app_issue()).unwrap();
        plan.validate().unwrap();

        assert_eq!(plan.layers, vec![Layer::Infrastructure, Layer::Application]);
        assert_eq!(plan.steps.len(), 2);

        assert_eq!(plan.steps[0].action_type, "monitor_node_update");
        assert_eq!(plan.steps[0].wait_time_seconds, 300);
        assert!(plan.steps[0].required);

        assert_eq!(plan.steps[1].action_type, "restart_pod");
        assert_eq!(plan.steps[1].wait_time_seconds, 120);
        assert!(!plan.steps[1].required);

        assert_eq!(plan.checkpoints.len(), 2);
        assert_eq!(plan.checkpoints[0].layer, Layer::Infrastructure);
        assert_eq!(plan.checkpoints[0].after_step, 1);
        assert_eq!(plan.checkpoints[1].layer, Layer::Application);
        assert_eq!(plan.checkpoints[1].after_step, 2);

        assert_eq!(plan.rollback_steps.len(), 2);
        assert_eq!(plan.rollback_steps[0].action_type, "rollback_restart_pod");
        assert_eq!(plan.rollback_steps[1].action_type, "rollback_monitor_node_update");
    }

    #[test]
    fn single_layer_issue_gets_one_checkpoint() {
        let mut issue = LayeredIssue::new("inc-2", "pod crash loop", Layer::Application);
        issue.add_impacted_resource(Layer::Application, resource("Pod", "default", "p1"));
        issue.add_impacted_resource(Layer::Application, resource("Deployment", "default", "d1"));

        let plan = MultiLayerPlanner::new().generate_plan(&issue).unwrap();
        assert_eq!(plan.checkpoints.len(), 1);
        assert_eq!(plan.checkpoints[0].after_step, 2);
        assert_eq!(
            plan.checkpoints[0].checks,
            vec!["pods_running", "deployments_ready", "endpoints_healthy", "services_responding"]
        );
    }

    #[test]
    fn operator_resources_get_reconciliation_steps() {
        let mut issue = LayeredIssue::new("inc-3", "operator degraded", Layer::Platform);
        issue.add_impacted_resource(
            Layer::Platform,
            resource("PrometheusOperator", "monitoring", "prom"),
        );
        issue.add_impacted_resource(Layer::Platform, resource("ClusterOperator", "", "ingress"));

        let plan = MultiLayerPlanner::new().generate_plan(&issue).unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].action_type, "trigger_operator_reconciliation");
        assert_eq!(plan.steps[0].target, "monitoring/prom");
        assert_eq!(plan.steps[0].wait_time_seconds, 180);
        assert_eq!(plan.steps[1].action_type, "monitor_clusteroperator");
        assert_eq!(plan.steps[1].wait_time_seconds, 300);
    }

    #[test]
    fn machineconfig_waits_scale_with_scope() {
        let mut issue = LayeredIssue::new("inc-4", "machineconfig rollout", Layer::Infrastructure);
        issue.add_impacted_resource(Layer::Infrastructure, resource("MachineConfig", "", "mc-1"));
        issue.add_impacted_resource(
            Layer::Infrastructure,
            resource("MachineConfigPool", "", "worker"),
        );

        let plan = MultiLayerPlanner::new().generate_plan(&issue).unwrap();
        assert_eq!(plan.steps[0].wait_time_seconds, 600);
        assert_eq!(plan.steps[1].wait_time_seconds, 900);
    }

    #[test]
    fn steps_order_is_contiguous_across_layers() {
        let mut issue = infra_app_issue();
        issue.add_affected_layer(Layer::Platform);
        issue.add_impacted_resource(Layer::Platform, resource("ClusterOperator", "", "dns"));

        let plan = MultiLayerPlanner::new().generate_plan(&issue).unwrap();
        let orders: Vec<usize> = plan.steps.iter().map(|s| s.order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
        // Checkpoints appear in layer-priority order.
        assert_eq!(plan.checkpoints[0].layer, Layer::Infrastructure);
        assert_eq!(plan.checkpoints[1].layer, Layer::Platform);
        assert_eq!(plan.checkpoints[2].layer, Layer::Application);
    }

    #[test]
    fn rollback_mirror_preserves_targets_in_reverse() {
        let plan = MultiLayerPlanner::new().generate_plan(&infra_app_issue()).unwrap();
        let forward_targets: Vec<&str> = plan.steps.iter().map(|s| s.target.as_str()).collect();
        let rollback_targets: Vec<&str> =
            plan.rollback_steps.iter().map(|s| s.target.as_str()).collect();
        let mut reversed = forward_targets.clone();
        reversed.reverse();
        assert_eq!(rollback_targets, reversed);
    }

    #[test]
    fn invalid_issue_is_rejected() {
        let mut issue = infra_app_issue();
        issue.id.clear();
        assert!(MultiLayerPlanner::new().generate_plan(&issue).is_err());
    }
}
