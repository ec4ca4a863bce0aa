//! Plan execution: steps in order, cancellable settle waits, checkpoint
//! verification, and coordinated rollback of the executed prefix.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::health::{check_layer, HealthProbes};
use crate::detector::MethodResolver;
use crate::error::EngineError;
use crate::metrics;
use crate::models::{
    DeploymentInfo, DeploymentMethod, HealthCheckpoint, Issue, Layer, RemediationPlan,
    RemediationStep,
};
use crate::remediation::Remediator;

const ROLLBACK_PACING: Duration = Duration::from_millis(500);

/// Outcome of one plan execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// `success` or `failed`.
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    pub executed_steps: usize,
    /// Zero-based index of the step that caused the failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<usize>,
    pub completed_at: DateTime<Utc>,
}

impl ExecutionResult {
    fn success(executed_steps: usize) -> Self {
        Self {
            status: "success".into(),
            reason: String::new(),
            executed_steps,
            failed_step: None,
            completed_at: Utc::now(),
        }
    }

    fn failure(reason: String, executed_steps: usize, failed_step: Option<usize>) -> Self {
        Self {
            status: "failed".into(),
            reason,
            executed_steps,
            failed_step,
            completed_at: Utc::now(),
        }
    }
}

/// Executes multi-layer remediation plans.
///
/// Infrastructure and platform steps are passive monitors; their mutations
/// belong to the cluster's own controllers. Application steps resolve the
/// workload's deployment method and dispatch through the strategy selector.
pub struct MultiLayerOrchestrator {
    health: Arc<dyn HealthProbes>,
    resolver: Arc<dyn MethodResolver>,
    selector: Arc<dyn Remediator>,
    shutdown: CancellationToken,
}

impl MultiLayerOrchestrator {
    #[must_use]
    pub fn new(
        health: Arc<dyn HealthProbes>,
        resolver: Arc<dyn MethodResolver>,
        selector: Arc<dyn Remediator>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            health,
            resolver,
            selector,
            shutdown,
        }
    }

    /// Execute the plan, mutating its status and step cursor as it goes.
    pub async fn execute(&self, plan: &mut RemediationPlan) -> ExecutionResult {
        info!(
            plan_id = %plan.id,
            total_steps = plan.steps.len(),
            layers = ?plan.layers,
            "Starting multi-layer remediation plan execution"
        );

        metrics::record_plan_execution_start();
        let started = Instant::now();
        let layers_count = plan.layers.len();

        plan.mark_executing();
        let mut executed: Vec<RemediationStep> = Vec::new();
        let steps = plan.steps.clone();

        for (index, step) in steps.iter().enumerate() {
            if self.shutdown.is_cancelled() {
                metrics::record_plan_execution_end(
                    "cancelled",
                    layers_count,
                    started.elapsed().as_secs_f64(),
                );
                plan.mark_failed();
                return ExecutionResult::failure("context cancelled".into(), executed.len(), None);
            }

            info!(
                step = step.order,
                layer = %step.layer,
                action_type = %step.action_type,
                target = %step.target,
                "Executing remediation step"
            );

            if let Err(err) = self.execute_step(step).await {
                error!(step = step.order, error = %err, "Step execution failed");

                if !step.required {
                    warn!(step = step.order, "Non-required step failed, continuing");
                    continue;
                }

                plan.mark_failed();
                self.rollback(&executed, "step_failed").await;
                metrics::record_plan_execution_end(
                    "failed",
                    layers_count,
                    started.elapsed().as_secs_f64(),
                );
                return ExecutionResult::failure(err.to_string(), executed.len(), Some(index));
            }

            executed.push(step.clone());
            plan.advance_step();

            if step.wait_time_seconds > 0 {
                debug!(wait_time_seconds = step.wait_time_seconds, "Waiting for step to settle");
                tokio::select! {
                    () = sleep(step.wait_time()) => {}
                    () = self.shutdown.cancelled() => {
                        metrics::record_plan_execution_end(
                            "cancelled",
                            layers_count,
                            started.elapsed().as_secs_f64(),
                        );
                        plan.mark_failed();
                        return ExecutionResult::failure(
                            "context cancelled".into(),
                            executed.len(),
                            None,
                        );
                    }
                }
            }

            if let Some(checkpoint) = plan.checkpoint_after_step(step.order).cloned() {
                info!(
                    layer = %checkpoint.layer,
                    checks = checkpoint.checks.len(),
                    "Verifying health checkpoint"
                );

                let checkpoint_started = Instant::now();
                if let Err(err) = self.verify_checkpoint(&checkpoint).await {
                    metrics::record_health_checkpoint(
                        checkpoint.layer,
                        checkpoint_started.elapsed().as_secs_f64(),
                        false,
                    );
                    error!(layer = %checkpoint.layer, error = %err, "Health checkpoint failed");

                    if !checkpoint.required {
                        warn!("Non-required checkpoint failed, continuing");
                        continue;
                    }

                    plan.mark_failed();
                    self.rollback(&executed, "checkpoint_failed").await;
                    metrics::record_plan_execution_end(
                        "failed",
                        layers_count,
                        started.elapsed().as_secs_f64(),
                    );
                    return ExecutionResult::failure(
                        format!("checkpoint failed: {err}"),
                        executed.len(),
                        Some(index),
                    );
                }
                metrics::record_health_checkpoint(
                    checkpoint.layer,
                    checkpoint_started.elapsed().as_secs_f64(),
                    true,
                );
            }
        }

        info!("Multi-layer remediation plan completed successfully");
        plan.mark_completed();
        metrics::record_plan_execution_end(
            "success",
            layers_count,
            started.elapsed().as_secs_f64(),
        );
        ExecutionResult::success(executed.len())
    }

    async fn execute_step(&self, step: &RemediationStep) -> Result<(), EngineError> {
        match step.layer {
            Layer::Infrastructure => self.execute_infrastructure_step(step),
            Layer::Platform => self.execute_platform_step(step),
            Layer::Application => self.execute_application_step(step).await,
        }
    }

    /// Infrastructure steps observe controller-driven operations; the actual
    /// remediation happens in the machine-config operator.
    #[allow(clippy::unused_self)]
    fn execute_infrastructure_step(&self, step: &RemediationStep) -> Result<(), EngineError> {
        match step.action_type.as_str() {
            "monitor_node_update" | "monitor_machineconfig" | "monitor_mcp" => {
                info!(target = %step.target, "Monitoring machine-config operation");
                Ok(())
            }
            other => {
                warn!(action = other, "Unknown infrastructure action type");
                Ok(())
            }
        }
    }

    #[allow(clippy::unused_self)]
    fn execute_platform_step(&self, step: &RemediationStep) -> Result<(), EngineError> {
        match step.action_type.as_str() {
            "trigger_operator_reconciliation" => {
                info!(target = %step.target, "Monitoring operator reconciliation");
                Ok(())
            }
            "monitor_clusteroperator" => {
                info!(target = %step.target, "Monitoring ClusterOperator status");
                Ok(())
            }
            other => {
                warn!(action = other, "Unknown platform action type");
                Ok(())
            }
        }
    }

    async fn execute_application_step(&self, step: &RemediationStep) -> Result<(), EngineError> {
        let (namespace, resource_name) = parse_target(&step.target)?;
        let resource_kind = kind_from_metadata(step);

        let issue = Issue {
            id: format!("step-{}", step.order),
            issue_type: issue_type_for_action(&step.action_type).to_string(),
            severity: "medium".to_string(),
            namespace: namespace.to_string(),
            resource_type: resource_kind.to_string(),
            resource_name: resource_name.to_string(),
            description: step.description.clone(),
            detected_at: Utc::now(),
        };

        let deployment_info = match self.resolver.resolve(namespace, resource_name, resource_kind).await
        {
            Ok(info) => info,
            Err(err) => {
                warn!(error = %err, "Failed to detect deployment method, using direct remediation");
                DeploymentInfo::new(
                    namespace,
                    resource_name,
                    resource_kind,
                    DeploymentMethod::Unknown,
                    0.5,
                )
            }
        };

        info!(
            namespace,
            resource = resource_name,
            kind = resource_kind,
            deployment_method = %deployment_info.method,
            "Executing application remediation"
        );

        self.selector.remediate(&deployment_info, &issue).await
    }

    async fn verify_checkpoint(&self, checkpoint: &HealthCheckpoint) -> Result<(), EngineError> {
        match timeout(checkpoint.timeout(), check_layer(self.health.as_ref(), checkpoint.layer))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout(format!(
                "health checkpoint for layer {} timed out after {}s",
                checkpoint.layer, checkpoint.timeout_seconds
            ))),
        }
    }

    /// Roll back the executed prefix in reverse order. Rollback errors are
    /// logged and never abort the loop.
    async fn rollback(&self, executed: &[RemediationStep], trigger_reason: &str) {
        warn!(steps = executed.len(), "Starting coordinated rollback");
        let started = Instant::now();

        for step in executed.iter().rev() {
            info!(step = step.order, layer = %step.layer, "Rolling back step");
            if let Err(err) = self.execute_rollback(step) {
                error!(step = step.order, error = %err, "Rollback step failed");
            }

            tokio::select! {
                () = sleep(ROLLBACK_PACING) => {}
                () = self.shutdown.cancelled() => break,
            }
        }

        metrics::record_rollback(trigger_reason, executed.len(), started.elapsed().as_secs_f64());
        info!("Coordinated rollback completed");
    }

    #[allow(clippy::unnecessary_wraps, clippy::unused_self)]
    fn execute_rollback(&self, step: &RemediationStep) -> Result<(), EngineError> {
        info!(
            action = format!("rollback_{}", step.action_type),
            target = %step.target,
            layer = %step.layer,
            "Executing rollback"
        );

        match step.layer {
            Layer::Application => {
                // Restart-style actions have no previous state to restore;
                // record that the change sticks.
                match step.action_type.as_str() {
                    "restart_deployment" | "restart_statefulset" | "restart_pod" => {
                        warn!(
                            target = %step.target,
                            action = %step.action_type,
                            "Cannot rollback restart operation, change is permanent"
                        );
                    }
                    other => warn!(action = other, "Unknown action type for rollback"),
                }
                Ok(())
            }
            Layer::Platform => {
                info!(target = %step.target, "Platform rollback handled by operator");
                Ok(())
            }
            Layer::Infrastructure => {
                info!(target = %step.target, "Infrastructure rollback handled by machine-config operator");
                Ok(())
            }
        }
    }
}

fn parse_target(target: &str) -> Result<(&str, &str), EngineError> {
    target
        .split_once('/')
        .filter(|(ns, name)| !ns.is_empty() && !name.is_empty())
        .ok_or_else(|| {
            EngineError::Validation(format!(
                "target must be in format 'namespace/name', got: {target}"
            ))
        })
}

fn kind_from_metadata(step: &RemediationStep) -> &'static str {
    if step.metadata.contains_key("deployment") {
        "Deployment"
    } else if step.metadata.contains_key("statefulset") {
        "StatefulSet"
    } else if step.metadata.contains_key("pod") {
        "Pod"
    } else {
        "Deployment"
    }
}

fn issue_type_for_action(action_type: &str) -> &'static str {
    match action_type {
        "restart_pod" => "pod_crash_loop",
        "restart_deployment" => "deployment_not_ready",
        "restart_statefulset" => "statefulset_not_ready",
        _ => "generic_issue",
    }
}
