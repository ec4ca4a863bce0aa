//! Single-workflow remediation: detect the deployment method, route through
//! the strategy selector, track the workflow in an in-memory registry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::Remediator;
use crate::detector::MethodResolver;
use crate::error::EngineError;
use crate::metrics;
use crate::models::{DeploymentInfo, DeploymentMethod, Issue, Workflow, WorkflowStatus};

/// Owns single-issue remediation workflows for the process lifetime.
pub struct RemediationEngine {
    detector: Arc<dyn MethodResolver>,
    remediator: Arc<dyn Remediator>,
    workflows: RwLock<HashMap<String, Workflow>>,
    shutdown: CancellationToken,
}

impl RemediationEngine {
    #[must_use]
    pub fn new(
        detector: Arc<dyn MethodResolver>,
        remediator: Arc<dyn Remediator>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            detector,
            remediator,
            workflows: RwLock::new(HashMap::new()),
            shutdown,
        }
    }

    /// Validate the issue, classify the workload, store a pending workflow
    /// and spawn its background execution. Returns the stored workflow
    /// immediately.
    ///
    /// # Errors
    ///
    /// `Validation` when the issue is malformed.
    pub async fn trigger(
        self: &Arc<Self>,
        incident_id: &str,
        issue: Issue,
    ) -> Result<Workflow, EngineError> {
        info!(
            incident_id,
            issue_type = %issue.issue_type,
            namespace = %issue.namespace,
            resource = %issue.resource_name,
            "Triggering remediation workflow"
        );

        issue.validate()?;

        let deployment_info = match self.detect(&issue).await {
            Ok(info) => info,
            Err(err) => {
                warn!(error = %err, "Failed to detect deployment method, using direct remediation");
                DeploymentInfo::new(
                    &issue.namespace,
                    &issue.resource_name,
                    &issue.resource_type,
                    DeploymentMethod::Unknown,
                    0.5,
                )
            }
        };

        let mut workflow = Workflow {
            id: format!("wf-{}", short_id()),
            incident_id: incident_id.to_string(),
            status: WorkflowStatus::Pending,
            deployment_method: deployment_info.method.as_str().to_string(),
            namespace: issue.namespace.clone(),
            resource_name: issue.resource_name.clone(),
            resource_kind: issue.resource_type.clone(),
            issue_type: issue.issue_type.clone(),
            remediator: String::new(),
            error_message: String::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            steps: Vec::new(),
        };
        workflow.add_step(&format!(
            "Detect deployment method for {}/{}",
            issue.namespace, issue.resource_name
        ));

        self.save(workflow.clone());

        let engine = self.clone();
        let stored = workflow.clone();
        tokio::spawn(async move {
            engine.execute(workflow, deployment_info, issue).await;
        });

        Ok(stored)
    }

    /// Fetch one workflow.
    ///
    /// # Errors
    ///
    /// `NotFound` when no workflow has the id.
    pub fn workflow(&self, id: &str) -> Result<Workflow, EngineError> {
        self.workflows
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("workflow not found: {id}")))
    }

    /// All workflows, unordered.
    #[must_use]
    pub fn list_workflows(&self) -> Vec<Workflow> {
        self.workflows
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    async fn detect(&self, issue: &Issue) -> Result<DeploymentInfo, EngineError> {
        // Pods route through deployment detection; the owner is what gets
        // remediated.
        let kind = match issue.resource_type.as_str() {
            "statefulset" | "StatefulSet" => "StatefulSet",
            "daemonset" | "DaemonSet" => "DaemonSet",
            _ => "Deployment",
        };
        self.detector.resolve(&issue.namespace, &issue.resource_name, kind).await
    }

    async fn execute(&self, mut workflow: Workflow, deployment_info: DeploymentInfo, issue: Issue) {
        info!(workflow_id = %workflow.id, "Starting workflow execution");
        metrics::record_workflow_start();

        workflow.status = WorkflowStatus::InProgress;
        let started = Utc::now();
        workflow.started_at = Some(started);

        let step_order = workflow.add_step(&format!(
            "Execute {} remediation for {}",
            self.remediator.name(),
            issue.issue_type
        ));
        workflow.remediator = self.remediator.name().to_string();
        workflow.steps[step_order].status = "running".to_string();
        workflow.steps[step_order].started_at = Some(Utc::now());
        self.save(workflow.clone());

        let result = tokio::select! {
            res = self.remediator.remediate(&deployment_info, &issue) => res,
            () = self.shutdown.cancelled() => {
                Err(EngineError::Internal("context cancelled".into()))
            }
        };

        let completed = Utc::now();
        workflow.completed_at = Some(completed);
        let duration_secs = (completed - started).num_milliseconds() as f64 / 1000.0;
        let method = deployment_info.method.as_str();

        match result {
            Ok(()) => {
                info!(workflow_id = %workflow.id, "Remediation completed successfully");
                workflow.status = WorkflowStatus::Completed;
                workflow.steps[step_order].status = "completed".to_string();
                workflow.steps[step_order].completed_at = Some(completed);

                metrics::record_remediation(
                    self.remediator.name(),
                    method,
                    &issue.issue_type,
                    duration_secs,
                    true,
                );
                metrics::record_workflow_end("completed");
            }
            Err(err) => {
                error!(workflow_id = %workflow.id, error = %err, "Remediation failed");
                workflow.status = WorkflowStatus::Failed;
                workflow.error_message = err.to_string();
                workflow.steps[step_order].status = "failed".to_string();
                workflow.steps[step_order].error_message = err.to_string();

                metrics::record_remediation(
                    self.remediator.name(),
                    method,
                    &issue.issue_type,
                    duration_secs,
                    false,
                );
                metrics::record_remediation_failure(
                    self.remediator.name(),
                    method,
                    &issue.issue_type,
                    failure_reason(&err),
                );
                metrics::record_workflow_end("failed");
            }
        }

        self.save(workflow.clone());
        info!(
            workflow_id = %workflow.id,
            status = workflow.status.as_str(),
            duration_secs,
            "Workflow execution completed"
        );
    }

    fn save(&self, workflow: Workflow) {
        self.workflows
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(workflow.id.clone(), workflow);
    }
}

fn failure_reason(err: &EngineError) -> &'static str {
    match err {
        EngineError::Validation(_) => "validation",
        EngineError::NotFound(_) => "not_found",
        EngineError::Upstream { .. } => "upstream",
        EngineError::Timeout(_) => "timeout",
        EngineError::ManualIntervention(_) => "manual_intervention",
        EngineError::Internal(_) => "internal",
    }
}

fn short_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    struct FakeResolver {
        method: DeploymentMethod,
        fail: bool,
    }

    #[async_trait]
    impl MethodResolver for FakeResolver {
        async fn resolve(
            &self,
            namespace: &str,
            name: &str,
            kind: &str,
        ) -> Result<DeploymentInfo, EngineError> {
            if self.fail {
                return Err(EngineError::NotFound("no such resource".into()));
            }
            Ok(DeploymentInfo::new(
                namespace,
                name,
                kind,
                self.method,
                self.method.canonical_confidence(),
            ))
        }
    }

    struct FakeRemediator {
        result: fn() -> Result<(), EngineError>,
    }

    #[async_trait]
    impl Remediator for FakeRemediator {
        async fn remediate(&self, _info: &DeploymentInfo, _issue: &Issue) -> Result<(), EngineError> {
            (self.result)()
        }

        fn can_handle(&self, _info: &DeploymentInfo) -> bool {
            true
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    fn issue() -> Issue {
        Issue {
            id: "inc-1".into(),
            issue_type: "CrashLoopBackOff".into(),
            severity: "high".into(),
            namespace: "default".into(),
            resource_type: "Deployment".into(),
            resource_name: "test-app".into(),
            description: "crash looping".into(),
            detected_at: Utc::now(),
        }
    }

    fn engine(
        method: DeploymentMethod,
        detect_fails: bool,
        result: fn() -> Result<(), EngineError>,
    ) -> Arc<RemediationEngine> {
        Arc::new(RemediationEngine::new(
            Arc::new(FakeResolver { method, fail: detect_fails }),
            Arc::new(FakeRemediator { result }),
            CancellationToken::new(),
        ))
    }

    async fn wait_terminal(engine: &RemediationEngine, id: &str) -> Workflow {
        for _ in 0..200 {
            let wf = engine.workflow(id).unwrap();
            if !wf.is_active() {
                return wf;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("workflow {id} never reached a terminal state");
    }

    #[tokio::test]
    async fn successful_remediation_completes_workflow() {
        let engine = engine(DeploymentMethod::GitOps, false, || Ok(()));
        let wf = engine.trigger("inc-1", issue()).await.unwrap();
        assert_eq!(wf.status, WorkflowStatus::Pending);
        assert_eq!(wf.deployment_method, "gitops");

        let done = wait_terminal(&engine, &wf.id).await;
        assert_eq!(done.status, WorkflowStatus::Completed);
        assert_eq!(done.remediator, "fake");
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn manual_intervention_fails_workflow_with_message() {
        let engine = engine(DeploymentMethod::Direct, false, || {
            Err(EngineError::ManualIntervention(
                "ImagePullBackOff requires manual intervention".into(),
            ))
        });
        let wf = engine.trigger("inc-2", issue()).await.unwrap();
        let done = wait_terminal(&engine, &wf.id).await;
        assert_eq!(done.status, WorkflowStatus::Failed);
        assert!(done.error_message.contains("manual intervention"));
    }

    #[tokio::test]
    async fn detection_failure_degrades_to_unknown() {
        let engine = engine(DeploymentMethod::GitOps, true, || Ok(()));
        let wf = engine.trigger("inc-3", issue()).await.unwrap();
        assert_eq!(wf.deployment_method, "unknown");
        wait_terminal(&engine, &wf.id).await;
    }

    #[tokio::test]
    async fn duplicate_triggers_produce_distinct_workflows() {
        let engine = engine(DeploymentMethod::GitOps, false, || Ok(()));
        let a = engine.trigger("inc-4", issue()).await.unwrap();
        let b = engine.trigger("inc-4", issue()).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(engine.list_workflows().len(), 2);
    }

    #[tokio::test]
    async fn invalid_issue_is_rejected() {
        let engine = engine(DeploymentMethod::GitOps, false, || Ok(()));
        let mut bad = issue();
        bad.namespace.clear();
        let err = engine.trigger("inc-5", bad).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_workflow_is_not_found() {
        let engine = engine(DeploymentMethod::GitOps, false, || Ok(()));
        assert!(engine.workflow("wf-missing").unwrap_err().is_not_found());
    }

    #[test]
    fn short_ids_are_eight_chars() {
        let id = short_id();
        assert_eq!(id.len(), 8);
        assert_ne!(short_id(), short_id());
    }

    #[test]
    fn failure_reasons_cover_taxonomy() {
        assert_eq!(failure_reason(&EngineError::Validation(String::new())), "validation");
        assert_eq!(
            failure_reason(&EngineError::ManualIntervention(String::new())),
            "manual_intervention"
        );
        assert_eq!(failure_reason(&EngineError::Timeout(String::new())), "timeout");
    }
}
