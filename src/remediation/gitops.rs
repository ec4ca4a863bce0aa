//! Remediation for GitOps-managed workloads: trigger a sync and wait.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::Remediator;
use crate::error::EngineError;
use crate::integrations::{GitOpsClient, SyncRequest};
use crate::models::{DeploymentInfo, DeploymentMethod, Issue};

const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(300);

/// Remediates by asking the GitOps controller to re-sync the owning
/// application, which re-applies the declared state from Git.
pub struct GitOpsRemediator {
    client: Arc<GitOpsClient>,
    sync_timeout: Duration,
}

impl GitOpsRemediator {
    #[must_use]
    pub fn new(client: Arc<GitOpsClient>) -> Self {
        Self {
            client,
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    async fn resolve_app_name(
        &self,
        info: &DeploymentInfo,
        issue: &Issue,
    ) -> Result<String, EngineError> {
        let app_name = info.detail("argocd_app");
        if !app_name.is_empty() {
            return Ok(app_name.to_string());
        }
        let app = self
            .client
            .find_application_by_resource(&issue.namespace, &issue.resource_name)
            .await?;
        Ok(app.metadata.name)
    }
}

#[async_trait]
impl Remediator for GitOpsRemediator {
    async fn remediate(&self, info: &DeploymentInfo, issue: &Issue) -> Result<(), EngineError> {
        info!(
            namespace = %issue.namespace,
            resource = %issue.resource_name,
            issue_type = %issue.issue_type,
            method = "gitops",
            "Starting GitOps remediation"
        );

        let app_name = self.resolve_app_name(info, issue).await?;
        info!(app_name = %app_name, "Found GitOps application");

        let app = self.client.get_application(&app_name).await?;
        info!(
            app_name = %app_name,
            sync_status = %app.status.sync.status,
            health_status = %app.status.health.status,
            "Current application status"
        );

        // Pruning is never enabled from here; a sync that deletes resources
        // is a human decision.
        let sync = SyncRequest::default();
        self.client.sync_application(&app_name, &sync).await?;

        self.client.wait_for_sync(&app_name, self.sync_timeout).await?;
        info!(app_name = %app_name, "GitOps remediation completed successfully");
        Ok(())
    }

    fn can_handle(&self, info: &DeploymentInfo) -> bool {
        info.method == DeploymentMethod::GitOps
    }

    fn name(&self) -> &'static str {
        "gitops"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn remediator() -> GitOpsRemediator {
        let client = GitOpsClient::new("http://localhost:1", None, Duration::from_secs(1)).unwrap();
        GitOpsRemediator::new(Arc::new(client))
    }

    fn info(method: DeploymentMethod) -> DeploymentInfo {
        DeploymentInfo::new("default", "test-app", "Deployment", method, method.canonical_confidence())
    }

    #[test]
    fn handles_only_gitops() {
        let r = remediator();
        assert!(r.can_handle(&info(DeploymentMethod::GitOps)));
        assert!(!r.can_handle(&info(DeploymentMethod::TemplateTool)));
        assert!(!r.can_handle(&info(DeploymentMethod::Direct)));
    }

    #[tokio::test]
    async fn resolves_app_name_from_details() {
        let r = remediator();
        let mut i = info(DeploymentMethod::GitOps);
        i.set_detail("argocd_app", "billing");
        let issue = Issue {
            id: "i1".into(),
            issue_type: "CrashLoopBackOff".into(),
            severity: "high".into(),
            namespace: "default".into(),
            resource_type: "Deployment".into(),
            resource_name: "test-app".into(),
            description: String::new(),
            detected_at: Utc::now(),
        };
        assert_eq!(r.resolve_app_name(&i, &issue).await.unwrap(), "billing");
    }
}
