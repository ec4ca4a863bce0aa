//! Remediation for releases installed by the templated release tool,
//! operated through its local CLI.

use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::Remediator;
use crate::error::EngineError;
use crate::models::{DeploymentInfo, DeploymentMethod, Issue};

const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(300);
const STATUS_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Release status as reported by `helm status -o json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseStatus {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub info: ReleaseInfo,
    #[serde(default)]
    pub version: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReleaseInfo {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub description: String,
}

/// Remediates template-tool releases: broken releases roll back to the
/// previous revision, deployed-but-unhealthy releases get an atomic upgrade
/// that reuses the previous values.
pub struct TemplateToolRemediator {
    cli: String,
    operation_timeout: Duration,
}

impl Default for TemplateToolRemediator {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateToolRemediator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cli: "helm".to_string(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Override the CLI binary, used by tests to substitute a stub.
    #[must_use]
    pub fn with_cli(mut self, cli: &str) -> Self {
        self.cli = cli.to_string();
        self
    }

    async fn release_status(
        &self,
        release: &str,
        namespace: &str,
    ) -> Result<ReleaseStatus, EngineError> {
        let output = timeout(
            STATUS_PROBE_TIMEOUT,
            Command::new(&self.cli)
                .args(["status", release, "-n", namespace, "-o", "json"])
                .output(),
        )
        .await
        .map_err(|_| EngineError::Timeout(format!("status probe for release {release} timed out")))?
        .map_err(|err| EngineError::upstream("status command failed to start", err))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(release, stderr = %stderr, "Release status command failed");
            return Err(EngineError::upstream(
                "release status command failed",
                anyhow!("{stderr}"),
            ));
        }

        serde_json::from_slice(&output.stdout).map_err(|err| {
            error!(release, "Failed to parse release status JSON");
            EngineError::upstream("failed to parse release status output", err)
        })
    }

    async fn rollback_release(&self, release: &str, namespace: &str) -> Result<(), EngineError> {
        let timeout_arg = format!("{}s", self.operation_timeout.as_secs());
        let output = timeout(
            self.operation_timeout,
            Command::new(&self.cli)
                .args([
                    "rollback",
                    release,
                    "-n",
                    namespace,
                    "--wait",
                    "--timeout",
                    &timeout_arg,
                ])
                .output(),
        )
        .await
        .map_err(|_| EngineError::Timeout(format!("rollback of release {release} timed out")))?
        .map_err(|err| EngineError::upstream("rollback command failed to start", err))?;

        let combined = String::from_utf8_lossy(&output.stdout).to_string()
            + &String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            error!(release, output = %combined, "Release rollback failed");
            return Err(EngineError::upstream("release rollback failed", anyhow!("{combined}")));
        }

        info!(release, "Release rollback completed");
        Ok(())
    }

    async fn upgrade_release(
        &self,
        release: &str,
        namespace: &str,
        info: &DeploymentInfo,
    ) -> Result<(), EngineError> {
        let chart = match info.detail("chart") {
            "" => {
                warn!(release, "Chart name not found, using release name");
                release.to_string()
            }
            chart => chart.to_string(),
        };

        let timeout_arg = format!("{}s", self.operation_timeout.as_secs());
        debug!(release, chart = %chart, "Executing release upgrade");

        // --reuse-values re-applies the previous configuration; --atomic rolls
        // the release back automatically when the upgrade fails.
        let output = timeout(
            self.operation_timeout,
            Command::new(&self.cli)
                .args([
                    "upgrade",
                    release,
                    &chart,
                    "-n",
                    namespace,
                    "--reuse-values",
                    "--atomic",
                    "--wait",
                    "--timeout",
                    &timeout_arg,
                ])
                .output(),
        )
        .await
        .map_err(|_| EngineError::Timeout(format!("upgrade of release {release} timed out")))?
        .map_err(|err| EngineError::upstream("upgrade command failed to start", err))?;

        let combined = String::from_utf8_lossy(&output.stdout).to_string()
            + &String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            error!(release, chart = %chart, output = %combined, "Release upgrade failed");
            return Err(EngineError::upstream("release upgrade failed", anyhow!("{combined}")));
        }

        info!(release, chart = %chart, "Release upgrade completed");
        Ok(())
    }
}

#[async_trait]
impl Remediator for TemplateToolRemediator {
    async fn remediate(&self, info: &DeploymentInfo, issue: &Issue) -> Result<(), EngineError> {
        let release = info.detail("release_name");
        if release.is_empty() {
            return Err(EngineError::Validation(
                "release name not found in deployment info".into(),
            ));
        }

        let namespace = match info.detail("release_namespace") {
            "" => info.namespace.as_str(),
            ns => ns,
        };

        info!(
            release,
            namespace,
            issue_type = %issue.issue_type,
            resource = %issue.resource_name,
            method = "template-tool",
            "Starting template-tool remediation"
        );

        let status = self.release_status(release, namespace).await?;
        info!(
            release,
            status = %status.info.status,
            version = status.version,
            "Current release status"
        );

        if matches!(status.info.status.as_str(), "failed" | "superseded" | "pending-upgrade") {
            info!(release, status = %status.info.status, "Rolling back release");
            self.rollback_release(release, namespace).await?;
            info!(release, "Release rollback completed successfully");
            return Ok(());
        }

        info!(release, issue_type = %issue.issue_type, "Triggering release upgrade to remediate issue");
        if let Err(upgrade_err) = self.upgrade_release(release, namespace, info).await {
            warn!(release, error = %upgrade_err, "Release upgrade failed, attempting rollback");
            if let Err(rollback_err) = self.rollback_release(release, namespace).await {
                return Err(EngineError::upstream(
                    "release upgrade failed and rollback also failed",
                    anyhow!("upgrade: {upgrade_err}; rollback: {rollback_err}"),
                ));
            }
            return Err(EngineError::upstream(
                "release upgrade failed (rolled back)",
                anyhow!("{upgrade_err}"),
            ));
        }

        info!(release, "Template-tool remediation completed successfully");
        Ok(())
    }

    fn can_handle(&self, info: &DeploymentInfo) -> bool {
        info.method == DeploymentMethod::TemplateTool
    }

    fn name(&self) -> &'static str {
        "template-tool"
    }
}
