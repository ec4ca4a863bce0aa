//! Remediation for hand-applied workloads, acting directly on the cluster
//! API: restart deployments by annotation, delete pods, or refuse and ask
//! for a human.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::Client;
use serde_json::json;
use tracing::{info, warn};

use super::Remediator;
use crate::error::{from_kube, EngineError};
use crate::models::{DeploymentInfo, DeploymentMethod, Issue};

/// Pod-template annotation stamped to force a rollout.
pub const RESTARTED_AT_ANNOTATION: &str = "remediation/restarted-at";

/// Direct cluster-API remediation for hand-applied (or unclassifiable)
/// workloads, dispatching on the issue type.
pub struct DirectRemediator {
    client: Client,
}

impl DirectRemediator {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn is_deployment(resource_type: &str) -> bool {
        resource_type.eq_ignore_ascii_case("deployment")
    }

    async fn remediate_crash_loop(&self, issue: &Issue) -> Result<(), EngineError> {
        info!(namespace = %issue.namespace, resource = %issue.resource_name, "Remediating crash loop");
        if Self::is_deployment(&issue.resource_type) {
            return self.restart_deployment(&issue.namespace, &issue.resource_name).await;
        }
        self.delete_pod(&issue.namespace, &issue.resource_name).await?;
        info!("Pod deleted, its controller will recreate it");
        Ok(())
    }

    async fn remediate_image_pull(&self, issue: &Issue) -> Result<(), EngineError> {
        warn!(
            namespace = %issue.namespace,
            pod = %issue.resource_name,
            "ImagePullBackOff detected: checking image and credentials"
        );

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &issue.namespace);
        let pod = pods.get(&issue.resource_name).await.map_err(|err| {
            from_kube(&format!("failed to get pod {}/{}", issue.namespace, issue.resource_name), err)
        })?;

        for container in pod.spec.map(|s| s.containers).unwrap_or_default() {
            info!(
                container = %container.name,
                image = container.image.as_deref().unwrap_or(""),
                "Container image details"
            );
        }

        warn!("ImagePullBackOff requires manual intervention: check image availability and credentials");
        Err(EngineError::ManualIntervention(
            "ImagePullBackOff requires manual intervention: verify image exists and pull secrets are configured"
                .into(),
        ))
    }

    async fn remediate_oom(&self, issue: &Issue) -> Result<(), EngineError> {
        warn!(
            namespace = %issue.namespace,
            pod = %issue.resource_name,
            "OOMKilled detected: considering memory limit increase"
        );

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &issue.namespace);
        let pod = pods.get(&issue.resource_name).await.map_err(|err| {
            from_kube(&format!("failed to get pod {}/{}", issue.namespace, issue.resource_name), err)
        })?;

        for container in pod.spec.map(|s| s.containers).unwrap_or_default() {
            let resources = container.resources.unwrap_or_default();
            let limit = resources
                .limits
                .as_ref()
                .and_then(|l| l.get("memory"))
                .map(|q| q.0.clone())
                .unwrap_or_default();
            let request = resources
                .requests
                .as_ref()
                .and_then(|r| r.get("memory"))
                .map(|q| q.0.clone())
                .unwrap_or_default();
            info!(
                container = %container.name,
                memory_limit = %limit,
                memory_request = %request,
                "Current container resource limits"
            );
        }

        self.delete_pod(&issue.namespace, &issue.resource_name).await?;
        warn!("Pod deleted, but OOM may recur without a memory limit increase");
        Ok(())
    }

    async fn remediate_generic(&self, issue: &Issue) -> Result<(), EngineError> {
        info!(
            namespace = %issue.namespace,
            resource = %issue.resource_name,
            issue_type = %issue.issue_type,
            "Generic remediation: restarting resource"
        );
        if Self::is_deployment(&issue.resource_type) {
            return self.restart_deployment(&issue.namespace, &issue.resource_name).await;
        }
        self.delete_pod(&issue.namespace, &issue.resource_name).await?;
        info!("Pod deleted for restart");
        Ok(())
    }

    /// Stamp a restarted-at annotation on the pod template to roll the
    /// deployment without touching its spec.
    async fn restart_deployment(&self, namespace: &str, name: &str) -> Result<(), EngineError> {
        info!(namespace, deployment = name, "Restarting deployment");

        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({
            "spec": {
                "template": {
                    "metadata": {
                        "annotations": {
                            RESTARTED_AT_ANNOTATION: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                        }
                    }
                }
            }
        });

        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|err| from_kube(&format!("failed to restart deployment {namespace}/{name}"), err))?;

        info!("Deployment restart triggered");
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), EngineError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        pods.delete(name, &DeleteParams::default())
            .await
            .map_err(|err| from_kube(&format!("failed to delete pod {namespace}/{name}"), err))?;
        Ok(())
    }
}

#[async_trait]
impl Remediator for DirectRemediator {
    async fn remediate(&self, _info: &DeploymentInfo, issue: &Issue) -> Result<(), EngineError> {
        info!(
            namespace = %issue.namespace,
            resource = %issue.resource_name,
            resource_type = %issue.resource_type,
            issue_type = %issue.issue_type,
            "Starting direct remediation"
        );

        match issue.issue_type.to_lowercase().as_str() {
            "crashloopbackoff" | "pod_crash_loop" => self.remediate_crash_loop(issue).await,
            "imagepullbackoff" => self.remediate_image_pull(issue).await,
            "oomkilled" => self.remediate_oom(issue).await,
            _ => self.remediate_generic(issue).await,
        }
    }

    fn can_handle(&self, info: &DeploymentInfo) -> bool {
        matches!(info.method, DeploymentMethod::Direct | DeploymentMethod::Unknown)
    }

    fn name(&self) -> &'static str {
        "direct"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deployment_kind_check_is_case_insensitive() {
        assert!(DirectRemediator::is_deployment("Deployment"));
        assert!(DirectRemediator::is_deployment("deployment"));
        assert!(!DirectRemediator::is_deployment("Pod"));
    }
}
