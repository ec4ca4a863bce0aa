//! Remediation for operator-owned workloads: find the owning custom resource
//! and annotate it to force a reconcile.

use chrono::Utc;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, DynamicObject, ListParams, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::Client;
use serde_json::json;
use tracing::{debug, info, warn};

use super::Remediator;
use crate::error::{from_kube, EngineError};
use crate::models::{DeploymentInfo, DeploymentMethod, Issue};

/// Annotation written to the custom resource to force a reconcile.
pub const TRIGGER_ANNOTATION: &str = "remediation/trigger";
pub const TRIGGER_BY_ANNOTATION: &str = "remediation/trigger-by";
const TRIGGER_BY_VALUE: &str = "coordination-engine";

/// Built-in kinds that can never be the owning custom resource.
const BUILT_IN_KINDS: &[&str] = &[
    "Pod",
    "Deployment",
    "ReplicaSet",
    "StatefulSet",
    "DaemonSet",
    "Service",
    "ConfigMap",
    "Secret",
    "PersistentVolumeClaim",
    "Job",
    "CronJob",
    "Ingress",
    "NetworkPolicy",
];

/// Identity of the custom resource owning a workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomResourceRef {
    pub kind: String,
    pub name: String,
    pub api_version: String,
    pub group: String,
    pub version: String,
    pub resource: String,
}

/// Remediates operator-managed workloads by patching a reconcile-trigger
/// annotation onto the owning custom resource.
///
/// Owner walking is bounded to one hop: the target's direct owners, or for an
/// ownerless Deployment, the owners of its first matching pod.
pub struct ControllerResourceRemediator {
    client: Client,
}

impl ControllerResourceRemediator {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn find_owning_cr(
        &self,
        namespace: &str,
        resource_name: &str,
        resource_kind: &str,
    ) -> Result<Option<CustomResourceRef>, EngineError> {
        debug!(namespace, resource = resource_name, resource_kind, "Looking for owning custom resource");

        match resource_kind {
            "Deployment" | "deployment" => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
                let deployment = api.get(resource_name).await.map_err(|err| {
                    from_kube(&format!("failed to get deployment {namespace}/{resource_name}"), err)
                })?;

                let owners = deployment.metadata.owner_references.unwrap_or_default();
                if let Some(cr) = extract_cr_from_owner_refs(&owners) {
                    return Ok(Some(cr));
                }

                // An ownerless Deployment may still belong to an operator that
                // owns its pods directly.
                let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
                let selector = format!("app={resource_name}");
                let list = match pods.list(&ListParams::default().labels(&selector)).await {
                    Ok(list) => list,
                    Err(err) => {
                        warn!(error = %err, "Failed to list pods, checking deployment owner refs only");
                        return Ok(None);
                    }
                };
                if let Some(pod) = list.items.first() {
                    let owners = pod.metadata.owner_references.clone().unwrap_or_default();
                    return Ok(extract_cr_from_owner_refs(&owners));
                }
                Ok(None)
            }
            "Pod" | "pod" => {
                let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
                let pod = api.get(resource_name).await.map_err(|err| {
                    from_kube(&format!("failed to get pod {namespace}/{resource_name}"), err)
                })?;
                let owners = pod.metadata.owner_references.unwrap_or_default();
                Ok(extract_cr_from_owner_refs(&owners))
            }
            other => {
                warn!(resource_kind = other, "Unsupported resource kind for custom resource lookup");
                Err(EngineError::Validation(format!(
                    "unsupported resource kind for custom resource lookup: {other}"
                )))
            }
        }
    }

    async fn trigger_reconciliation(
        &self,
        cr: &CustomResourceRef,
        namespace: &str,
    ) -> Result<(), EngineError> {
        let resource = ApiResource {
            group: cr.group.clone(),
            version: cr.version.clone(),
            api_version: cr.api_version.clone(),
            kind: cr.kind.clone(),
            plural: cr.resource.clone(),
        };
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &resource);

        info!(
            cr_name = %cr.name,
            namespace,
            gvr = format!("{}/{}/{}", cr.group, cr.version, cr.resource),
            "Updating custom resource to trigger reconciliation"
        );

        // Confirm the target exists before patching so a bad pluralisation
        // surfaces as NotFound instead of a silent created-on-patch object.
        api.get(&cr.name).await.map_err(|err| {
            from_kube(&format!("failed to get custom resource {}/{}", namespace, cr.name), err)
        })?;

        let timestamp = Utc::now().timestamp().to_string();
        let patch = json!({
            "metadata": {
                "annotations": {
                    TRIGGER_ANNOTATION: timestamp,
                    TRIGGER_BY_ANNOTATION: TRIGGER_BY_VALUE,
                }
            }
        });

        debug!(cr_name = %cr.name, timestamp = %timestamp, "Applying merge patch to custom resource");
        api.patch(&cr.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|err| from_kube("failed to patch custom resource", err))?;

        info!(cr_name = %cr.name, reconciliation_time = %timestamp, "Custom resource annotated, operator should reconcile");
        Ok(())
    }
}

#[async_trait]
impl Remediator for ControllerResourceRemediator {
    async fn remediate(&self, info: &DeploymentInfo, issue: &Issue) -> Result<(), EngineError> {
        let operator = match info.detail("operator") {
            "" => info.detail("managed_by"),
            op => op,
        };

        info!(
            operator,
            namespace = %issue.namespace,
            resource = %issue.resource_name,
            resource_type = %issue.resource_type,
            method = "controller-managed",
            "Starting controller remediation"
        );

        let cr = self
            .find_owning_cr(&issue.namespace, &issue.resource_name, &issue.resource_type)
            .await?
            .ok_or_else(|| {
                warn!("No owning custom resource found, cannot trigger reconciliation");
                EngineError::NotFound(format!(
                    "no owning custom resource found for {}/{}",
                    issue.namespace, issue.resource_name
                ))
            })?;

        info!(
            cr_kind = %cr.kind,
            cr_name = %cr.name,
            cr_api_version = %cr.api_version,
            "Found owning custom resource"
        );

        self.trigger_reconciliation(&cr, &issue.namespace).await?;
        info!(cr_name = %cr.name, "Operator reconciliation triggered successfully");
        Ok(())
    }

    fn can_handle(&self, info: &DeploymentInfo) -> bool {
        info.method == DeploymentMethod::ControllerManaged
    }

    fn name(&self) -> &'static str {
        "controller-resource"
    }
}

/// Pick the first non-built-in owner as the custom resource.
fn extract_cr_from_owner_refs(owners: &[OwnerReference]) -> Option<CustomResourceRef> {
    for owner in owners {
        if BUILT_IN_KINDS.contains(&owner.kind.as_str()) {
            continue;
        }
        debug!(kind = %owner.kind, name = %owner.name, api_version = %owner.api_version, "Found custom resource owner");

        let (group, version) = parse_api_version(&owner.api_version);
        return Some(CustomResourceRef {
            kind: owner.kind.clone(),
            name: owner.name.clone(),
            api_version: owner.api_version.clone(),
            group: group.to_string(),
            version: version.to_string(),
            resource: infer_resource_name(&owner.kind),
        });
    }
    None
}

/// Split `group/version`; a bare version means the core group.
fn parse_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

/// Lowercase the kind and append `s`.
///
/// Known limitation: wrong for kinds with irregular plurals (Ingress →
/// ingresses); resolving `kind → resource` through API discovery would be
/// exact. The existence check before patching keeps a bad guess from doing
/// damage.
fn infer_resource_name(kind: &str) -> String {
    let mut resource = kind.to_lowercase();
    resource.push('s');
    resource
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(kind: &str, name: &str, api_version: &str) -> OwnerReference {
        OwnerReference {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            uid: "uid-1".to_string(),
            ..OwnerReference::default()
        }
    }

    #[test]
    fn skips_built_in_owners() {
        let owners = vec![
            owner("ReplicaSet", "app-5c9f", "apps/v1"),
            owner("Prometheus", "main", "monitoring.coreos.com/v1"),
        ];
        let cr = extract_cr_from_owner_refs(&owners).unwrap();
        assert_eq!(cr.kind, "Prometheus");
        assert_eq!(cr.group, "monitoring.coreos.com");
        assert_eq!(cr.version, "v1");
        assert_eq!(cr.resource, "prometheuss");
    }

    #[test]
    fn only_built_in_owners_yields_none() {
        let owners = vec![owner("ReplicaSet", "app-5c9f", "apps/v1")];
        assert!(extract_cr_from_owner_refs(&owners).is_none());
    }

    #[test]
    fn parses_core_group_api_version() {
        assert_eq!(parse_api_version("v1"), ("", "v1"));
        assert_eq!(parse_api_version("apps/v1"), ("apps", "v1"));
    }

    #[test]
    fn pluralisation_is_naive_by_contract() {
        assert_eq!(infer_resource_name("Kafka"), "kafkas");
        assert_eq!(infer_resource_name("EtcdCluster"), "etcdclusters");
        // Wrong for irregular plurals, by documented limitation.
        assert_eq!(infer_resource_name("Ingress"), "ingresss");
    }
}
