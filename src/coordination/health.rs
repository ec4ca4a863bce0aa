//! Layer-scoped health verification used at checkpoint boundaries.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolume, Pod, Service};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{Api, DynamicObject, ListParams};
use kube::discovery::ApiResource;
use kube::Client;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{from_kube, EngineError};
use crate::integrations::McoClient;
use crate::models::Layer;

/// The probes behind each checkpoint, one method per layer. Probes run
/// serially; the first failure short-circuits with a descriptive error.
#[async_trait]
pub trait HealthProbes: Send + Sync {
    async fn check_infrastructure(&self) -> Result<(), EngineError>;
    async fn check_platform(&self) -> Result<(), EngineError>;
    async fn check_application(&self) -> Result<(), EngineError>;
}

/// Object-safe alias used by the orchestrator.
pub type HealthChecker = dyn HealthProbes;

/// Probes layer health against the live cluster.
///
/// Custom-resource probes (machine-config pools, cluster operators) are
/// no-ops on clusters that do not serve those APIs.
pub struct KubeHealthChecker {
    client: Client,
    mco: McoClient,
    platform_namespace: String,
}

fn clusteroperator_api_resource() -> ApiResource {
    ApiResource {
        group: "config.openshift.io".to_string(),
        version: "v1".to_string(),
        api_version: "config.openshift.io/v1".to_string(),
        kind: "ClusterOperator".to_string(),
        plural: "clusteroperators".to_string(),
    }
}

impl KubeHealthChecker {
    #[must_use]
    pub fn new(client: Client, platform_namespace: &str) -> Self {
        Self {
            mco: McoClient::new(client.clone()),
            client,
            platform_namespace: platform_namespace.to_string(),
        }
    }

    async fn check_nodes_ready(&self) -> Result<(), EngineError> {
        let nodes: Api<k8s_openapi::api::core::v1::Node> = Api::all(self.client.clone());
        let list = nodes
            .list(&ListParams::default())
            .await
            .map_err(|err| from_kube("failed to list nodes", err))?;

        let mut not_ready = 0;
        for node in &list.items {
            let ready = node
                .status
                .as_ref()
                .and_then(|s| s.conditions.as_ref())
                .is_some_and(|conds| {
                    conds.iter().any(|c| c.type_ == "Ready" && c.status == "True")
                });
            if !ready {
                not_ready += 1;
                warn!(node = node.metadata.name.as_deref().unwrap_or(""), "Node is not ready");
            }
        }

        if not_ready > 0 {
            return Err(EngineError::upstream(
                "infrastructure health",
                anyhow::anyhow!("{not_ready} node(s) are not ready"),
            ));
        }
        debug!(nodes = list.items.len(), "All nodes are ready");
        Ok(())
    }

    async fn check_pools_stable(&self) -> Result<(), EngineError> {
        // Pool resources only exist behind the machine-config operator.
        let pools = match self.mco.list_pools().await {
            Ok(pools) => pools,
            Err(err) => {
                debug!(error = %err, "Failed to list machine-config pools (API may be absent)");
                return Ok(());
            }
        };

        let mut degraded = 0;
        for pool in &pools {
            match self.mco.pool_status(pool).await {
                Ok(status) if status.degraded => {
                    degraded += 1;
                    warn!(pool = %pool, "MachineConfigPool is degraded");
                }
                Ok(_) => {}
                Err(err) => {
                    debug!(pool = %pool, error = %err, "Failed to read pool status");
                }
            }
        }
        if degraded > 0 {
            return Err(EngineError::upstream(
                "infrastructure health",
                anyhow::anyhow!("{degraded} machine-config pool(s) are degraded"),
            ));
        }
        debug!("All machine-config pools are stable");
        Ok(())
    }

    async fn check_storage_available(&self) -> Result<(), EngineError> {
        let classes: Api<StorageClass> = Api::all(self.client.clone());
        match classes.list(&ListParams::default()).await {
            Ok(list) if list.items.is_empty() => {
                debug!("No storage classes found (may be acceptable)");
                return Ok(());
            }
            Ok(_) => {}
            Err(err) => {
                debug!(error = %err, "Failed to list storage classes");
                return Ok(());
            }
        }

        let pvs: Api<PersistentVolume> = Api::all(self.client.clone());
        let list = match pvs.list(&ListParams::default()).await {
            Ok(list) => list,
            Err(err) => {
                debug!(error = %err, "Failed to list persistent volumes");
                return Ok(());
            }
        };

        let failed = list
            .items
            .iter()
            .filter(|pv| {
                pv.status
                    .as_ref()
                    .and_then(|s| s.phase.as_deref())
                    .is_some_and(|phase| phase == "Failed")
            })
            .count();
        if failed > 0 {
            return Err(EngineError::upstream(
                "infrastructure health",
                anyhow::anyhow!("{failed} persistent volume(s) are in failed state"),
            ));
        }
        debug!(persistent_volumes = list.items.len(), "Storage is available");
        Ok(())
    }

    async fn check_cluster_operators(&self) -> Result<(), EngineError> {
        let operators: Api<DynamicObject> =
            Api::all_with(self.client.clone(), &clusteroperator_api_resource());
        let list = match operators.list(&ListParams::default()).await {
            Ok(list) => list,
            Err(err) => {
                debug!(error = %err, "Failed to list cluster operators (API may be absent)");
                return Ok(());
            }
        };

        let mut degraded = 0;
        let mut unavailable = 0;
        for operator in &list.items {
            let name = operator.metadata.name.as_deref().unwrap_or("");
            if has_condition(&operator.data, "Degraded", "True") {
                degraded += 1;
                warn!(operator = name, "ClusterOperator is degraded");
            }
            if !has_condition(&operator.data, "Available", "True") {
                unavailable += 1;
                warn!(operator = name, "ClusterOperator is not available");
            }
        }

        if degraded > 0 || unavailable > 0 {
            return Err(EngineError::upstream(
                "platform health",
                anyhow::anyhow!("{degraded} cluster operator(s) degraded, {unavailable} unavailable"),
            ));
        }
        debug!(operators = list.items.len(), "All cluster operators are ready");
        Ok(())
    }

    async fn check_networking(&self) -> Result<(), EngineError> {
        // Probe the known networking namespaces; absence of both means the
        // cluster runs some other CNI and is out of scope here.
        for namespace in ["openshift-sdn", "openshift-ovn-kubernetes"] {
            let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
            let list = match pods.list(&ListParams::default()).await {
                Ok(list) if !list.items.is_empty() => list,
                _ => continue,
            };

            let problematic = list.items.iter().filter(|pod| !pod_running_or_done(pod)).count();
            if problematic > 0 {
                return Err(EngineError::upstream(
                    "platform health",
                    anyhow::anyhow!("{problematic} networking pod(s) in {namespace} are not healthy"),
                ));
            }
            debug!(namespace, pods = list.items.len(), "Networking is functional");
            return Ok(());
        }

        debug!("No known networking components found (may be using a different CNI)");
        Ok(())
    }

    async fn check_ingress(&self) -> Result<(), EngineError> {
        let deployments: Api<Deployment> =
            Api::namespaced(self.client.clone(), "openshift-ingress");
        let list = match deployments.list(&ListParams::default()).await {
            Ok(list) => list,
            Err(err) => {
                debug!(error = %err, "Failed to list ingress deployments (namespace may be absent)");
                return Ok(());
            }
        };

        let mut unavailable = 0;
        for deployment in &list.items {
            let status = deployment.status.clone().unwrap_or_default();
            let desired = status.replicas.unwrap_or(0);
            let available = status.available_replicas.unwrap_or(0);
            if available < desired {
                unavailable += 1;
                warn!(
                    deployment = deployment.metadata.name.as_deref().unwrap_or(""),
                    desired_replicas = desired,
                    available_replicas = available,
                    "Ingress deployment is not fully available"
                );
            }
        }
        if unavailable > 0 {
            return Err(EngineError::upstream(
                "platform health",
                anyhow::anyhow!("{unavailable} ingress deployment(s) are not fully available"),
            ));
        }
        debug!(deployments = list.items.len(), "Ingress is available");
        Ok(())
    }

    async fn check_pods_running(&self) -> Result<(), EngineError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.platform_namespace);
        let list = pods
            .list(&ListParams::default())
            .await
            .map_err(|err| from_kube("failed to list platform pods", err))?;

        let mut problematic = 0;
        for pod in &list.items {
            if !pod_running_or_done(pod) {
                problematic += 1;
                warn!(
                    namespace = %self.platform_namespace,
                    pod = pod.metadata.name.as_deref().unwrap_or(""),
                    "Pod is not in Running or Succeeded state"
                );
            }
        }
        if problematic > 0 {
            return Err(EngineError::upstream(
                "application health",
                anyhow::anyhow!(
                    "{problematic} pod(s) in namespace {} are not healthy",
                    self.platform_namespace
                ),
            ));
        }
        debug!(namespace = %self.platform_namespace, pods = list.items.len(), "All pods are healthy");
        Ok(())
    }

    async fn check_services(&self) -> Result<(), EngineError> {
        let services: Api<Service> =
            Api::namespaced(self.client.clone(), &self.platform_namespace);
        let list = match services.list(&ListParams::default()).await {
            Ok(list) => list,
            Err(err) => {
                debug!(error = %err, "Failed to list services");
                return Ok(());
            }
        };

        let invalid = list
            .items
            .iter()
            .filter(|svc| {
                svc.spec
                    .as_ref()
                    .and_then(|s| s.ports.as_ref())
                    .is_none_or(Vec::is_empty)
            })
            .count();
        if invalid > 0 {
            return Err(EngineError::upstream(
                "application health",
                anyhow::anyhow!("{invalid} service(s) have no ports defined"),
            ));
        }
        debug!(services = list.items.len(), "Services are responding");
        Ok(())
    }
}

#[async_trait]
impl HealthProbes for KubeHealthChecker {
    async fn check_infrastructure(&self) -> Result<(), EngineError> {
        info!("Checking infrastructure layer health");
        self.check_nodes_ready().await?;
        self.check_pools_stable().await?;
        self.check_storage_available().await?;
        info!("Infrastructure layer health check passed");
        Ok(())
    }

    async fn check_platform(&self) -> Result<(), EngineError> {
        info!("Checking platform layer health");
        self.check_cluster_operators().await?;
        self.check_networking().await?;
        self.check_ingress().await?;
        info!("Platform layer health check passed");
        Ok(())
    }

    async fn check_application(&self) -> Result<(), EngineError> {
        info!("Checking application layer health");
        self.check_pods_running().await?;
        self.check_services().await?;
        info!("Application layer health check passed");
        Ok(())
    }
}

/// Run the probe set for one layer.
pub async fn check_layer(probes: &HealthChecker, layer: Layer) -> Result<(), EngineError> {
    match layer {
        Layer::Infrastructure => probes.check_infrastructure().await,
        Layer::Platform => probes.check_platform().await,
        Layer::Application => probes.check_application().await,
    }
}

fn pod_running_or_done(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|phase| phase == "Running" || phase == "Succeeded")
}

fn has_condition(data: &Value, cond_type: &str, cond_status: &str) -> bool {
    data.get("status")
        .and_then(|s| s.get("conditions"))
        .and_then(Value::as_array)
        .is_some_and(|conds| {
            conds.iter().any(|c| {
                c.get("type").and_then(Value::as_str) == Some(cond_type)
                    && c.get("status").and_then(Value::as_str) == Some(cond_status)
            })
        })
}
