//! Read-only client for machine-config pool resources.
//!
//! Pools live behind a custom-resource API that only exists on clusters
//! running the machine-config operator; callers treat listing failures on
//! other clusters as "no pools".

use std::time::Duration;

use kube::api::{Api, DynamicObject, ListParams};
use kube::discovery::ApiResource;
use kube::Client;
use serde_json::Value;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::error::{from_kube, EngineError};

const POOL_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Machine-config pool API resource definition.
fn pool_api_resource() -> ApiResource {
    ApiResource {
        group: "machineconfiguration.openshift.io".to_string(),
        version: "v1".to_string(),
        api_version: "machineconfiguration.openshift.io/v1".to_string(),
        kind: "MachineConfigPool".to_string(),
        plural: "machineconfigpools".to_string(),
    }
}

/// Parsed machine-config pool status.
#[derive(Debug, Clone, Default)]
pub struct PoolStatus {
    pub name: String,
    pub machine_count: i64,
    pub updated_machine_count: i64,
    pub ready_machine_count: i64,
    pub degraded_machine_count: i64,
    pub updating: bool,
    pub degraded: bool,
    pub current_configuration: String,
}

impl PoolStatus {
    /// Stable means not updating, not degraded, and every machine updated.
    #[must_use]
    pub fn is_stable(&self) -> bool {
        !self.updating && !self.degraded && self.updated_machine_count == self.machine_count
    }
}

/// Monitors machine-config pool rollout state.
pub struct McoClient {
    api: Api<DynamicObject>,
}

impl McoClient {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all_with(client, &pool_api_resource()),
        }
    }

    /// Fetch and parse one pool's status.
    ///
    /// # Errors
    ///
    /// `NotFound` when the pool does not exist, `Upstream` on other API
    /// failures or an unparsable status block.
    pub async fn pool_status(&self, pool_name: &str) -> Result<PoolStatus, EngineError> {
        debug!(pool = pool_name, "Fetching machine-config pool status");
        let pool = self
            .api
            .get(pool_name)
            .await
            .map_err(|err| from_kube(&format!("failed to get machine-config pool {pool_name}"), err))?;
        parse_pool_status(pool_name, &pool)
    }

    /// True when the pool is stable.
    ///
    /// # Errors
    ///
    /// Propagates [`Self::pool_status`] failures.
    pub async fn is_pool_stable(&self, pool_name: &str) -> Result<bool, EngineError> {
        let status = self.pool_status(pool_name).await?;
        debug!(
            pool = pool_name,
            stable = status.is_stable(),
            updated = status.updated_machine_count,
            total = status.machine_count,
            "Pool stability check"
        );
        Ok(status.is_stable())
    }

    /// Poll every ten seconds until the pool stabilises or the deadline
    /// passes. Transient status-read failures keep polling.
    ///
    /// # Errors
    ///
    /// `Timeout` when the pool does not stabilise in time.
    pub async fn wait_for_pool_stable(
        &self,
        pool_name: &str,
        timeout: Duration,
    ) -> Result<(), EngineError> {
        info!(pool = pool_name, timeout_secs = timeout.as_secs(), "Waiting for machine-config pool to stabilize");
        let deadline = Instant::now() + timeout;

        while Instant::now() < deadline {
            match self.is_pool_stable(pool_name).await {
                Ok(true) => {
                    info!(pool = pool_name, "Machine-config pool is stable");
                    return Ok(());
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(pool = pool_name, error = %err, "Failed to check pool stability");
                }
            }
            sleep(POOL_POLL_INTERVAL).await;
        }

        Err(EngineError::Timeout(format!(
            "machine-config pool {pool_name} did not stabilize within {}s",
            timeout.as_secs()
        )))
    }

    /// List all pool names. Absence of the API is not an error here; callers
    /// decide how to treat an empty cluster.
    ///
    /// # Errors
    ///
    /// `Upstream` on API failures.
    pub async fn list_pools(&self) -> Result<Vec<String>, EngineError> {
        let pools = self
            .api
            .list(&ListParams::default())
            .await
            .map_err(|err| from_kube("failed to list machine-config pools", err))?;
        Ok(pools.items.into_iter().filter_map(|p| p.metadata.name).collect())
    }

    /// Wait for every pool sequentially.
    ///
    /// # Errors
    ///
    /// Propagates the first pool that fails to stabilise.
    pub async fn wait_for_all_pools_stable(&self, timeout: Duration) -> Result<(), EngineError> {
        let pools = self.list_pools().await?;
        if pools.is_empty() {
            warn!("No machine-config pools found");
            return Ok(());
        }
        for pool in pools {
            self.wait_for_pool_stable(&pool, timeout).await?;
        }
        info!("All machine-config pools are stable");
        Ok(())
    }

    /// Verify the pool API is reachable.
    ///
    /// # Errors
    ///
    /// `Upstream` when listing fails.
    pub async fn health_check(&self) -> Result<(), EngineError> {
        self.list_pools().await.map(|_| ())
    }
}

fn parse_pool_status(name: &str, pool: &DynamicObject) -> Result<PoolStatus, EngineError> {
    let status = pool
        .data
        .get("status")
        .ok_or_else(|| EngineError::Internal(format!("status not found in machine-config pool {name}")))?;

    let mut parsed = PoolStatus {
        name: name.to_string(),
        machine_count: int_field(status, "machineCount"),
        updated_machine_count: int_field(status, "updatedMachineCount"),
        ready_machine_count: int_field(status, "readyMachineCount"),
        degraded_machine_count: int_field(status, "degradedMachineCount"),
        ..PoolStatus::default()
    };

    if let Some(config) = status
        .get("configuration")
        .and_then(|c| c.get("name"))
        .and_then(Value::as_str)
    {
        parsed.current_configuration = config.to_string();
    }

    if let Some(conditions) = status.get("conditions").and_then(Value::as_array) {
        for condition in conditions {
            let cond_type = condition.get("type").and_then(Value::as_str).unwrap_or("");
            let cond_status = condition.get("status").and_then(Value::as_str).unwrap_or("");
            match (cond_type, cond_status) {
                ("Updating", "True") => parsed.updating = true,
                ("Degraded", "True") => parsed.degraded = true,
                _ => {}
            }
        }
    }

    Ok(parsed)
}

fn int_field(status: &Value, key: &str) -> i64 {
    status.get(key).and_then(Value::as_i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_object(json: serde_json::Value) -> DynamicObject {
        let mut obj = DynamicObject::new("worker", &pool_api_resource());
        obj.data = json;
        obj
    }

    #[test]
    fn parses_counts_and_conditions() {
        let pool = pool_object(serde_json::json!({
            "status": {
                "machineCount": 3,
                "updatedMachineCount": 2,
                "readyMachineCount": 2,
                "degradedMachineCount": 0,
                "configuration": {"name": "rendered-worker-abc"},
                "conditions": [
                    {"type": "Updating", "status": "True"},
                    {"type": "Degraded", "status": "False"}
                ]
            }
        }));

        let status = parse_pool_status("worker", &pool).unwrap();
        assert_eq!(status.machine_count, 3);
        assert_eq!(status.updated_machine_count, 2);
        assert!(status.updating);
        assert!(!status.degraded);
        assert_eq!(status.current_configuration, "rendered-worker-abc");
        assert!(!status.is_stable());
    }

    #[test]
    fn stable_requires_all_machines_updated() {
        let pool = pool_object(serde_json::json!({
            "status": {
                "machineCount": 3,
                "updatedMachineCount": 3,
                "readyMachineCount": 3,
                "conditions": []
            }
        }));
        let status = parse_pool_status("worker", &pool).unwrap();
        assert!(status.is_stable());
    }

    #[test]
    fn missing_status_is_an_error() {
        let pool = pool_object(serde_json::json!({"spec": {}}));
        assert!(parse_pool_status("worker", &pool).is_err());
    }
}
