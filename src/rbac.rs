//! RBAC verification for the service identity.
//!
//! Runs `SelfSubjectAccessReview`s at startup so a mis-deployed role binding
//! fails fast instead of surfacing as scattered 403s mid-remediation.

use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
};
use kube::api::{Api, PostParams};
use kube::Client;
use tracing::{info, warn};

use crate::error::{from_kube, EngineError};

/// A permission to verify.
#[derive(Debug, Clone)]
pub struct Permission {
    pub api_group: &'static str,
    pub resource: &'static str,
    pub verb: &'static str,
}

/// Outcome of one permission check.
#[derive(Debug, Clone)]
pub struct PermissionCheckResult {
    pub permission: Permission,
    pub allowed: bool,
    pub reason: String,
}

/// Permissions the engine needs for full operation.
#[must_use]
pub fn required_permissions() -> Vec<Permission> {
    let mut perms = Vec::new();
    for verb in ["get", "list", "watch", "delete", "patch", "update"] {
        perms.push(Permission { api_group: "", resource: "pods", verb });
    }
    for verb in ["get", "list"] {
        perms.push(Permission { api_group: "", resource: "services", verb });
        perms.push(Permission { api_group: "", resource: "endpoints", verb });
        perms.push(Permission { api_group: "", resource: "nodes", verb });
        perms.push(Permission { api_group: "", resource: "persistentvolumes", verb });
        perms.push(Permission { api_group: "apps", resource: "replicasets", verb });
        perms.push(Permission { api_group: "apps", resource: "statefulsets", verb });
        perms.push(Permission { api_group: "apps", resource: "daemonsets", verb });
        perms.push(Permission { api_group: "storage.k8s.io", resource: "storageclasses", verb });
        perms.push(Permission {
            api_group: "machineconfiguration.openshift.io",
            resource: "machineconfigpools",
            verb,
        });
    }
    for verb in ["get", "list", "watch", "patch", "update"] {
        perms.push(Permission { api_group: "apps", resource: "deployments", verb });
    }
    perms.push(Permission { api_group: "", resource: "events", verb: "create" });
    perms
}

/// Permissions without which the engine cannot operate at all.
fn critical_permissions() -> Vec<Permission> {
    vec![
        Permission { api_group: "", resource: "pods", verb: "get" },
        Permission { api_group: "", resource: "pods", verb: "list" },
        Permission { api_group: "apps", resource: "deployments", verb: "get" },
        Permission { api_group: "apps", resource: "deployments", verb: "list" },
        Permission { api_group: "", resource: "events", verb: "create" },
    ]
}

/// Checks RBAC permissions for the bound service account.
pub struct Verifier {
    client: Client,
    namespace: String,
}

impl Verifier {
    #[must_use]
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
        }
    }

    /// Check a single permission via self subject access review.
    ///
    /// # Errors
    ///
    /// `Upstream` when the review request itself fails.
    pub async fn verify_permission(
        &self,
        perm: &Permission,
    ) -> Result<PermissionCheckResult, EngineError> {
        let review = SelfSubjectAccessReview {
            spec: SelfSubjectAccessReviewSpec {
                resource_attributes: Some(ResourceAttributes {
                    namespace: Some(self.namespace.clone()),
                    group: Some(perm.api_group.to_string()),
                    resource: Some(perm.resource.to_string()),
                    verb: Some(perm.verb.to_string()),
                    ..ResourceAttributes::default()
                }),
                ..SelfSubjectAccessReviewSpec::default()
            },
            ..SelfSubjectAccessReview::default()
        };

        let api: Api<SelfSubjectAccessReview> = Api::all(self.client.clone());
        let response = api
            .create(&PostParams::default(), &review)
            .await
            .map_err(|err| from_kube("failed to check permission", err))?;

        let status = response.status.unwrap_or_default();
        let result = PermissionCheckResult {
            permission: perm.clone(),
            allowed: status.allowed,
            reason: status.reason.unwrap_or_default(),
        };

        if !result.allowed {
            warn!(
                api_group = perm.api_group,
                resource = perm.resource,
                verb = perm.verb,
                namespace = %self.namespace,
                reason = %result.reason,
                "Permission check failed"
            );
        }
        Ok(result)
    }

    /// Check every required permission, returning all results.
    ///
    /// # Errors
    ///
    /// `Upstream` when any review request fails to execute.
    pub async fn verify_all_permissions(&self) -> Result<Vec<PermissionCheckResult>, EngineError> {
        let permissions = required_permissions();
        info!(total_checks = permissions.len(), "Starting RBAC permission verification");
        let mut results = Vec::with_capacity(permissions.len());
        for perm in &permissions {
            results.push(self.verify_permission(perm).await?);
        }
        Ok(results)
    }

    /// Verify the permissions required for startup; any miss is fatal.
    ///
    /// # Errors
    ///
    /// `Upstream` listing the missing permissions, or a review failure.
    pub async fn check_critical_permissions(&self) -> Result<(), EngineError> {
        let critical = critical_permissions();
        info!(critical_checks = critical.len(), "Verifying critical RBAC permissions");

        let mut failed = Vec::new();
        for perm in &critical {
            let result = self.verify_permission(perm).await?;
            if !result.allowed {
                failed.push(format!("{}/{}:{}", perm.api_group, perm.resource, perm.verb));
            }
        }

        if !failed.is_empty() {
            return Err(EngineError::upstream(
                "missing critical permissions",
                anyhow::anyhow!("{failed:?}"),
            ));
        }
        info!("All critical RBAC permissions verified successfully");
        Ok(())
    }
}
