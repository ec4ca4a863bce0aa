//! Deployment method detection.
//!
//! Classifies how a workload landed on the cluster by inspecting its
//! annotations and labels, in strict priority order: GitOps tracking marks,
//! template-tool release marks, operator ownership, then the direct fallback.
//! Results are cached for five minutes to keep API chatter down.

mod cache;

pub use cache::{CacheStats, DetectionCache};

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use kube::{Api, Client, ResourceExt};
use tracing::{debug, info};

use crate::error::{from_kube, EngineError};
use crate::metrics;
use crate::models::{DeploymentInfo, DeploymentMethod};

/// Resolves a workload's deployment method. The seam lets orchestration be
/// exercised without a live cluster.
#[async_trait]
pub trait MethodResolver: Send + Sync {
    /// Classify the workload identified by `(namespace, name, kind)`.
    async fn resolve(
        &self,
        namespace: &str,
        name: &str,
        kind: &str,
    ) -> Result<DeploymentInfo, EngineError>;
}

#[async_trait]
impl MethodResolver for DeploymentDetector {
    async fn resolve(
        &self,
        namespace: &str,
        name: &str,
        kind: &str,
    ) -> Result<DeploymentInfo, EngineError> {
        self.detect_by_kind(namespace, name, kind).await
    }
}

/// GitOps tracking annotation, highest-priority indicator.
pub const GITOPS_TRACKING_ANNOTATION: &str = "argocd.argoproj.io/tracking-id";
/// GitOps instance label, fallback when the tracking annotation is absent.
pub const GITOPS_INSTANCE_LABEL: &str = "argocd.argoproj.io/instance";
/// Template-tool release annotations.
pub const RELEASE_NAME_ANNOTATION: &str = "meta.helm.sh/release-name";
pub const RELEASE_NAMESPACE_ANNOTATION: &str = "meta.helm.sh/release-namespace";
pub const CHART_LABEL: &str = "helm.sh/chart";
/// Operator ownership label.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

const CACHE_TTL: Duration = Duration::from_secs(300);

/// Well-known operator `managed-by` values that do not carry an "operator"
/// substring marker.
const KNOWN_OPERATORS: &[&str] = &[
    "prometheus-operator",
    "etcd-operator",
    "mysql-operator",
    "postgres-operator",
    "redis-operator",
    "kafka-operator",
    "elastic-operator",
    "mongodb-operator",
];

/// Detects the deployment method of cluster workloads, with caching.
pub struct DeploymentDetector {
    client: Client,
    cache: DetectionCache,
}

impl DeploymentDetector {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            cache: DetectionCache::new(CACHE_TTL),
        }
    }

    /// Classify a Deployment.
    ///
    /// # Errors
    ///
    /// `NotFound` when the Deployment does not exist, `Upstream` on other API
    /// failures. Neither writes to the cache.
    pub async fn detect_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DeploymentInfo, EngineError> {
        let key = DetectionCache::key("Deployment", namespace, name);
        if let Some(info) = self.cache.get(&key) {
            debug!(namespace, deployment = name, method = %info.method, "Deployment method retrieved from cache");
            metrics::record_detection(info.method.as_str(), &info.source, "Deployment", true);
            return Ok(info);
        }

        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let deployment = api.get(name).await.map_err(|err| {
            let mapped = from_kube(&format!("failed to get deployment {namespace}/{name}"), err);
            let reason = if mapped.is_not_found() { "not_found" } else { "api_error" };
            metrics::record_detection_error(reason, "Deployment");
            mapped
        })?;

        let info = classify_metadata(
            deployment.annotations(),
            deployment.labels(),
            namespace,
            name,
            "Deployment",
        );
        self.cache.set(key, info.clone());
        metrics::record_detection(info.method.as_str(), &info.source, "Deployment", false);

        info!(
            namespace,
            deployment = name,
            method = %info.method,
            confidence = info.confidence,
            "Detected deployment method"
        );
        Ok(info)
    }

    /// Classify a StatefulSet.
    ///
    /// # Errors
    ///
    /// Same contract as [`Self::detect_deployment`].
    pub async fn detect_statefulset(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DeploymentInfo, EngineError> {
        let key = DetectionCache::key("StatefulSet", namespace, name);
        if let Some(info) = self.cache.get(&key) {
            debug!(namespace, statefulset = name, "StatefulSet method retrieved from cache");
            metrics::record_detection(info.method.as_str(), &info.source, "StatefulSet", true);
            return Ok(info);
        }

        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        let sts = api.get(name).await.map_err(|err| {
            let mapped = from_kube(&format!("failed to get statefulset {namespace}/{name}"), err);
            let reason = if mapped.is_not_found() { "not_found" } else { "api_error" };
            metrics::record_detection_error(reason, "StatefulSet");
            mapped
        })?;

        let info =
            classify_metadata(sts.annotations(), sts.labels(), namespace, name, "StatefulSet");
        self.cache.set(key, info.clone());
        metrics::record_detection(info.method.as_str(), &info.source, "StatefulSet", false);

        debug!(namespace, statefulset = name, method = %info.method, "Detected deployment method for StatefulSet");
        Ok(info)
    }

    /// Classify a DaemonSet.
    ///
    /// # Errors
    ///
    /// Same contract as [`Self::detect_deployment`].
    pub async fn detect_daemonset(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DeploymentInfo, EngineError> {
        let key = DetectionCache::key("DaemonSet", namespace, name);
        if let Some(info) = self.cache.get(&key) {
            debug!(namespace, daemonset = name, "DaemonSet method retrieved from cache");
            metrics::record_detection(info.method.as_str(), &info.source, "DaemonSet", true);
            return Ok(info);
        }

        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
        let ds = api.get(name).await.map_err(|err| {
            let mapped = from_kube(&format!("failed to get daemonset {namespace}/{name}"), err);
            let reason = if mapped.is_not_found() { "not_found" } else { "api_error" };
            metrics::record_detection_error(reason, "DaemonSet");
            mapped
        })?;

        let info = classify_metadata(ds.annotations(), ds.labels(), namespace, name, "DaemonSet");
        self.cache.set(key, info.clone());
        metrics::record_detection(info.method.as_str(), &info.source, "DaemonSet", false);

        debug!(namespace, daemonset = name, method = %info.method, "Detected deployment method for DaemonSet");
        Ok(info)
    }

    /// Route to the kind-specific probe. Unknown kinds, pods and empty kinds
    /// fall back to Deployment detection.
    ///
    /// # Errors
    ///
    /// Same contract as [`Self::detect_deployment`].
    pub async fn detect_by_kind(
        &self,
        namespace: &str,
        name: &str,
        kind: &str,
    ) -> Result<DeploymentInfo, EngineError> {
        match kind {
            "StatefulSet" => self.detect_statefulset(namespace, name).await,
            "DaemonSet" => self.detect_daemonset(namespace, name).await,
            _ => self.detect_deployment(namespace, name).await,
        }
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        info!("Deployment detection cache cleared");
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

/// Core classification over a workload's annotations and labels.
///
/// First match wins: GitOps tracking annotation (or instance label fallback),
/// template-tool release annotation, recognised operator ownership, then the
/// direct fallback.
#[must_use]
pub fn classify_metadata(
    annotations: &BTreeMap<String, String>,
    labels: &BTreeMap<String, String>,
    namespace: &str,
    resource_name: &str,
    resource_kind: &str,
) -> DeploymentInfo {
    if let Some(tracking_id) = non_empty(annotations.get(GITOPS_TRACKING_ANNOTATION)) {
        let mut info = DeploymentInfo::new(
            namespace,
            resource_name,
            resource_kind,
            DeploymentMethod::GitOps,
            DeploymentMethod::GitOps.canonical_confidence(),
        );
        info.source = format!("annotation:{GITOPS_TRACKING_ANNOTATION}");
        info.set_detail("tracking_id", tracking_id);
        if let Some(app) = non_empty(labels.get(GITOPS_INSTANCE_LABEL)) {
            info.set_detail("app_name", app);
        }
        if let Some(app) = non_empty(labels.get("app.kubernetes.io/instance")) {
            info.set_detail("argocd_app", app);
        }
        return info;
    }

    // Some GitOps controllers label resources without setting the tracking id.
    if let Some(app) = non_empty(labels.get(GITOPS_INSTANCE_LABEL)) {
        let mut info = DeploymentInfo::new(
            namespace,
            resource_name,
            resource_kind,
            DeploymentMethod::GitOps,
            DeploymentMethod::GitOps.canonical_confidence(),
        );
        info.source = format!("label:{GITOPS_INSTANCE_LABEL}");
        info.set_detail("argocd_app", app);
        return info;
    }

    if let Some(release) = non_empty(annotations.get(RELEASE_NAME_ANNOTATION)) {
        let mut info = DeploymentInfo::new(
            namespace,
            resource_name,
            resource_kind,
            DeploymentMethod::TemplateTool,
            DeploymentMethod::TemplateTool.canonical_confidence(),
        );
        info.source = format!("annotation:{RELEASE_NAME_ANNOTATION}");
        info.set_detail("release_name", release);
        let release_ns = non_empty(annotations.get(RELEASE_NAMESPACE_ANNOTATION))
            .unwrap_or(namespace);
        info.set_detail("release_namespace", release_ns);
        if let Some(chart) = non_empty(labels.get(CHART_LABEL)) {
            info.set_detail("chart", chart);
        }
        return info;
    }

    if let Some(managed_by) = non_empty(labels.get(MANAGED_BY_LABEL)) {
        // The template tool also stamps managed-by; only a recognised operator
        // value counts here.
        let lowered = managed_by.to_lowercase();
        if !lowered.contains("helm") && is_operator_manager(managed_by) {
            let mut info = DeploymentInfo::new(
                namespace,
                resource_name,
                resource_kind,
                DeploymentMethod::ControllerManaged,
                DeploymentMethod::ControllerManaged.canonical_confidence(),
            );
            info.source = format!("label:{MANAGED_BY_LABEL}");
            info.set_detail("operator", managed_by);
            info.set_detail("managed_by", managed_by);
            if let Some(name) = non_empty(labels.get("app.kubernetes.io/name")) {
                info.set_detail("operator_name", name);
            }
            return info;
        }
    }

    let mut info = DeploymentInfo::new(
        namespace,
        resource_name,
        resource_kind,
        DeploymentMethod::Direct,
        DeploymentMethod::Direct.canonical_confidence(),
    );
    info.source = "default".to_string();
    info.set_detail("reason", "no deployment method indicators found");
    if let Some(app) = non_empty(labels.get("app")) {
        info.set_detail("app", app);
    }
    if let Some(version) = non_empty(labels.get("version")) {
        info.set_detail("version", version);
    }
    info
}

/// True when the `managed-by` value names an operator: either a well-known
/// operator, or any value carrying an "operator" substring marker.
fn is_operator_manager(managed_by: &str) -> bool {
    let lowered = managed_by.to_lowercase();
    if ["operator", "-operator", ".operator"]
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        return true;
    }
    KNOWN_OPERATORS.contains(&lowered.as_str())
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn classify(
        annotations: &[(&str, &str)],
        labels: &[(&str, &str)],
    ) -> DeploymentInfo {
        classify_metadata(
            &meta(annotations),
            &meta(labels),
            "default",
            "test-app",
            "Deployment",
        )
    }

    #[test]
    fn tracking_annotation_wins() {
        let info = classify(
            &[(GITOPS_TRACKING_ANNOTATION, "test-app:apps/Deployment:default/test-app")],
            &[],
        );
        assert_eq!(info.method, DeploymentMethod::GitOps);
        assert_eq!(info.confidence, 0.95);
        assert_eq!(info.source, format!("annotation:{GITOPS_TRACKING_ANNOTATION}"));
        assert_eq!(
            info.detail("tracking_id"),
            "test-app:apps/Deployment:default/test-app"
        );
        info.validate().unwrap();
    }

    #[test]
    fn instance_label_is_gitops_fallback() {
        let info = classify(&[], &[(GITOPS_INSTANCE_LABEL, "test-app")]);
        assert_eq!(info.method, DeploymentMethod::GitOps);
        assert_eq!(info.source, format!("label:{GITOPS_INSTANCE_LABEL}"));
        assert_eq!(info.detail("argocd_app"), "test-app");
    }

    #[test]
    fn empty_tracking_annotation_does_not_fire() {
        let info = classify(&[(GITOPS_TRACKING_ANNOTATION, "")], &[]);
        assert_eq!(info.method, DeploymentMethod::Direct);
    }

    #[test]
    fn release_annotation_classifies_template_tool() {
        let info = classify(
            &[
                (RELEASE_NAME_ANNOTATION, "my-release"),
                (RELEASE_NAMESPACE_ANNOTATION, "releases"),
            ],
            &[(CHART_LABEL, "my-chart-1.0.0")],
        );
        assert_eq!(info.method, DeploymentMethod::TemplateTool);
        assert_eq!(info.confidence, 0.90);
        assert_eq!(info.detail("release_name"), "my-release");
        assert_eq!(info.detail("release_namespace"), "releases");
        assert_eq!(info.detail("chart"), "my-chart-1.0.0");
    }

    #[test]
    fn release_namespace_defaults_to_resource_namespace() {
        let info = classify(&[(RELEASE_NAME_ANNOTATION, "my-release")], &[]);
        assert_eq!(info.detail("release_namespace"), "default");
    }

    #[test]
    fn gitops_outranks_template_tool() {
        let info = classify(
            &[
                (GITOPS_TRACKING_ANNOTATION, "app:apps/Deployment:default/app"),
                (RELEASE_NAME_ANNOTATION, "my-release"),
            ],
            &[],
        );
        assert_eq!(info.method, DeploymentMethod::GitOps);
    }

    #[test]
    fn known_operator_classifies_controller_managed() {
        let info = classify(
            &[],
            &[
                (MANAGED_BY_LABEL, "prometheus-operator"),
                ("app.kubernetes.io/name", "prometheus"),
            ],
        );
        assert_eq!(info.method, DeploymentMethod::ControllerManaged);
        assert_eq!(info.confidence, 0.80);
        assert_eq!(info.detail("operator"), "prometheus-operator");
        assert_eq!(info.detail("operator_name"), "prometheus");
    }

    #[test]
    fn operator_substring_counts() {
        let info = classify(&[], &[(MANAGED_BY_LABEL, "acme.operator")]);
        assert_eq!(info.method, DeploymentMethod::ControllerManaged);
    }

    #[test]
    fn helm_managed_by_is_not_an_operator() {
        let info = classify(&[], &[(MANAGED_BY_LABEL, "Helm")]);
        assert_eq!(info.method, DeploymentMethod::Direct);
    }

    #[test]
    fn unrecognised_manager_falls_through_to_direct() {
        let info = classify(&[], &[(MANAGED_BY_LABEL, "kustomize")]);
        assert_eq!(info.method, DeploymentMethod::Direct);
    }

    #[test]
    fn direct_fallback_records_app_labels() {
        let info = classify(&[], &[("app", "test-app"), ("version", "2.1.0")]);
        assert_eq!(info.method, DeploymentMethod::Direct);
        assert_eq!(info.confidence, 0.60);
        assert_eq!(info.source, "default");
        assert_eq!(info.detail("app"), "test-app");
        assert_eq!(info.detail("version"), "2.1.0");
        assert_eq!(info.detail("reason"), "no deployment method indicators found");
    }
}
