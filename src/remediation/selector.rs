//! Data-directed routing from deployment method to remediation back-end.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::Remediator;
use crate::error::EngineError;
use crate::metrics;
use crate::models::{DeploymentInfo, Issue};

/// Ordered registry of remediators plus a nominated fallback.
///
/// Selection is first positive `can_handle` in registration order; ties break
/// by declaration order by construction. The registry is append-only and
/// written only during startup.
pub struct StrategySelector {
    remediators: Vec<Arc<dyn Remediator>>,
    fallback: Option<Arc<dyn Remediator>>,
}

impl Default for StrategySelector {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategySelector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            remediators: Vec::new(),
            fallback: None,
        }
    }

    pub fn register(&mut self, remediator: Arc<dyn Remediator>) {
        info!(remediator = remediator.name(), "Remediator registered");
        self.remediators.push(remediator);
    }

    pub fn set_fallback(&mut self, remediator: Arc<dyn Remediator>) {
        info!(remediator = remediator.name(), "Fallback remediator set");
        self.fallback = Some(remediator);
    }

    /// The first registered remediator accepting the workload, else the
    /// fallback, else `None`.
    #[must_use]
    pub fn select(&self, info: &DeploymentInfo) -> Option<Arc<dyn Remediator>> {
        debug!(
            method = %info.method,
            confidence = info.confidence,
            namespace = %info.namespace,
            resource = %info.resource_name,
            "Selecting remediation strategy"
        );

        for remediator in &self.remediators {
            if remediator.can_handle(info) {
                info!(remediator = remediator.name(), method = %info.method, "Remediator selected");
                metrics::record_strategy_selection(remediator.name(), info.method.as_str(), true);
                return Some(remediator.clone());
            }
            metrics::record_strategy_selection(remediator.name(), info.method.as_str(), false);
        }

        if let Some(fallback) = &self.fallback {
            warn!(
                remediator = fallback.name(),
                method = %info.method,
                "No specific remediator matched, using fallback"
            );
            metrics::record_strategy_selection(fallback.name(), info.method.as_str(), true);
            metrics::record_strategy_fallback(info.method.as_str());
            return Some(fallback.clone());
        }

        error!("No remediator found and no fallback set");
        None
    }

    /// Names of every registered remediator, fallback marked.
    #[must_use]
    pub fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<String> =
            self.remediators.iter().map(|r| r.name().to_string()).collect();
        if let Some(fallback) = &self.fallback {
            names.push(format!("{} (fallback)", fallback.name()));
        }
        names
    }
}

#[async_trait]
impl Remediator for StrategySelector {
    async fn remediate(&self, info: &DeploymentInfo, issue: &Issue) -> Result<(), EngineError> {
        let Some(remediator) = self.select(info) else {
            return Err(EngineError::Validation(format!(
                "no remediator available for deployment method: {}",
                info.method
            )));
        };

        info!(
            issue_id = %issue.id,
            issue_type = %issue.issue_type,
            remediator = remediator.name(),
            namespace = %issue.namespace,
            resource = %issue.resource_name,
            "Starting remediation with selected strategy"
        );

        if let Err(err) = remediator.remediate(info, issue).await {
            error!(remediator = remediator.name(), issue_id = %issue.id, error = %err, "Remediation failed");
            return Err(err);
        }

        info!(remediator = remediator.name(), issue_id = %issue.id, "Remediation completed successfully");
        Ok(())
    }

    fn can_handle(&self, info: &DeploymentInfo) -> bool {
        self.select(info).is_some()
    }

    fn name(&self) -> &'static str {
        "strategy-selector"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeploymentMethod;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeRemediator {
        accepts: DeploymentMethod,
        label: &'static str,
        calls: AtomicUsize,
    }

    impl FakeRemediator {
        fn new(accepts: DeploymentMethod, label: &'static str) -> Arc<Self> {
            Arc::new(Self {
                accepts,
                label,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Remediator for FakeRemediator {
        async fn remediate(&self, _info: &DeploymentInfo, _issue: &Issue) -> Result<(), EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn can_handle(&self, info: &DeploymentInfo) -> bool {
            info.method == self.accepts
        }

        fn name(&self) -> &'static str {
            self.label
        }
    }

    fn info(method: DeploymentMethod) -> DeploymentInfo {
        DeploymentInfo::new("default", "app", "Deployment", method, method.canonical_confidence())
    }

    fn issue() -> Issue {
        Issue {
            id: "i1".into(),
            issue_type: "CrashLoopBackOff".into(),
            severity: "high".into(),
            namespace: "default".into(),
            resource_type: "Deployment".into(),
            resource_name: "app".into(),
            description: String::new(),
            detected_at: Utc::now(),
        }
    }

    #[test]
    fn first_match_wins() {
        let mut selector = StrategySelector::new();
        let gitops = FakeRemediator::new(DeploymentMethod::GitOps, "gitops");
        let tool = FakeRemediator::new(DeploymentMethod::TemplateTool, "template-tool");
        selector.register(gitops);
        selector.register(tool);

        let picked = selector.select(&info(DeploymentMethod::TemplateTool)).unwrap();
        assert_eq!(picked.name(), "template-tool");
    }

    #[test]
    fn falls_back_when_nothing_matches() {
        let mut selector = StrategySelector::new();
        selector.register(FakeRemediator::new(DeploymentMethod::GitOps, "gitops"));
        selector.set_fallback(FakeRemediator::new(DeploymentMethod::Direct, "direct"));

        let picked = selector.select(&info(DeploymentMethod::ControllerManaged)).unwrap();
        assert_eq!(picked.name(), "direct");
    }

    #[test]
    fn empty_selector_selects_nothing() {
        let selector = StrategySelector::new();
        assert!(selector.select(&info(DeploymentMethod::GitOps)).is_none());
        assert!(!selector.can_handle(&info(DeploymentMethod::GitOps)));
    }

    #[tokio::test]
    async fn remediate_without_any_remediator_is_validation_error() {
        let selector = StrategySelector::new();
        let err = selector
            .remediate(&info(DeploymentMethod::GitOps), &issue())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(err.to_string().contains("no remediator available"));
    }

    #[tokio::test]
    async fn remediate_dispatches_to_selected() {
        let mut selector = StrategySelector::new();
        let gitops = FakeRemediator::new(DeploymentMethod::GitOps, "gitops");
        selector.register(gitops.clone());

        selector
            .remediate(&info(DeploymentMethod::GitOps), &issue())
            .await
            .unwrap();
        assert_eq!(gitops.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn registered_names_marks_fallback() {
        let mut selector = StrategySelector::new();
        selector.register(FakeRemediator::new(DeploymentMethod::GitOps, "gitops"));
        selector.set_fallback(FakeRemediator::new(DeploymentMethod::Direct, "direct"));
        assert_eq!(selector.registered_names(), vec!["gitops", "direct (fallback)"]);
    }
}
