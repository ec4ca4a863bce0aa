//! Deployment method classification result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::EngineError;

/// How a workload was deployed onto the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeploymentMethod {
    /// Continuously reconciled from Git by a GitOps controller.
    #[serde(rename = "gitops")]
    GitOps,
    /// Installed by a client-side templated release tool.
    #[serde(rename = "template-tool")]
    TemplateTool,
    /// Owned by an operator reconciling a custom resource.
    #[serde(rename = "controller-managed")]
    ControllerManaged,
    /// Hand-applied manifests.
    #[serde(rename = "direct")]
    Direct,
    /// No rule fired.
    #[serde(rename = "unknown")]
    Unknown,
}

impl DeploymentMethod {
    /// Canonical detection confidence for this method.
    #[must_use]
    pub fn canonical_confidence(self) -> f64 {
        match self {
            Self::GitOps => 0.95,
            Self::TemplateTool => 0.90,
            Self::ControllerManaged => 0.80,
            Self::Direct => 0.60,
            Self::Unknown => 0.50,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GitOps => "gitops",
            Self::TemplateTool => "template-tool",
            Self::ControllerManaged => "controller-managed",
            Self::Direct => "direct",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DeploymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of classifying one workload's deployment method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentInfo {
    pub method: DeploymentMethod,
    /// Score in [0, 1]; higher means more certainty in the classification.
    pub confidence: f64,
    /// Which metadata key drove the decision, e.g. `annotation:...` or `label:...`.
    pub source: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, String>,
    pub detected_at: DateTime<Utc>,
    pub namespace: String,
    pub resource_name: String,
    pub resource_kind: String,
}

impl DeploymentInfo {
    /// Create a classification result with the required identity fields.
    #[must_use]
    pub fn new(
        namespace: &str,
        resource_name: &str,
        resource_kind: &str,
        method: DeploymentMethod,
        confidence: f64,
    ) -> Self {
        Self {
            method,
            confidence,
            source: String::new(),
            details: HashMap::new(),
            detected_at: Utc::now(),
            namespace: namespace.to_string(),
            resource_name: resource_name.to_string(),
            resource_kind: resource_kind.to_string(),
        }
    }

    pub fn set_detail(&mut self, key: &str, value: impl Into<String>) {
        self.details.insert(key.to_string(), value.into());
    }

    /// Look up a per-method detail, empty string when absent.
    #[must_use]
    pub fn detail(&self, key: &str) -> &str {
        self.details.get(key).map_or("", String::as_str)
    }

    #[must_use]
    pub fn is_gitops_managed(&self) -> bool {
        self.method == DeploymentMethod::GitOps
    }

    #[must_use]
    pub fn is_high_confidence(&self) -> bool {
        self.confidence >= 0.80
    }

    /// Check structural invariants.
    ///
    /// # Errors
    ///
    /// Returns `Validation` when the confidence is out of range or an identity
    /// field is empty.
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(EngineError::Validation(format!(
                "confidence must be between 0.0 and 1.0, got {}",
                self.confidence
            )));
        }
        if self.namespace.is_empty() {
            return Err(EngineError::Validation("namespace is required".into()));
        }
        if self.resource_name.is_empty() {
            return Err(EngineError::Validation("resource_name is required".into()));
        }
        if self.resource_kind.is_empty() {
            return Err(EngineError::Validation("resource_kind is required".into()));
        }
        Ok(())
    }
}

impl fmt::Display for DeploymentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} ({}): {} (confidence: {:.2})",
            self.namespace, self.resource_name, self.resource_kind, self.method, self.confidence
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DeploymentInfo {
        let mut info = DeploymentInfo::new(
            "default",
            "test-app",
            "Deployment",
            DeploymentMethod::GitOps,
            0.95,
        );
        info.source = "annotation:argocd.argoproj.io/tracking-id".to_string();
        info.set_detail("tracking_id", "test-app:apps/Deployment:default/test-app");
        info
    }

    #[test]
    fn canonical_confidence_matches_method() {
        assert_eq!(DeploymentMethod::GitOps.canonical_confidence(), 0.95);
        assert_eq!(DeploymentMethod::TemplateTool.canonical_confidence(), 0.90);
        assert_eq!(DeploymentMethod::ControllerManaged.canonical_confidence(), 0.80);
        assert_eq!(DeploymentMethod::Direct.canonical_confidence(), 0.60);
    }

    #[test]
    fn serializes_method_as_kebab_case() {
        let json = serde_json::to_value(DeploymentMethod::TemplateTool).unwrap();
        assert_eq!(json, serde_json::json!("template-tool"));
        let json = serde_json::to_value(DeploymentMethod::ControllerManaged).unwrap();
        assert_eq!(json, serde_json::json!("controller-managed"));
    }

    #[test]
    fn json_round_trip_is_identity() {
        let info = sample();
        let encoded = serde_json::to_string(&info).unwrap();
        let decoded: DeploymentInfo = serde_json::from_str(&encoded).unwrap();
        assert_eq!(info, decoded);
        decoded.validate().unwrap();
    }

    #[test]
    fn validation_rejects_bad_confidence() {
        let mut info = sample();
        info.confidence = 1.5;
        assert!(info.validate().is_err());
        info.confidence = -0.1;
        assert!(info.validate().is_err());
    }

    #[test]
    fn validation_rejects_empty_identity() {
        let mut info = sample();
        info.namespace.clear();
        assert!(info.validate().is_err());

        let mut info = sample();
        info.resource_name.clear();
        assert!(info.validate().is_err());
    }

    #[test]
    fn detail_lookup_defaults_to_empty() {
        let info = sample();
        assert_eq!(info.detail("tracking_id"), "test-app:apps/Deployment:default/test-app");
        assert_eq!(info.detail("missing"), "");
    }
}
