//! Issues that span cluster layers, and the layer model itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::EngineError;

/// A coordination layer of the cluster, ordered by remediation priority.
///
/// Infrastructure problems must be fixed before platform problems, platform
/// before application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    /// Nodes, machine configs, the operating system.
    Infrastructure,
    /// Cluster operators, networking, storage, ingress.
    Platform,
    /// User pods, deployments, services.
    Application,
}

impl Layer {
    /// Remediation priority; lower runs first.
    #[must_use]
    pub fn priority(self) -> u8 {
        match self {
            Self::Infrastructure => 0,
            Self::Platform => 1,
            Self::Application => 2,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Infrastructure => "infrastructure",
            Self::Platform => "platform",
            Self::Application => "application",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An impacted Kubernetes resource, the unit over which layering operates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    /// Free-form note about what is wrong with this resource.
    #[serde(default)]
    pub issue: String,
}

/// ML prediction details for a single layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerPrediction {
    pub affected: bool,
    /// 0.0 to 1.0.
    pub probability: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<String>,
    pub is_root_cause: bool,
}

/// ML-based layer predictions attached to a layered issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlLayerPredictions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub infrastructure: Option<LayerPrediction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<LayerPrediction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application: Option<LayerPrediction>,
    pub root_cause_suggestion: Layer,
    pub confidence: f64,
    pub predicted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub analysis_type: String,
}

/// An incident that may affect multiple layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayeredIssue {
    pub id: String,
    pub description: String,
    pub affected_layers: Vec<Layer>,
    pub root_cause_layer: Layer,
    pub impacted_resources: HashMap<Layer, Vec<Resource>>,
    pub detected_at: DateTime<Utc>,
    pub severity: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub layer_confidence: HashMap<Layer, f64>,
    /// `keyword` or `ml_enhanced`.
    pub detection_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ml_predictions: Option<MlLayerPredictions>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub historical_pattern: String,
}

impl LayeredIssue {
    #[must_use]
    pub fn new(id: &str, description: &str, root_cause_layer: Layer) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            affected_layers: vec![root_cause_layer],
            root_cause_layer,
            impacted_resources: HashMap::new(),
            detected_at: Utc::now(),
            severity: "medium".to_string(),
            layer_confidence: HashMap::new(),
            detection_method: "keyword".to_string(),
            ml_predictions: None,
            historical_pattern: String::new(),
        }
    }

    #[must_use]
    pub fn is_multi_layer(&self) -> bool {
        self.affected_layers.len() > 1
    }

    /// Mark a layer affected; idempotent.
    pub fn add_affected_layer(&mut self, layer: Layer) {
        if !self.affected_layers.contains(&layer) {
            self.affected_layers.push(layer);
        }
    }

    pub fn add_impacted_resource(&mut self, layer: Layer, resource: Resource) {
        self.impacted_resources.entry(layer).or_default().push(resource);
    }

    #[must_use]
    pub fn resources_for_layer(&self, layer: Layer) -> &[Resource] {
        self.impacted_resources.get(&layer).map_or(&[], Vec::as_slice)
    }

    /// Affected layers sorted infrastructure-first.
    #[must_use]
    pub fn layers_by_priority(&self) -> Vec<Layer> {
        let mut layers = self.affected_layers.clone();
        layers.sort_by_key(|l| l.priority());
        layers
    }

    /// Confidence for a layer; 0.0 when the layer was not detected.
    #[must_use]
    pub fn confidence(&self, layer: Layer) -> f64 {
        self.layer_confidence.get(&layer).copied().unwrap_or(0.0)
    }

    /// Check structural invariants.
    ///
    /// # Errors
    ///
    /// Returns `Validation` when identity fields are missing, no layers are
    /// affected, or the root cause is not among the affected layers.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.id.is_empty() {
            return Err(EngineError::Validation("layered issue id is required".into()));
        }
        if self.description.is_empty() {
            return Err(EngineError::Validation(
                "layered issue description is required".into(),
            ));
        }
        if self.affected_layers.is_empty() {
            return Err(EngineError::Validation(
                "at least one affected layer is required".into(),
            ));
        }
        if !self.affected_layers.contains(&self.root_cause_layer) {
            return Err(EngineError::Validation(format!(
                "root cause layer {} is not among the affected layers",
                self.root_cause_layer
            )));
        }
        Ok(())
    }
}
