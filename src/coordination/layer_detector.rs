//! Keyword- and kind-based layer detection.

use tracing::{debug, info};

use crate::metrics;
use crate::models::{Layer, LayeredIssue, Resource};

const INFRASTRUCTURE_KEYWORDS: &[&str] = &[
    "node",
    "machineconfig",
    "mco",
    "kubelet",
    "memory pressure",
    "disk pressure",
    "pid pressure",
    "os",
    "kernel",
    "systemd",
    "coreos",
    "notready",
    "networkunavailable",
];

const PLATFORM_KEYWORDS: &[&str] = &[
    "operator",
    "sdn",
    "networking",
    "ovn",
    "storage",
    "csi",
    "ingress",
    "router",
    "api server",
    "controller manager",
    "scheduler",
    "clusteroperator",
    "degraded",
    "progressing",
];

const APPLICATION_KEYWORDS: &[&str] = &[
    "pod",
    "deployment",
    "replicaset",
    "statefulset",
    "crashloop",
    "imagepull",
    "container",
    "oom",
    "application",
    "service",
    "endpoint",
    "crashloopbackoff",
    "imagepullbackoff",
];

/// Keyword confidence assigned to every affected layer before any ML pass.
pub const KEYWORD_CONFIDENCE: f64 = 0.70;

/// Decides which layers an incident affects from its description and the
/// kinds of its impacted resources.
pub struct LayerDetector;

impl Default for LayerDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerDetector {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Analyse an incident and group its resources by layer.
    #[must_use]
    pub fn detect_layers(
        &self,
        issue_id: &str,
        description: &str,
        resources: &[Resource],
    ) -> LayeredIssue {
        debug!(issue_id, description, resources = resources.len(), "Detecting affected layers");

        let infra = has_infrastructure_issues(description, resources);
        let platform = has_platform_issues(description, resources);
        let application = has_application_issues(description, resources);

        let root_cause = if infra {
            Layer::Infrastructure
        } else if platform {
            Layer::Platform
        } else {
            Layer::Application
        };

        let mut issue = LayeredIssue::new(issue_id, description, root_cause);
        if infra {
            issue.add_affected_layer(Layer::Infrastructure);
        }
        if platform {
            issue.add_affected_layer(Layer::Platform);
        }
        if application {
            issue.add_affected_layer(Layer::Application);
        }

        issue.root_cause_layer = determine_root_cause(&issue.affected_layers);
        for layer in &issue.affected_layers {
            issue.layer_confidence.insert(*layer, KEYWORD_CONFIDENCE);
        }

        for resource in resources {
            let layer = resource_layer(resource);
            issue.add_impacted_resource(layer, resource.clone());
        }

        info!(
            issue_id,
            affected_layers = ?issue.affected_layers,
            root_cause = %issue.root_cause_layer,
            is_multi_layer = issue.is_multi_layer(),
            "Layer detection complete"
        );

        metrics::record_layer_detection(issue.root_cause_layer, issue.is_multi_layer());
        if issue.is_multi_layer() {
            metrics::record_multi_layer_issue(issue.affected_layers.len(), issue.root_cause_layer);
        }

        issue
    }

    /// Layering over a single plain issue: one resource built from the
    /// issue's identity.
    #[must_use]
    pub fn detect_from_issue(&self, issue: &crate::models::Issue) -> LayeredIssue {
        let resource = Resource {
            kind: issue.resource_type.clone(),
            name: issue.resource_name.clone(),
            namespace: issue.namespace.clone(),
            issue: format!("{}: {}", issue.issue_type, issue.description),
        };
        self.detect_layers(&issue.id, &issue.description, &[resource])
    }
}

fn contains_keyword(description: &str, keywords: &[&str]) -> bool {
    let lowered = description.to_lowercase();
    keywords.iter().any(|k| lowered.contains(k))
}

fn has_infrastructure_issues(description: &str, resources: &[Resource]) -> bool {
    if contains_keyword(description, INFRASTRUCTURE_KEYWORDS) {
        return true;
    }
    resources
        .iter()
        .any(|r| matches!(r.kind.as_str(), "Node" | "MachineConfig" | "MachineConfigPool"))
}

fn has_platform_issues(description: &str, resources: &[Resource]) -> bool {
    if contains_keyword(description, PLATFORM_KEYWORDS) {
        return true;
    }
    resources.iter().any(|r| {
        r.kind == "ClusterOperator" || r.kind == "NetworkPolicy" || r.kind.contains("Operator")
    })
}

fn has_application_issues(description: &str, resources: &[Resource]) -> bool {
    if contains_keyword(description, APPLICATION_KEYWORDS) {
        return true;
    }
    resources.iter().any(|r| {
        matches!(
            r.kind.as_str(),
            "Pod" | "Deployment" | "StatefulSet" | "DaemonSet" | "ReplicaSet"
        )
    })
}

/// The lowest affected layer wins; application when nothing matched.
fn determine_root_cause(affected: &[Layer]) -> Layer {
    if affected.contains(&Layer::Infrastructure) {
        return Layer::Infrastructure;
    }
    if affected.contains(&Layer::Platform) {
        return Layer::Platform;
    }
    Layer::Application
}

/// Map a resource kind to the layer it belongs to.
pub(crate) fn resource_layer(resource: &Resource) -> Layer {
    match resource.kind.as_str() {
        "Node" | "MachineConfig" | "MachineConfigPool" => Layer::Infrastructure,
        "ClusterOperator" | "NetworkPolicy" => Layer::Platform,
        kind if kind.contains("Operator") => Layer::Platform,
        _ => Layer::Application,
    }
}
