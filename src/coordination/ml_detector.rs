//! ML-enhanced layer detection wrapping the keyword detector.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::layer_detector::LayerDetector;
use crate::error::EngineError;
use crate::integrations::{
    MlClient, Pattern, PatternAnalysisRequest, PatternAnalysisResponse, TimeRange,
};
use crate::metrics;
use crate::models::{Layer, LayerPrediction, LayeredIssue, MlLayerPredictions, Resource};

const DEFAULT_ML_TIMEOUT: Duration = Duration::from_secs(5);
/// Minimum ML probability to promote a layer to affected.
const DEFAULT_PROBABILITY_THRESHOLD: f64 = 0.75;
/// Minimum overall ML confidence to adopt the ML-suggested root cause.
const DEFAULT_ROOT_CAUSE_CONFIDENCE_THRESHOLD: f64 = 0.85;

/// Runs the keyword pass first, then refines it with a bounded call to the
/// ML pattern-analysis service. Any ML failure silently falls back to the
/// keyword result.
pub struct MlLayerDetector {
    base: LayerDetector,
    client: Arc<MlClient>,
    timeout: Duration,
    probability_threshold: f64,
    root_cause_confidence_threshold: f64,
}

impl MlLayerDetector {
    #[must_use]
    pub fn new(client: Arc<MlClient>) -> Self {
        Self {
            base: LayerDetector::new(),
            client,
            timeout: DEFAULT_ML_TIMEOUT,
            probability_threshold: DEFAULT_PROBABILITY_THRESHOLD,
            root_cause_confidence_threshold: DEFAULT_ROOT_CAUSE_CONFIDENCE_THRESHOLD,
        }
    }

    #[must_use]
    pub fn with_probability_threshold(mut self, threshold: f64) -> Self {
        self.probability_threshold = threshold;
        self
    }

    /// Keyword pass, then ML enhancement.
    pub async fn detect_layers(
        &self,
        issue_id: &str,
        description: &str,
        resources: &[Resource],
    ) -> LayeredIssue {
        let mut issue = self.base.detect_layers(issue_id, description, resources);

        let started = Instant::now();
        let predictions = match timeout(self.timeout, self.fetch_predictions(description, resources))
            .await
        {
            Ok(Ok(predictions)) => predictions,
            Ok(Err(err)) => {
                metrics::record_ml_detection_duration(started.elapsed().as_secs_f64());
                warn!(error = %err, "ML prediction failed, using keyword-based results");
                metrics::record_ml_layer_detection(false, false);
                return issue;
            }
            Err(_) => {
                metrics::record_ml_detection_duration(started.elapsed().as_secs_f64());
                warn!("ML prediction timed out, using keyword-based results");
                metrics::record_ml_layer_detection(false, false);
                return issue;
            }
        };
        metrics::record_ml_detection_duration(started.elapsed().as_secs_f64());

        self.enhance(&mut issue, &predictions);
        issue.detection_method = "ml_enhanced".to_string();

        metrics::record_ml_layer_detection(true, true);
        for (layer, prediction) in [
            (Layer::Infrastructure, &predictions.infrastructure),
            (Layer::Platform, &predictions.platform),
            (Layer::Application, &predictions.application),
        ] {
            if let Some(prediction) = prediction {
                metrics::record_ml_layer_confidence(layer, prediction.probability);
            }
        }

        info!(
            issue_id,
            detection = "ml_enhanced",
            ml_confidence = predictions.confidence,
            affected_layers = ?issue.affected_layers,
            root_cause = %issue.root_cause_layer,
            "ML-enhanced layer detection complete"
        );
        issue
    }

    async fn fetch_predictions(
        &self,
        description: &str,
        resources: &[Resource],
    ) -> Result<MlLayerPredictions, EngineError> {
        // The service analyses the incident shape; metric samples are not
        // available at this point in the flow.
        let request = PatternAnalysisRequest {
            metrics: Vec::new(),
            time_range: TimeRange {
                start: Utc::now() - chrono::Duration::hours(1),
                end: Utc::now(),
            },
            analysis_type: "layer_detection".to_string(),
        };

        debug!(description, resources = resources.len(), "Calling ML pattern analysis for layer detection");
        let response = self.client.analyze_patterns(&request).await?;
        Ok(self.parse_response(&response, resources))
    }

    fn parse_response(
        &self,
        response: &PatternAnalysisResponse,
        resources: &[Resource],
    ) -> MlLayerPredictions {
        let infra_prob = layer_probability(response, Layer::Infrastructure, resources);
        let platform_prob = layer_probability(response, Layer::Platform, resources);
        let app_prob = layer_probability(response, Layer::Application, resources);

        let root_cause = ml_root_cause(infra_prob, platform_prob, app_prob);

        let prediction = |layer: Layer, probability: f64| -> Option<LayerPrediction> {
            (probability > 0.0).then(|| LayerPrediction {
                affected: probability > self.probability_threshold,
                probability,
                evidence: extract_evidence(response, layer),
                is_root_cause: layer == root_cause,
            })
        };

        MlLayerPredictions {
            infrastructure: prediction(Layer::Infrastructure, infra_prob),
            platform: prediction(Layer::Platform, platform_prob),
            application: prediction(Layer::Application, app_prob),
            root_cause_suggestion: root_cause,
            confidence: response.summary.confidence,
            predicted_at: Utc::now(),
            analysis_type: "pattern".to_string(),
        }
    }

    fn enhance(&self, issue: &mut LayeredIssue, predictions: &MlLayerPredictions) {
        for (layer, prediction) in [
            (Layer::Infrastructure, &predictions.infrastructure),
            (Layer::Platform, &predictions.platform),
            (Layer::Application, &predictions.application),
        ] {
            let Some(prediction) = prediction else { continue };
            if !prediction.affected {
                continue;
            }
            issue.add_affected_layer(layer);
            let keyword_confidence = issue.confidence(layer);
            issue
                .layer_confidence
                .insert(layer, keyword_confidence.max(prediction.probability));
        }

        issue.historical_pattern = format!("{}_pattern", predictions.root_cause_suggestion);

        if predictions.confidence >= self.root_cause_confidence_threshold {
            info!(
                ml_suggestion = %predictions.root_cause_suggestion,
                confidence = predictions.confidence,
                threshold = self.root_cause_confidence_threshold,
                "Using ML-suggested root cause"
            );
            issue.root_cause_layer = predictions.root_cause_suggestion;
            issue.add_affected_layer(predictions.root_cause_suggestion);
        } else {
            debug!(
                ml_suggestion = %predictions.root_cause_suggestion,
                ml_confidence = predictions.confidence,
                threshold = self.root_cause_confidence_threshold,
                using_keyword = %issue.root_cause_layer,
                "ML confidence below threshold, using keyword-based root cause"
            );
        }

        issue.ml_predictions = Some(predictions.clone());
    }
}

/// Probability for a layer: the pattern confidence when a pattern mentions
/// the layer (best match wins, floored at the summary confidence), the
/// keyword probability when only a resource kind matches, zero otherwise.
fn layer_probability(
    response: &PatternAnalysisResponse,
    layer: Layer,
    resources: &[Resource],
) -> f64 {
    let mut probability = response.summary.confidence;
    let mut mentioned = false;

    for pattern in &response.patterns {
        if pattern_matches_layer(pattern, layer) {
            mentioned = true;
            probability = probability.max(pattern.confidence);
        }
    }

    if !mentioned {
        if resources.iter().any(|r| resource_matches_layer(r, layer)) {
            return super::layer_detector::KEYWORD_CONFIDENCE;
        }
        return 0.0;
    }
    probability
}

fn pattern_matches_layer(pattern: &Pattern, layer: Layer) -> bool {
    let text = format!("{} {}", pattern.description, pattern.pattern_type).to_lowercase();
    let markers: &[&str] = match layer {
        Layer::Infrastructure => &["infrastructure", "node", "mco", "machine", "kernel", "os"],
        Layer::Platform => &["platform", "operator", "sdn", "networking", "storage", "cluster"],
        Layer::Application => &["application", "pod", "deployment", "container", "workload"],
    };
    markers.iter().any(|m| text.contains(m))
}

fn resource_matches_layer(resource: &Resource, layer: Layer) -> bool {
    match layer {
        Layer::Infrastructure => {
            matches!(resource.kind.as_str(), "Node" | "MachineConfig" | "MachineConfigPool")
        }
        Layer::Platform => matches!(resource.kind.as_str(), "ClusterOperator" | "NetworkPolicy"),
        Layer::Application => {
            matches!(resource.kind.as_str(), "Pod" | "Deployment" | "StatefulSet")
        }
    }
}

fn extract_evidence(response: &PatternAnalysisResponse, layer: Layer) -> Vec<String> {
    let mut evidence = Vec::new();
    for insight in &response.insights {
        if insight.to_lowercase().contains(layer.as_str()) {
            evidence.push(insight.clone());
        }
    }
    for pattern in &response.patterns {
        if pattern_matches_layer(pattern, layer) {
            evidence.push(pattern.pattern_type.clone());
        }
    }
    evidence
}

/// Highest probability wins; ties resolve infrastructure before platform
/// before application.
fn ml_root_cause(infra: f64, platform: f64, app: f64) -> Layer {
    let max = infra.max(platform).max(app);
    if max == infra && infra > 0.0 {
        return Layer::Infrastructure;
    }
    if max == platform && platform > 0.0 {
        return Layer::Platform;
    }
    Layer::Application
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::PatternSummary;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn response(patterns: Vec<Pattern>, insights: Vec<&str>, confidence: f64) -> PatternAnalysisResponse {
        PatternAnalysisResponse {
            summary: PatternSummary {
                patterns_found: patterns.len(),
                confidence,
            },
            patterns,
            insights: insights.into_iter().map(String::from).collect(),
        }
    }

    fn pattern(pattern_type: &str, description: &str, confidence: f64) -> Pattern {
        Pattern {
            pattern_type: pattern_type.into(),
            description: description.into(),
            metrics: vec![],
            confidence,
        }
    }

    fn detector_for(url: &str) -> MlLayerDetector {
        MlLayerDetector::new(Arc::new(MlClient::new(url, Duration::from_secs(2)).unwrap()))
    }

    fn pod_resource() -> Resource {
        Resource {
            kind: "Pod".into(),
            name: "p1".into(),
            namespace: "default".into(),
            issue: "crash loop".into(),
        }
    }

    #[test]
    fn probability_uses_best_matching_pattern() {
        let resp = response(
            vec![pattern("spike", "node memory pressure", 0.92)],
            vec![],
            0.6,
        );
        let p = layer_probability(&resp, Layer::Infrastructure, &[]);
        assert!((p - 0.92).abs() < f64::EPSILON);
    }

    #[test]
    fn unmentioned_layer_with_matching_resource_gets_keyword_probability() {
        let resp = response(vec![], vec![], 0.9);
        let p = layer_probability(&resp, Layer::Application, &[pod_resource()]);
        assert!((p - 0.70).abs() < f64::EPSILON);
    }

    #[test]
    fn unmentioned_layer_without_resources_is_zero() {
        let resp = response(vec![], vec![], 0.9);
        assert_eq!(layer_probability(&resp, Layer::Platform, &[]), 0.0);
    }

    #[test]
    fn root_cause_prefers_highest_probability_infra_first() {
        assert_eq!(ml_root_cause(0.9, 0.9, 0.9), Layer::Infrastructure);
        assert_eq!(ml_root_cause(0.0, 0.8, 0.7), Layer::Platform);
        assert_eq!(ml_root_cause(0.0, 0.0, 0.5), Layer::Application);
        assert_eq!(ml_root_cause(0.0, 0.0, 0.0), Layer::Application);
    }

    #[tokio::test]
    async fn ml_failure_falls_back_to_keyword_result() {
        // Nothing listens on this port; the call errors immediately.
        let detector = detector_for("http://127.0.0.1:1");
        let issue = detector
            .detect_layers("inc-1", "pod crash loop", &[pod_resource()])
            .await;
        assert_eq!(issue.detection_method, "keyword");
        assert!(issue.ml_predictions.is_none());
        assert_eq!(issue.root_cause_layer, Layer::Application);
    }

    #[tokio::test]
    async fn high_confidence_ml_adopts_root_cause_and_promotes_layer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/pattern/analyze"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "patterns": [
                    {"type": "trend", "description": "node kernel degradation", "metrics": [], "confidence": 0.93},
                    {"type": "spike", "description": "pod restarts", "metrics": [], "confidence": 0.81}
                ],
                "insights": ["infrastructure issue cascading to application"],
                "summary": {"patterns_found": 2, "confidence": 0.9}
            })))
            .mount(&server)
            .await;

        let detector = detector_for(&server.uri());
        // Keyword pass alone sees only the application layer.
        let issue = detector
            .detect_layers("inc-2", "pods restarting frequently", &[pod_resource()])
            .await;

        assert_eq!(issue.detection_method, "ml_enhanced");
        assert!(issue.affected_layers.contains(&Layer::Infrastructure));
        assert_eq!(issue.root_cause_layer, Layer::Infrastructure);
        assert_eq!(issue.historical_pattern, "infrastructure_pattern");
        assert!(issue.confidence(Layer::Infrastructure) >= 0.93);
        issue.validate().unwrap();
    }

    #[tokio::test]
    async fn low_confidence_ml_keeps_keyword_root_cause() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/pattern/analyze"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "patterns": [
                    {"type": "trend", "description": "node degradation", "metrics": [], "confidence": 0.8}
                ],
                "insights": [],
                "summary": {"patterns_found": 1, "confidence": 0.5}
            })))
            .mount(&server)
            .await;

        let detector = detector_for(&server.uri());
        let issue = detector
            .detect_layers("inc-3", "pod crash loop", &[pod_resource()])
            .await;

        assert_eq!(issue.detection_method, "ml_enhanced");
        // ML suggested infrastructure but overall confidence 0.5 < 0.85.
        assert_eq!(issue.root_cause_layer, Layer::Application);
        assert!(issue.ml_predictions.is_some());
    }

    #[tokio::test]
    async fn below_threshold_probability_does_not_promote_layer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/pattern/analyze"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "patterns": [
                    {"type": "trend", "description": "storage churn", "metrics": [], "confidence": 0.6}
                ],
                "insights": [],
                "summary": {"patterns_found": 1, "confidence": 0.4}
            })))
            .mount(&server)
            .await;

        let detector = detector_for(&server.uri());
        let issue = detector
            .detect_layers("inc-4", "pod crash loop", &[pod_resource()])
            .await;

        // Platform probability 0.6 is below the 0.75 promote threshold.
        assert!(!issue.affected_layers.contains(&Layer::Platform));
    }

    #[test]
    fn evidence_collects_insights_and_pattern_types() {
        let resp = response(
            vec![pattern("node_pressure", "node memory pressure", 0.9)],
            vec!["infrastructure degradation detected", "unrelated insight"],
            0.9,
        );
        let evidence = extract_evidence(&resp, Layer::Infrastructure);
        assert!(evidence.contains(&"infrastructure degradation detected".to_string()));
        assert!(evidence.contains(&"node_pressure".to_string()));
        assert!(!evidence.contains(&"unrelated insight".to_string()));
    }
}
