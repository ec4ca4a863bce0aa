//! Prometheus series for detection, strategy selection, workflows and
//! coordination, registered once in the default registry.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram,
    register_histogram_vec, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramVec,
    TextEncoder,
};
use std::sync::OnceLock;

use crate::models::Layer;

static METRICS: OnceLock<EngineMetrics> = OnceLock::new();

struct EngineMetrics {
    detection_total: CounterVec,
    detection_errors_total: CounterVec,

    strategy_selection_total: CounterVec,
    strategy_fallback_total: CounterVec,

    workflow_started_total: Counter,
    workflow_completed_total: CounterVec,
    remediation_duration_seconds: HistogramVec,
    remediation_failures_total: CounterVec,

    layer_detection_total: CounterVec,
    multi_layer_issues_total: CounterVec,
    plan_generation_total: CounterVec,
    plan_generation_duration_seconds: HistogramVec,
    plan_steps_total: HistogramVec,
    plan_execution_total: CounterVec,
    plan_execution_duration_seconds: HistogramVec,
    health_checkpoint_total: CounterVec,
    health_checkpoint_duration_seconds: HistogramVec,
    rollback_total: CounterVec,
    rollback_duration_seconds: Histogram,
    plans_active: Gauge,

    ml_layer_detection_total: CounterVec,
    ml_layer_confidence: HistogramVec,
    ml_detection_duration_seconds: Histogram,
}

impl EngineMetrics {
    #[allow(clippy::too_many_lines)]
    fn new() -> Self {
        Self {
            detection_total: register_counter_vec!(
                "coordination_engine_detection_total",
                "Total deployment method detections",
                &["method", "source", "kind", "cached"]
            )
            .expect("register detection_total"),
            detection_errors_total: register_counter_vec!(
                "coordination_engine_detection_errors_total",
                "Total deployment detection errors",
                &["reason", "kind"]
            )
            .expect("register detection_errors_total"),
            strategy_selection_total: register_counter_vec!(
                "coordination_engine_strategy_selection_total",
                "Remediator selection decisions",
                &["remediator", "method", "selected"]
            )
            .expect("register strategy_selection_total"),
            strategy_fallback_total: register_counter_vec!(
                "coordination_engine_strategy_fallback_total",
                "Times the fallback remediator was selected",
                &["method"]
            )
            .expect("register strategy_fallback_total"),
            workflow_started_total: register_counter!(
                "coordination_engine_workflow_started_total",
                "Remediation workflows started"
            )
            .expect("register workflow_started_total"),
            workflow_completed_total: register_counter_vec!(
                "coordination_engine_workflow_completed_total",
                "Remediation workflows finished, by terminal status",
                &["status"]
            )
            .expect("register workflow_completed_total"),
            remediation_duration_seconds: register_histogram_vec!(
                "coordination_engine_remediation_duration_seconds",
                "Duration of remediation executions",
                &["remediator", "method", "issue_type", "success"],
                vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]
            )
            .expect("register remediation_duration_seconds"),
            remediation_failures_total: register_counter_vec!(
                "coordination_engine_remediation_failures_total",
                "Remediation failures by reason",
                &["remediator", "method", "issue_type", "reason"]
            )
            .expect("register remediation_failures_total"),
            layer_detection_total: register_counter_vec!(
                "coordination_engine_layer_detection_total",
                "Layer detection attempts",
                &["detected_layer", "multi_layer"]
            )
            .expect("register layer_detection_total"),
            multi_layer_issues_total: register_counter_vec!(
                "coordination_engine_multi_layer_issues_total",
                "Issues affecting more than one layer",
                &["layers_count", "root_cause_layer"]
            )
            .expect("register multi_layer_issues_total"),
            plan_generation_total: register_counter_vec!(
                "coordination_engine_plan_generation_total",
                "Remediation plan generations",
                &["layers_count", "status"]
            )
            .expect("register plan_generation_total"),
            plan_generation_duration_seconds: register_histogram_vec!(
                "coordination_engine_plan_generation_duration_seconds",
                "Time taken to generate a remediation plan",
                &["layers_count"],
                vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0]
            )
            .expect("register plan_generation_duration_seconds"),
            plan_steps_total: register_histogram_vec!(
                "coordination_engine_plan_steps_total",
                "Number of steps in generated plans",
                &["layers_count"],
                vec![1.0, 3.0, 5.0, 10.0, 15.0, 20.0, 30.0]
            )
            .expect("register plan_steps_total"),
            plan_execution_total: register_counter_vec!(
                "coordination_engine_plan_execution_total",
                "Plan execution attempts",
                &["status", "layers_count"]
            )
            .expect("register plan_execution_total"),
            plan_execution_duration_seconds: register_histogram_vec!(
                "coordination_engine_plan_execution_duration_seconds",
                "Time taken to execute a remediation plan",
                &["status", "layers_count"],
                vec![10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0]
            )
            .expect("register plan_execution_duration_seconds"),
            health_checkpoint_total: register_counter_vec!(
                "coordination_engine_health_checkpoint_total",
                "Health checkpoint executions",
                &["layer", "status"]
            )
            .expect("register health_checkpoint_total"),
            health_checkpoint_duration_seconds: register_histogram_vec!(
                "coordination_engine_health_checkpoint_duration_seconds",
                "Time taken to execute a health checkpoint",
                &["layer", "status"],
                vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0]
            )
            .expect("register health_checkpoint_duration_seconds"),
            rollback_total: register_counter_vec!(
                "coordination_engine_rollback_total",
                "Rollback executions",
                &["trigger_reason", "steps_rolled_back"]
            )
            .expect("register rollback_total"),
            rollback_duration_seconds: register_histogram!(
                "coordination_engine_rollback_duration_seconds",
                "Time taken to execute a rollback",
                vec![5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
            )
            .expect("register rollback_duration_seconds"),
            plans_active: register_gauge!(
                "coordination_engine_plans_active",
                "Currently executing remediation plans"
            )
            .expect("register plans_active"),
            ml_layer_detection_total: register_counter_vec!(
                "coordination_engine_ml_layer_detection_total",
                "ML-enhanced layer detections",
                &["success", "ml_available"]
            )
            .expect("register ml_layer_detection_total"),
            ml_layer_confidence: register_histogram_vec!(
                "coordination_engine_ml_layer_confidence",
                "ML prediction confidence for layer detection",
                &["layer"],
                vec![0.5, 0.6, 0.7, 0.75, 0.8, 0.85, 0.9, 0.95, 0.99]
            )
            .expect("register ml_layer_confidence"),
            ml_detection_duration_seconds: register_histogram!(
                "coordination_engine_ml_detection_duration_seconds",
                "Duration of ML prediction calls",
                vec![0.1, 0.5, 1.0, 2.0, 5.0]
            )
            .expect("register ml_detection_duration_seconds"),
        }
    }
}

fn metrics() -> &'static EngineMetrics {
    METRICS.get_or_init(EngineMetrics::new)
}

/// Register all series. Safe to call more than once.
pub fn init() {
    let _ = metrics();
}

/// Render the default registry in Prometheus text exposition format.
#[must_use]
pub fn gather() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!(error = %err, "Failed to encode metrics");
    }
    buffer
}

fn bool_label(v: bool) -> &'static str {
    if v {
        "true"
    } else {
        "false"
    }
}

fn layers_count_label(count: usize) -> &'static str {
    match count {
        1 => "1",
        2 => "2",
        3 => "3",
        _ => "3+",
    }
}

fn steps_count_label(count: usize) -> &'static str {
    match count {
        0..=5 => "1-5",
        6..=10 => "6-10",
        11..=20 => "11-20",
        _ => "20+",
    }
}

pub fn record_detection(method: &str, source: &str, kind: &str, cached: bool) {
    metrics()
        .detection_total
        .with_label_values(&[method, source, kind, bool_label(cached)])
        .inc();
}

pub fn record_detection_error(reason: &str, kind: &str) {
    metrics()
        .detection_errors_total
        .with_label_values(&[reason, kind])
        .inc();
}

pub fn record_strategy_selection(remediator: &str, method: &str, selected: bool) {
    metrics()
        .strategy_selection_total
        .with_label_values(&[remediator, method, bool_label(selected)])
        .inc();
}

pub fn record_strategy_fallback(method: &str) {
    metrics().strategy_fallback_total.with_label_values(&[method]).inc();
}

pub fn record_workflow_start() {
    metrics().workflow_started_total.inc();
}

pub fn record_workflow_end(status: &str) {
    metrics().workflow_completed_total.with_label_values(&[status]).inc();
}

pub fn record_remediation(
    remediator: &str,
    method: &str,
    issue_type: &str,
    duration_secs: f64,
    success: bool,
) {
    metrics()
        .remediation_duration_seconds
        .with_label_values(&[remediator, method, issue_type, bool_label(success)])
        .observe(duration_secs);
}

pub fn record_remediation_failure(remediator: &str, method: &str, issue_type: &str, reason: &str) {
    metrics()
        .remediation_failures_total
        .with_label_values(&[remediator, method, issue_type, reason])
        .inc();
}

pub fn record_layer_detection(detected_layer: Layer, multi_layer: bool) {
    metrics()
        .layer_detection_total
        .with_label_values(&[detected_layer.as_str(), bool_label(multi_layer)])
        .inc();
}

pub fn record_multi_layer_issue(layers_count: usize, root_cause: Layer) {
    metrics()
        .multi_layer_issues_total
        .with_label_values(&[layers_count_label(layers_count), root_cause.as_str()])
        .inc();
}

pub fn record_plan_generation(layers_count: usize, duration_secs: f64, success: bool) {
    let status = if success { "success" } else { "failed" };
    metrics()
        .plan_generation_total
        .with_label_values(&[layers_count_label(layers_count), status])
        .inc();
    metrics()
        .plan_generation_duration_seconds
        .with_label_values(&[layers_count_label(layers_count)])
        .observe(duration_secs);
}

pub fn record_plan_steps(layers_count: usize, steps_count: usize) {
    metrics()
        .plan_steps_total
        .with_label_values(&[layers_count_label(layers_count)])
        .observe(steps_count as f64);
}

pub fn record_plan_execution_start() {
    metrics().plans_active.inc();
}

pub fn record_plan_execution_end(status: &str, layers_count: usize, duration_secs: f64) {
    metrics().plans_active.dec();
    metrics()
        .plan_execution_total
        .with_label_values(&[status, layers_count_label(layers_count)])
        .inc();
    metrics()
        .plan_execution_duration_seconds
        .with_label_values(&[status, layers_count_label(layers_count)])
        .observe(duration_secs);
}

pub fn record_health_checkpoint(layer: Layer, duration_secs: f64, success: bool) {
    let status = if success { "success" } else { "failed" };
    metrics()
        .health_checkpoint_total
        .with_label_values(&[layer.as_str(), status])
        .inc();
    metrics()
        .health_checkpoint_duration_seconds
        .with_label_values(&[layer.as_str(), status])
        .observe(duration_secs);
}

pub fn record_rollback(trigger_reason: &str, steps_rolled_back: usize, duration_secs: f64) {
    metrics()
        .rollback_total
        .with_label_values(&[trigger_reason, steps_count_label(steps_rolled_back)])
        .inc();
    metrics().rollback_duration_seconds.observe(duration_secs);
}

pub fn record_ml_layer_detection(success: bool, ml_available: bool) {
    metrics()
        .ml_layer_detection_total
        .with_label_values(&[bool_label(success), bool_label(ml_available)])
        .inc();
}

pub fn record_ml_layer_confidence(layer: Layer, confidence: f64) {
    metrics()
        .ml_layer_confidence
        .with_label_values(&[layer.as_str()])
        .observe(confidence);
}

pub fn record_ml_detection_duration(duration_secs: f64) {
    metrics().ml_detection_duration_seconds.observe(duration_secs);
}
