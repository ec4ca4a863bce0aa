//! Liveness endpoint with dependency and RBAC summaries.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, ListParams};
use kube::Client;
use tracing::warn;

use crate::models::{
    ComponentState, DependencyHealth, HealthResponse, HealthStatus, RbacStatus,
};
use crate::rbac::Verifier;

/// State backing the health endpoint.
#[derive(Clone)]
pub struct HealthState {
    pub client: Client,
    pub verifier: Arc<Verifier>,
    pub ml_service_url: String,
    pub version: String,
    pub start_time: DateTime<Utc>,
    pub http: reqwest::Client,
    pub namespace: String,
}

impl HealthState {
    /// Build the state; the embedded HTTP client carries a short probe
    /// timeout independent of the global one.
    #[must_use]
    pub fn new(
        client: Client,
        verifier: Arc<Verifier>,
        ml_service_url: &str,
        version: &str,
        namespace: &str,
    ) -> Self {
        Self {
            client,
            verifier,
            ml_service_url: ml_service_url.to_string(),
            version: version.to_string(),
            start_time: Utc::now(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
            namespace: namespace.to_string(),
        }
    }
}

/// `GET /api/v1/health`.
pub fn health_routes(state: HealthState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let mut health = HealthResponse::new(&state.version, state.start_time);

    health.add_dependency("kubernetes", check_kubernetes(&state.client).await);
    health.add_dependency("ml_service", check_ml_service(&state).await);
    health.set_rbac_status(check_rbac(&state.verifier).await);
    health.details.insert("namespace".to_string(), state.namespace.clone());

    let status = match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(health))
}

async fn check_kubernetes(client: &Client) -> DependencyHealth {
    let start = Instant::now();
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let result = namespaces.list(&ListParams::default().limit(1)).await;
    let latency = start.elapsed().as_millis() as i64;

    match result {
        Ok(_) => DependencyHealth {
            name: "kubernetes".into(),
            status: ComponentState::Ok,
            message: "Connected".into(),
            latency_ms: Some(latency),
            checked_at: Utc::now(),
        },
        Err(err) => {
            warn!(error = %err, "Kubernetes health check failed");
            DependencyHealth {
                name: "kubernetes".into(),
                status: ComponentState::Down,
                message: format!("Failed to connect: {err}"),
                latency_ms: Some(latency),
                checked_at: Utc::now(),
            }
        }
    }
}

async fn check_ml_service(state: &HealthState) -> DependencyHealth {
    let start = Instant::now();
    let url = format!("{}/health", state.ml_service_url.trim_end_matches('/'));
    let result = state.http.get(&url).send().await;
    let latency = start.elapsed().as_millis() as i64;

    // The ML service is optional; losing it degrades rather than downs.
    let (status, message) = match result {
        Ok(resp) if resp.status().is_success() => (ComponentState::Ok, "Connected".to_string()),
        Ok(resp) => (
            ComponentState::Degraded,
            format!("Returned status {}", resp.status().as_u16()),
        ),
        Err(err) => (ComponentState::Degraded, format!("Unreachable: {err}")),
    };

    DependencyHealth {
        name: "ml_service".into(),
        status,
        message,
        latency_ms: Some(latency),
        checked_at: Utc::now(),
    }
}

async fn check_rbac(verifier: &Verifier) -> RbacStatus {
    match verifier.check_critical_permissions().await {
        Ok(()) => RbacStatus {
            status: ComponentState::Ok,
            critical_ok: true,
            message: "Critical permissions verified".into(),
            ..RbacStatus::default()
        },
        Err(err) => {
            warn!(error = %err, "RBAC critical permissions check failed");
            RbacStatus {
                status: ComponentState::Down,
                critical_ok: false,
                message: format!("Critical permissions missing: {err}"),
                ..RbacStatus::default()
            }
        }
    }
}
