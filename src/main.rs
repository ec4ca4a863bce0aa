//! Coordination engine entry point: wires clients, detectors, remediators
//! and the two HTTP listeners, then runs until signalled.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config as KubeConfig};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use strata::api::{self, HealthState};
use strata::config::Config;
use strata::coordination::{
    KubeHealthChecker, MlLayerDetector, MultiLayerOrchestrator, WorkflowRegistry,
};
use strata::detector::DeploymentDetector;
use strata::integrations::{GitOpsClient, MlClient};
use strata::rbac::Verifier;
use strata::remediation::{
    ControllerResourceRemediator, DirectRemediator, GitOpsRemediator, RemediationEngine,
    StrategySelector, TemplateToolRemediator,
};
use strata::metrics;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.tracing_directive().into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        namespace = %config.namespace,
        port = config.port,
        "Starting coordination engine"
    );

    metrics::init();

    let client = init_kubernetes_client(&config).await?;
    info!("Kubernetes client initialized");

    // Fail fast when the role binding is broken.
    let verifier = Arc::new(Verifier::new(client.clone(), &config.namespace));
    verifier
        .check_critical_permissions()
        .await
        .context("critical RBAC permissions missing - cannot start")?;
    info!("RBAC permissions verified successfully");

    let ml_client = Arc::new(
        MlClient::new(&config.ml_service_url, config.http_timeout)
            .context("failed to build ML service client")?,
    );
    info!(ml_service_url = %config.ml_service_url, "ML service client initialized");

    let detector = Arc::new(DeploymentDetector::new(client.clone()));
    info!("Deployment detector initialized");

    let shutdown = CancellationToken::new();

    // Remediator registry: specific back-ends first, direct as fallback.
    let direct = Arc::new(DirectRemediator::new(client.clone()));
    let mut selector = StrategySelector::new();
    selector.register(Arc::new(TemplateToolRemediator::new()));
    selector.register(Arc::new(ControllerResourceRemediator::new(client.clone())));
    if let Some(argocd_url) = &config.argocd_api_url {
        let gitops_client = Arc::new(
            GitOpsClient::new(argocd_url, config.argocd_token.clone(), config.http_timeout)
                .context("failed to build GitOps client")?,
        );
        selector.register(Arc::new(GitOpsRemediator::new(gitops_client)));
        info!(argocd_url = %argocd_url, "GitOps remediator initialized");
    } else {
        warn!("ARGOCD_API_URL not set, GitOps remediation disabled");
    }
    selector.set_fallback(direct);
    info!(remediators = ?selector.registered_names(), "Strategy selector initialized");
    let selector = Arc::new(selector);

    let engine = Arc::new(RemediationEngine::new(
        detector.clone(),
        selector.clone(),
        shutdown.clone(),
    ));
    info!("Remediation engine initialized");

    let health_checker = Arc::new(KubeHealthChecker::new(client.clone(), &config.namespace));
    let orchestrator = Arc::new(MultiLayerOrchestrator::new(
        health_checker,
        detector.clone(),
        selector,
        shutdown.clone(),
    ));

    let ml_detector = Arc::new(MlLayerDetector::new(ml_client));
    let registry =
        Arc::new(WorkflowRegistry::new(orchestrator).with_ml_detector(ml_detector));
    info!("Multi-layer coordination initialized");

    let health_state = HealthState::new(
        client,
        verifier,
        &config.ml_service_url,
        env!("CARGO_PKG_VERSION"),
        &config.namespace,
    );

    let app = api::build_router(&config, health_state, detector, engine, registry);
    let metrics_app = api::build_metrics_router();

    let api_addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));

    let metrics_listener = tokio::net::TcpListener::bind(metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics port {}", config.metrics_port))?;
    let api_listener = tokio::net::TcpListener::bind(api_addr)
        .await
        .with_context(|| format!("failed to bind API port {}", config.port))?;

    let metrics_shutdown = shutdown.clone();
    let metrics_server = tokio::spawn(async move {
        info!(port = metrics_addr.port(), "Starting metrics server");
        axum::serve(metrics_listener, metrics_app)
            .with_graceful_shutdown(async move { metrics_shutdown.cancelled().await })
            .await
    });

    let api_shutdown = shutdown.clone();
    let api_server = tokio::spawn(async move {
        info!(port = api_addr.port(), "Starting API server");
        axum::serve(api_listener, app)
            .with_graceful_shutdown(async move { api_shutdown.cancelled().await })
            .await
    });

    shutdown_signal().await;
    info!("Shutting down servers");
    shutdown.cancel();

    // Both servers observe the token; give them a bounded window to drain.
    let drain = async {
        let _ = api_server.await;
        let _ = metrics_server.await;
    };
    if tokio::time::timeout(std::time::Duration::from_secs(30), drain).await.is_err() {
        warn!("Servers did not drain within 30s, exiting anyway");
    }

    info!("Servers stopped");
    Ok(())
}

/// Prefer in-cluster configuration; fall back to the configured kubeconfig
/// or `$HOME/.kube/config`.
async fn init_kubernetes_client(config: &Config) -> Result<Client> {
    match KubeConfig::incluster() {
        Ok(mut kube_config) => {
            info!(
                cluster_host = %kube_config.cluster_url,
                qps = config.kubernetes_qps,
                burst = config.kubernetes_burst,
                "Using in-cluster Kubernetes configuration"
            );
            kube_config.connect_timeout = Some(config.http_timeout);
            kube_config.read_timeout = Some(config.http_timeout);
            Client::try_from(kube_config).context("failed to create Kubernetes client")
        }
        Err(_) => {
            let path = match &config.kubeconfig {
                Some(path) => path.clone(),
                None => {
                    let home = std::env::var("HOME")
                        .context("KUBECONFIG not set and HOME directory not found")?;
                    format!("{home}/.kube/config")
                }
            };
            info!(kubeconfig = %path, "Using kubeconfig file");

            let kubeconfig = Kubeconfig::read_from(&path)
                .with_context(|| format!("failed to load kubeconfig from {path}"))?;
            let mut kube_config =
                KubeConfig::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .context("failed to create Kubernetes config from kubeconfig")?;
            kube_config.connect_timeout = Some(config.http_timeout);
            kube_config.read_timeout = Some(config.http_timeout);
            Client::try_from(kube_config).context("failed to create Kubernetes client")
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        }
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        }
    }
}
