//! HTTP client for the GitOps controller's application API.

use std::time::Duration;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::error::EngineError;

const SYNC_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// An application as reported by the GitOps API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Application {
    pub metadata: ApplicationMetadata,
    #[serde(default)]
    pub spec: ApplicationSpec,
    #[serde(default)]
    pub status: ApplicationStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationMetadata {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationSpec {
    #[serde(default)]
    pub destination: ApplicationDestination,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationDestination {
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub namespace: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationStatus {
    #[serde(default)]
    pub sync: SyncState,
    #[serde(default)]
    pub health: HealthState,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncState {
    /// `Synced` or `OutOfSync`.
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub revision: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthState {
    /// `Healthy`, `Progressing`, `Degraded`, ...
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
}

/// Sync operation request body.
#[derive(Debug, Clone, Serialize)]
pub struct SyncRequest {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub revision: String,
    pub prune: bool,
    #[serde(rename = "dryRun")]
    pub dry_run: bool,
}

impl Default for SyncRequest {
    fn default() -> Self {
        Self {
            revision: String::new(),
            prune: false,
            dry_run: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApplicationList {
    #[serde(default)]
    items: Vec<Application>,
}

/// Client for the GitOps controller API, bearer-token authenticated.
pub struct GitOpsClient {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl GitOpsClient {
    /// Build a client with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns `Upstream` when the HTTP client cannot be constructed.
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| EngineError::upstream("failed to build GitOps HTTP client", err))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            http,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(method, format!("{}{path}", self.base_url));
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    /// Fetch one application.
    ///
    /// # Errors
    ///
    /// `Upstream` on transport failures or non-2xx responses.
    pub async fn get_application(&self, name: &str) -> Result<Application, EngineError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/api/v1/applications/{name}"))
            .send()
            .await
            .map_err(|err| EngineError::upstream("failed to get application", err))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::upstream(
                "GitOps API error",
                anyhow!("status {status}: {body}"),
            ));
        }

        response
            .json()
            .await
            .map_err(|err| EngineError::upstream("failed to decode application", err))
    }

    /// Trigger a sync operation.
    ///
    /// # Errors
    ///
    /// `Upstream` on transport failures or non-2xx responses.
    pub async fn sync_application(
        &self,
        name: &str,
        sync: &SyncRequest,
    ) -> Result<(), EngineError> {
        info!(app_name = name, "Triggering GitOps sync");

        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/api/v1/applications/{name}/sync"),
            )
            .json(sync)
            .send()
            .await
            .map_err(|err| EngineError::upstream("failed to sync application", err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::upstream(
                "GitOps sync failed",
                anyhow!("status {status}: {body}"),
            ));
        }

        info!(app_name = name, "GitOps sync triggered");
        Ok(())
    }

    /// Poll until the application is Synced and Healthy.
    ///
    /// Polls every five seconds up to `timeout`. A `Degraded` health status
    /// fails immediately; transient fetch errors keep polling.
    ///
    /// # Errors
    ///
    /// `Timeout` when the deadline passes, `Upstream` on degraded health or
    /// context-style cancellation via the enclosing task.
    pub async fn wait_for_sync(&self, name: &str, timeout: Duration) -> Result<(), EngineError> {
        info!(app_name = name, timeout_secs = timeout.as_secs(), "Waiting for GitOps sync completion");
        let deadline = Instant::now() + timeout;

        loop {
            sleep(SYNC_POLL_INTERVAL).await;
            if Instant::now() >= deadline {
                return Err(EngineError::Timeout(format!(
                    "timeout waiting for sync of {name} after {}s",
                    timeout.as_secs()
                )));
            }

            let app = match self.get_application(name).await {
                Ok(app) => app,
                Err(err) => {
                    warn!(app_name = name, error = %err, "Failed to get application status");
                    continue;
                }
            };

            debug!(
                sync_status = %app.status.sync.status,
                health_status = %app.status.health.status,
                "Application status"
            );

            if app.status.sync.status == "Synced" && app.status.health.status == "Healthy" {
                info!(app_name = name, "Application synced and healthy");
                return Ok(());
            }

            if app.status.health.status == "Degraded" {
                return Err(EngineError::upstream(
                    "application health degraded",
                    anyhow!("{}", app.status.health.message),
                ));
            }
        }
    }

    /// Find the application managing a resource. Matches by destination
    /// namespace; shared namespaces may be ambiguous, first match wins.
    ///
    /// # Errors
    ///
    /// `NotFound` when no application targets the namespace, `Upstream` on
    /// API failures.
    pub async fn find_application_by_resource(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Application, EngineError> {
        let response = self
            .request(reqwest::Method::GET, "/api/v1/applications")
            .send()
            .await
            .map_err(|err| EngineError::upstream("failed to list applications", err))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::upstream(
                "GitOps API error",
                anyhow!("status {status}: {body}"),
            ));
        }

        let list: ApplicationList = response
            .json()
            .await
            .map_err(|err| EngineError::upstream("failed to decode application list", err))?;

        list.items
            .into_iter()
            .find(|app| app.spec.destination.namespace == namespace)
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "no GitOps application found managing {namespace}/{name}"
                ))
            })
    }

    /// Verify the API is reachable.
    ///
    /// # Errors
    ///
    /// `Upstream` when the version endpoint is unreachable or non-200.
    pub async fn health_check(&self) -> Result<(), EngineError> {
        let response = self
            .request(reqwest::Method::GET, "/api/version")
            .send()
            .await
            .map_err(|err| EngineError::upstream("GitOps health check failed", err))?;
        if !response.status().is_success() {
            return Err(EngineError::upstream(
                "GitOps health check failed",
                anyhow!("status {}", response.status()),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn app_json(sync: &str, health: &str) -> serde_json::Value {
        serde_json::json!({
            "metadata": {"name": "test-app", "namespace": "argocd"},
            "spec": {"destination": {"server": "https://kubernetes.default.svc", "namespace": "default"}},
            "status": {
                "sync": {"status": sync, "revision": "abc123"},
                "health": {"status": health, "message": ""}
            }
        })
    }

    #[tokio::test]
    async fn get_application_decodes_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/applications/test-app"))
            .respond_with(ResponseTemplate::new(200).set_body_json(app_json("Synced", "Healthy")))
            .mount(&server)
            .await;

        let client = GitOpsClient::new(&server.uri(), None, Duration::from_secs(5)).unwrap();
        let app = client.get_application("test-app").await.unwrap();
        assert_eq!(app.metadata.name, "test-app");
        assert_eq!(app.status.sync.status, "Synced");
    }

    #[tokio::test]
    async fn sync_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/applications/test-app/sync"))
            .and(header("authorization", "Bearer secret-token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = GitOpsClient::new(
            &server.uri(),
            Some("secret-token".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();
        client
            .sync_application("test-app", &SyncRequest::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn sync_surfaces_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/applications/test-app/sync"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = GitOpsClient::new(&server.uri(), None, Duration::from_secs(5)).unwrap();
        let err = client
            .sync_application("test-app", &SyncRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Upstream { .. }));
    }

    #[tokio::test]
    async fn wait_for_sync_fails_fast_on_degraded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/applications/test-app"))
            .respond_with(ResponseTemplate::new(200).set_body_json(app_json("OutOfSync", "Degraded")))
            .mount(&server)
            .await;

        let client = GitOpsClient::new(&server.uri(), None, Duration::from_secs(5)).unwrap();
        let err = client
            .wait_for_sync("test-app", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Upstream { .. }));
    }

    #[tokio::test]
    async fn find_application_matches_destination_namespace() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/applications"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [app_json("Synced", "Healthy")]
            })))
            .mount(&server)
            .await;

        let client = GitOpsClient::new(&server.uri(), None, Duration::from_secs(5)).unwrap();
        let app = client
            .find_application_by_resource("default", "test-app")
            .await
            .unwrap();
        assert_eq!(app.metadata.name, "test-app");

        let err = client
            .find_application_by_resource("other-ns", "x")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
