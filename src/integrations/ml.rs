//! HTTP client for the external ML pattern-analysis service.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EngineError;

/// A single metric data point shipped to the ML service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricData {
    pub name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Request body for `/api/v1/pattern/analyze`.
#[derive(Debug, Clone, Serialize)]
pub struct PatternAnalysisRequest {
    pub metrics: Vec<MetricData>,
    pub time_range: TimeRange,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub analysis_type: String,
}

/// A pattern detected by the ML service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pattern {
    /// `trend`, `seasonal`, `spike`, `correlation`, ...
    #[serde(default)]
    #[serde(rename = "type")]
    pub pattern_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metrics: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternSummary {
    #[serde(default)]
    pub patterns_found: usize,
    #[serde(default)]
    pub confidence: f64,
}

/// Response from `/api/v1/pattern/analyze`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternAnalysisResponse {
    #[serde(default)]
    pub patterns: Vec<Pattern>,
    #[serde(default)]
    pub insights: Vec<String>,
    #[serde(default)]
    pub summary: PatternSummary,
}

/// Client for the ML service, consumed as a pattern-analysis oracle.
pub struct MlClient {
    base_url: String,
    http: reqwest::Client,
}

impl MlClient {
    /// Build a client with connection pooling and the given timeout.
    ///
    /// # Errors
    ///
    /// Returns `Upstream` when the HTTP client cannot be constructed.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EngineError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|err| EngineError::upstream("failed to build ML HTTP client", err))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Run pattern analysis.
    ///
    /// # Errors
    ///
    /// `Upstream` on transport failures, non-2xx responses or undecodable
    /// bodies. Timeouts surface through the client's deadline as `Upstream`.
    pub async fn analyze_patterns(
        &self,
        request: &PatternAnalysisRequest,
    ) -> Result<PatternAnalysisResponse, EngineError> {
        let url = format!("{}/api/v1/pattern/analyze", self.base_url);

        let start = std::time::Instant::now();
        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    EngineError::Timeout("ML pattern analysis timed out".into())
                } else {
                    EngineError::upstream("ML pattern analysis request failed", err)
                }
            })?;

        debug!(
            status = response.status().as_u16(),
            duration_ms = start.elapsed().as_millis(),
            "ML service request completed"
        );

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::upstream(
                "ML pattern analysis failed",
                anyhow!("status {status}: {body}"),
            ));
        }

        let decoded: PatternAnalysisResponse = response
            .json()
            .await
            .map_err(|err| EngineError::upstream("failed to decode ML response", err))?;

        debug!(
            patterns_found = decoded.summary.patterns_found,
            insights = decoded.insights.len(),
            confidence = decoded.summary.confidence,
            "Pattern analysis completed"
        );
        Ok(decoded)
    }

    /// Verify the ML service is reachable.
    ///
    /// # Errors
    ///
    /// `Upstream` when the health endpoint is unreachable or non-200.
    pub async fn health_check(&self) -> Result<(), EngineError> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|err| EngineError::upstream("ML health check failed", err))?;
        if !response.status().is_success() {
            return Err(EngineError::upstream(
                "ML service unhealthy",
                anyhow!("status {}", response.status()),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> PatternAnalysisRequest {
        PatternAnalysisRequest {
            metrics: vec![],
            time_range: TimeRange {
                start: Utc::now() - chrono::Duration::hours(1),
                end: Utc::now(),
            },
            analysis_type: "layer_detection".into(),
        }
    }

    #[tokio::test]
    async fn analyze_patterns_decodes_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/pattern/analyze"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "patterns": [
                    {"type": "spike", "description": "node memory pressure", "metrics": [], "confidence": 0.9}
                ],
                "insights": ["infrastructure degradation detected"],
                "summary": {"patterns_found": 1, "confidence": 0.9}
            })))
            .mount(&server)
            .await;

        let client = MlClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let resp = client.analyze_patterns(&request()).await.unwrap();
        assert_eq!(resp.patterns.len(), 1);
        assert_eq!(resp.patterns[0].pattern_type, "spike");
        assert_eq!(resp.summary.confidence, 0.9);
    }

    #[tokio::test]
    async fn analyze_patterns_surfaces_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/pattern/analyze"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = MlClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        assert!(client.analyze_patterns(&request()).await.is_err());
    }

    #[tokio::test]
    async fn timeout_maps_to_timeout_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/pattern/analyze"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let client = MlClient::new(&server.uri(), Duration::from_millis(200)).unwrap();
        let err = client.analyze_patterns(&request()).await.unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));
    }

    #[tokio::test]
    async fn health_check_passes_on_200() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = MlClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        client.health_check().await.unwrap();
    }
}
