//! Error taxonomy shared across the engine.

use thiserror::Error;

/// Errors surfaced by detection, remediation and coordination.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Request or data failed validation; surfaces as HTTP 400.
    #[error("{0}")]
    Validation(String),

    /// Target resource does not exist; surfaces as HTTP 404.
    #[error("{0}")]
    NotFound(String),

    /// A dependency (cluster API, GitOps API, ML service, CLI) failed.
    #[error("{context}: {source}")]
    Upstream {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    /// A dependency did not answer within its deadline.
    #[error("{0}")]
    Timeout(String),

    /// The issue cannot be fixed automatically; a human has to act.
    #[error("{0}")]
    ManualIntervention(String),

    /// Programming error or broken invariant; surfaces as HTTP 500.
    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    /// Wrap a dependency failure with a short context string.
    pub fn upstream(context: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Upstream {
            context: context.into(),
            source: source.into(),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Classify a kube client error, mapping API 404s to `NotFound`.
pub fn from_kube(context: &str, err: kube::Error) -> EngineError {
    match &err {
        kube::Error::Api(resp) if resp.code == 404 => {
            EngineError::NotFound(format!("{context}: {}", resp.message))
        }
        _ => EngineError::upstream(context.to_string(), err),
    }
}
