//! Incident record passed into remediation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::EngineError;

/// A problem requiring remediation, as reported by a monitoring source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    /// `CrashLoopBackOff`, `ImagePullBackOff`, `OOMKilled`, `generic`, ...
    #[serde(rename = "type")]
    pub issue_type: String,
    /// `low`, `medium`, `high`, `critical`.
    pub severity: String,
    pub namespace: String,
    /// `pod`, `deployment`, `statefulset`, ...
    pub resource_type: String,
    pub resource_name: String,
    pub description: String,
    pub detected_at: DateTime<Utc>,
}

impl Issue {
    /// Check that the fields needed to act on the issue are present.
    ///
    /// # Errors
    ///
    /// Returns `Validation` naming the first missing field.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.id.is_empty() {
            return Err(EngineError::Validation("issue id is required".into()));
        }
        if self.issue_type.is_empty() {
            return Err(EngineError::Validation("issue type is required".into()));
        }
        if self.namespace.is_empty() {
            return Err(EngineError::Validation("namespace is required".into()));
        }
        if self.resource_name.is_empty() {
            return Err(EngineError::Validation("resource name is required".into()));
        }
        if self.resource_type.is_empty() {
            return Err(EngineError::Validation("resource type is required".into()));
        }
        Ok(())
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} ({}): {} [{}]",
            self.namespace, self.resource_name, self.resource_type, self.issue_type, self.severity
        )
    }
}
