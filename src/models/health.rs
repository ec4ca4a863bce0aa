//! Health endpoint response model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Overall service health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health of an individual component or dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentState {
    Ok,
    Degraded,
    Down,
}

/// Probe result for one external dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyHealth {
    pub name: String,
    pub status: ComponentState,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(rename = "latency_ms", skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<i64>,
    pub checked_at: DateTime<Utc>,
}

/// Summary of the startup/runtime RBAC permission checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RbacStatus {
    pub status: ComponentState,
    pub permissions_total: usize,
    pub permissions_ok: usize,
    pub permissions_failed: usize,
    pub critical_ok: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl Default for RbacStatus {
    fn default() -> Self {
        Self {
            status: ComponentState::Ok,
            permissions_total: 0,
            permissions_ok: 0,
            permissions_failed: 0,
            critical_ok: false,
            message: String::new(),
        }
    }
}

/// The comprehensive health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub uptime_seconds: i64,
    pub dependencies: HashMap<String, DependencyHealth>,
    pub rbac: RbacStatus,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, String>,
}

impl HealthResponse {
    #[must_use]
    pub fn new(version: &str, start_time: DateTime<Utc>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            timestamp: Utc::now(),
            version: version.to_string(),
            uptime_seconds: (Utc::now() - start_time).num_seconds(),
            dependencies: HashMap::new(),
            rbac: RbacStatus::default(),
            details: HashMap::new(),
        }
    }

    /// Record a dependency probe and degrade the overall status accordingly.
    /// The `kubernetes` dependency is critical; its loss makes the service
    /// unhealthy, any other loss only degrades it.
    pub fn add_dependency(&mut self, name: &str, dep: DependencyHealth) {
        match dep.status {
            ComponentState::Down => {
                if name == "kubernetes" {
                    self.status = HealthStatus::Unhealthy;
                } else if self.status == HealthStatus::Healthy {
                    self.status = HealthStatus::Degraded;
                }
            }
            ComponentState::Degraded => {
                if self.status == HealthStatus::Healthy {
                    self.status = HealthStatus::Degraded;
                }
            }
            ComponentState::Ok => {}
        }
        self.dependencies.insert(name.to_string(), dep);
    }

    /// Record the RBAC summary; missing critical permissions mean unhealthy.
    pub fn set_rbac_status(&mut self, rbac: RbacStatus) {
        if !rbac.critical_ok {
            self.status = HealthStatus::Unhealthy;
        } else if rbac.permissions_failed > 0 && self.status == HealthStatus::Healthy {
            self.status = HealthStatus::Degraded;
        }
        self.rbac = rbac;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dep(status: ComponentState) -> DependencyHealth {
        DependencyHealth {
            name: "x".into(),
            status,
            message: String::new(),
            latency_ms: Some(4),
            checked_at: Utc::now(),
        }
    }

    #[test]
    fn kubernetes_down_is_unhealthy() {
        let mut health = HealthResponse::new("test", Utc::now());
        health.add_dependency("kubernetes", dep(ComponentState::Down));
        assert_eq!(health.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn optional_dependency_down_is_degraded() {
        let mut health = HealthResponse::new("test", Utc::now());
        health.add_dependency("ml_service", dep(ComponentState::Down));
        assert_eq!(health.status, HealthStatus::Degraded);
    }

    #[test]
    fn missing_critical_rbac_is_unhealthy() {
        let mut health = HealthResponse::new("test", Utc::now());
        health.set_rbac_status(RbacStatus {
            critical_ok: false,
            ..RbacStatus::default()
        });
        assert_eq!(health.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn partial_rbac_failures_degrade() {
        let mut health = HealthResponse::new("test", Utc::now());
        health.set_rbac_status(RbacStatus {
            critical_ok: true,
            permissions_total: 10,
            permissions_ok: 8,
            permissions_failed: 2,
            ..RbacStatus::default()
        });
        assert_eq!(health.status, HealthStatus::Degraded);
    }
}
