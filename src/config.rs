//! Environment-driven configuration with load-time validation.

use std::env;
use std::time::Duration;

use anyhow::{bail, Result};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_METRICS_PORT: u16 = 9090;
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_NAMESPACE: &str = "self-healing-platform";
pub const DEFAULT_ML_SERVICE_URL: &str = "http://aiops-ml-service:8080";
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_KUBERNETES_QPS: f32 = 50.0;
pub const DEFAULT_KUBERNETES_BURST: u32 = 100;

const VALID_LOG_LEVELS: &[&str] = &["debug", "info", "warn", "error", "fatal", "panic"];

/// All application configuration, loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub metrics_port: u16,
    pub log_level: String,

    /// Optional kubeconfig path; in-cluster config is preferred when present.
    pub kubeconfig: Option<String>,
    pub namespace: String,

    pub ml_service_url: String,
    pub argocd_api_url: Option<String>,
    pub argocd_token: Option<String>,

    pub http_timeout: Duration,

    pub enable_cors: bool,
    pub cors_allow_origin: Vec<String>,

    pub kubernetes_qps: f32,
    pub kubernetes_burst: u32,
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults, then validate.
    ///
    /// # Errors
    ///
    /// Returns an error listing every validation failure; the caller is
    /// expected to abort startup.
    pub fn load() -> Result<Self> {
        let cfg = Self {
            port: env_parse("PORT", DEFAULT_PORT),
            metrics_port: env_parse("METRICS_PORT", DEFAULT_METRICS_PORT),
            log_level: env_string("LOG_LEVEL", DEFAULT_LOG_LEVEL),
            kubeconfig: env_opt("KUBECONFIG"),
            namespace: env_string("NAMESPACE", DEFAULT_NAMESPACE),
            ml_service_url: env_string("ML_SERVICE_URL", DEFAULT_ML_SERVICE_URL),
            argocd_api_url: env_opt("ARGOCD_API_URL"),
            argocd_token: env_opt("ARGOCD_TOKEN"),
            http_timeout: env_duration("HTTP_TIMEOUT", DEFAULT_HTTP_TIMEOUT),
            enable_cors: env_parse("ENABLE_CORS", false),
            cors_allow_origin: env_list("CORS_ALLOW_ORIGIN", &["*"]),
            kubernetes_qps: env_parse("KUBERNETES_QPS", DEFAULT_KUBERNETES_QPS),
            kubernetes_burst: env_parse("KUBERNETES_BURST", DEFAULT_KUBERNETES_BURST),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate the configuration, collecting every violation.
    ///
    /// # Errors
    ///
    /// Returns a single error naming all invalid settings.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.port == 0 {
            problems.push(format!("invalid port: {}", self.port));
        }
        if self.metrics_port == 0 {
            problems.push(format!("invalid metrics_port: {}", self.metrics_port));
        }
        if self.port == self.metrics_port {
            problems.push("port and metrics_port cannot be the same".to_string());
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            problems.push(format!(
                "invalid log_level: {} (must be debug, info, warn, error, fatal, or panic)",
                self.log_level
            ));
        }

        if self.namespace.is_empty() {
            problems.push("namespace cannot be empty".to_string());
        }

        if self.ml_service_url.is_empty() {
            problems.push("ml_service_url cannot be empty".to_string());
        } else if !has_http_scheme(&self.ml_service_url) {
            problems.push(format!(
                "ml_service_url must start with http:// or https://: {}",
                self.ml_service_url
            ));
        }

        if let Some(url) = &self.argocd_api_url {
            if !has_http_scheme(url) {
                problems.push(format!(
                    "argocd_api_url must start with http:// or https://: {url}"
                ));
            }
        }

        if self.http_timeout < Duration::from_secs(1) {
            problems.push(format!(
                "http_timeout too short: {:?} (must be >= 1s)",
                self.http_timeout
            ));
        }
        if self.http_timeout > Duration::from_secs(300) {
            problems.push(format!(
                "http_timeout too long: {:?} (must be <= 5m)",
                self.http_timeout
            ));
        }

        if self.kubernetes_qps <= 0.0 {
            problems.push(format!(
                "kubernetes_qps must be positive: {}",
                self.kubernetes_qps
            ));
        }
        if self.kubernetes_burst == 0 {
            problems.push(format!(
                "kubernetes_burst must be positive: {}",
                self.kubernetes_burst
            ));
        }

        if !problems.is_empty() {
            bail!("configuration validation failed:\n  - {}", problems.join("\n  - "));
        }
        Ok(())
    }

    /// Tracing filter directive for the configured log level. The `fatal` and
    /// `panic` levels have no tracing equivalent and map to `error`.
    #[must_use]
    pub fn tracing_directive(&self) -> &'static str {
        match self.log_level.to_lowercase().as_str() {
            "debug" => "debug",
            "warn" => "warn",
            "error" | "fatal" | "panic" => "error",
            _ => "info",
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            metrics_port: DEFAULT_METRICS_PORT,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            kubeconfig: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            ml_service_url: DEFAULT_ML_SERVICE_URL.to_string(),
            argocd_api_url: None,
            argocd_token: None,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            enable_cors: false,
            cors_allow_origin: vec!["*".to_string()],
            kubernetes_qps: DEFAULT_KUBERNETES_QPS,
            kubernetes_burst: DEFAULT_KUBERNETES_BURST,
        }
    }
}

fn has_http_scheme(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    let fallback = || default.iter().map(ToString::to_string).collect();
    let Some(raw) = env_opt(key) else {
        return fallback();
    };
    let items: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect();
    if items.is_empty() {
        return fallback();
    }
    items
}

/// Accepts bare seconds (`"30"`) or a seconds suffix (`"30s"`).
fn env_duration(key: &str, default: Duration) -> Duration {
    let Some(raw) = env_opt(key) else {
        return default;
    };
    let trimmed = raw.trim();
    let secs = trimmed
        .strip_suffix('s')
        .unwrap_or(trimmed)
        .parse::<u64>()
        .ok();
    secs.map_or(default, Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_equal_ports() {
        let cfg = Config {
            metrics_port: DEFAULT_PORT,
            ..Config::default()
        };
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("cannot be the same"));
    }

    #[test]
    fn rejects_bad_log_level() {
        let cfg = Config {
            log_level: "verbose".into(),
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_bad_ml_url() {
        let cfg = Config {
            ml_service_url: "aiops-ml-service:8080".into(),
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_timeout() {
        let cfg = Config {
            http_timeout: Duration::from_millis(100),
            ..Config::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = Config {
            http_timeout: Duration::from_secs(3600),
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn collects_all_violations() {
        let cfg = Config {
            namespace: String::new(),
            ml_service_url: "nope".into(),
            kubernetes_qps: 0.0,
            ..Config::default()
        };
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("namespace"));
        assert!(err.contains("ml_service_url"));
        assert!(err.contains("kubernetes_qps"));
    }

    #[test]
    fn fatal_maps_to_error_directive() {
        let cfg = Config {
            log_level: "fatal".into(),
            ..Config::default()
        };
        assert_eq!(cfg.tracing_directive(), "error");
    }
}
