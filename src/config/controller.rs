//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace the operator runs in
    /// Policies created here may select targets in every namespace
    pub operator_namespace: String,
    /// Fixed requeue delay (seconds)
    /// Used when ES is unreachable, when the file settings Secret does not exist yet
    /// and while a policy is not Ready
    pub default_requeue_secs: u64,
    /// Requeue delay when enterprise features are disabled (seconds)
    pub license_requeue_secs: u64,
    /// Whether enterprise features are enabled for this operator installation
    pub enterprise_features_enabled: bool,
    /// Fibonacci backoff minimum (minutes)
    pub backoff_min_minutes: u64,
    /// Fibonacci backoff maximum (minutes)
    pub backoff_max_minutes: u64,
    /// Watch stream restart delay after errors (seconds)
    pub watch_restart_delay_secs: u64,
    /// Maximum concurrent reconciliations
    /// Limits how many policies can be reconciled simultaneously
    pub max_concurrent_reconciliations: u16,
    /// HTTP server port for metrics and probes
    pub metrics_port: u16,
    /// Scheme used to reach Elasticsearch HTTP services
    pub es_scheme: String,
    /// Skip TLS verification when talking to Elasticsearch
    /// Clusters use self-signed certificates by default
    pub es_accept_invalid_certs: bool,
    /// Timeout for Elasticsearch REST calls (seconds)
    pub es_request_timeout_secs: u64,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            operator_namespace: DEFAULT_OPERATOR_NAMESPACE.to_string(),
            default_requeue_secs: DEFAULT_REQUEUE_SECS,
            license_requeue_secs: DEFAULT_LICENSE_REQUEUE_SECS,
            enterprise_features_enabled: true,
            backoff_min_minutes: DEFAULT_BACKOFF_MIN_MINUTES,
            backoff_max_minutes: DEFAULT_BACKOFF_MAX_MINUTES,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            max_concurrent_reconciliations: DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            metrics_port: DEFAULT_METRICS_PORT,
            es_scheme: "https".to_string(),
            es_accept_invalid_certs: true,
            es_request_timeout_secs: DEFAULT_ES_REQUEST_TIMEOUT_SECS,
            log_format: "text".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        use crate::constants::*;
        let operator_namespace = std::env::var("OPERATOR_NAMESPACE")
            .or_else(|_| std::env::var("POD_NAMESPACE"))
            .unwrap_or_else(|_| DEFAULT_OPERATOR_NAMESPACE.to_string());
        Self {
            operator_namespace,
            default_requeue_secs: env_var_or_default("DEFAULT_REQUEUE_SECS", DEFAULT_REQUEUE_SECS),
            license_requeue_secs: env_var_or_default(
                "LICENSE_REQUEUE_SECS",
                DEFAULT_LICENSE_REQUEUE_SECS,
            ),
            enterprise_features_enabled: env_var_or_default_bool(
                "ENTERPRISE_FEATURES_ENABLED",
                true,
            ),
            backoff_min_minutes: env_var_or_default(
                "BACKOFF_MIN_MINUTES",
                DEFAULT_BACKOFF_MIN_MINUTES,
            ),
            backoff_max_minutes: env_var_or_default(
                "BACKOFF_MAX_MINUTES",
                DEFAULT_BACKOFF_MAX_MINUTES,
            ),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            max_concurrent_reconciliations: env_var_or_default(
                "MAX_CONCURRENT_RECONCILIATIONS",
                DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            ),
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            es_scheme: env_var_or_default_str("ES_SCHEME", "https"),
            es_accept_invalid_certs: env_var_or_default_bool("ES_ACCEPT_INVALID_CERTS", true),
            es_request_timeout_secs: env_var_or_default(
                "ES_REQUEST_TIMEOUT_SECS",
                DEFAULT_ES_REQUEST_TIMEOUT_SECS,
            ),
            log_format: env_var_or_default_str("LOG_FORMAT", "text"),
        }
    }

    /// Get the fixed requeue duration
    pub fn default_requeue_duration(&self) -> Duration {
        Duration::from_secs(self.default_requeue_secs)
    }

    /// Get the license requeue duration
    pub fn license_requeue_duration(&self) -> Duration {
        Duration::from_secs(self.license_requeue_secs)
    }

    /// Get watch restart delay duration
    pub fn watch_restart_delay_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }

    /// Get Elasticsearch request timeout
    pub fn es_request_timeout(&self) -> Duration {
        Duration::from_secs(self.es_request_timeout_secs)
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as boolean or return default
fn env_var_or_default_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| {
            let v_lower = v.to_lowercase();
            v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
        })
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
