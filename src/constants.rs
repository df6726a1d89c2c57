//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! Label, annotation and object-name values are part of the contract with the
//! Elasticsearch and Kibana workload controllers and must not change.

/// Name reported on events, field managers and metrics
pub const CONTROLLER_NAME: &str = "stackconfigpolicy-controller";

/// Finalizer used to observe policy deletion
pub const POLICY_FINALIZER: &str = "policy.k8s.elastic.co/finalizer";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Fixed requeue delay used when a target is not ready to be configured yet (seconds)
pub const DEFAULT_REQUEUE_SECS: u64 = 30;

/// Requeue delay when enterprise features are disabled (seconds)
pub const DEFAULT_LICENSE_REQUEUE_SECS: u64 = 300;

/// Fibonacci backoff bounds for reconciliation errors (minutes)
pub const DEFAULT_BACKOFF_MIN_MINUTES: u64 = 1;
pub const DEFAULT_BACKOFF_MAX_MINUTES: u64 = 10;

/// Default delay before restarting watch stream after errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Backoff bounds when the API server storage is reinitializing (milliseconds)
pub const WATCH_BACKOFF_START_MS: u64 = 1_000;
pub const WATCH_BACKOFF_MAX_MS: u64 = 30_000;

/// Default maximum number of policies reconciled in parallel
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: u16 = 10;

/// Default operator namespace
pub const DEFAULT_OPERATOR_NAMESPACE: &str = "elastic-system";

/// Default timeout for Elasticsearch REST calls (seconds)
pub const DEFAULT_ES_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Maximum length of a StackConfigPolicy name
/// Derived object names are prefixed with the target name and suffixed, so the
/// policy name has to leave room for both.
pub const POLICY_NAME_MAX_LENGTH: usize = 36;

/// Oldest Elasticsearch version supporting file-based settings
pub const FILE_SETTINGS_MIN_VERSION: &str = "8.6.1";

/// Value written to `metadata.compatibility` in every file settings document
pub const FILE_SETTINGS_COMPATIBILITY: &str = "8.6.1";

// Derived object names and data keys

pub const FILE_SETTINGS_SECRET_SUFFIX: &str = "-es-file-settings";
pub const ES_CONFIG_SECRET_SUFFIX: &str = "-es-config";
pub const KIBANA_CONFIG_SECRET_SUFFIX: &str = "-kb-policy-config";

pub const SETTINGS_SECRET_KEY: &str = "settings.json";
pub const ES_CONFIG_KEY: &str = "elasticsearch.json";
pub const SECRET_MOUNTS_KEY: &str = "secretMounts.json";
pub const KIBANA_CONFIG_KEY: &str = "kibana.json";

// Soft ownership

pub const SOFT_OWNER_NAMESPACE_LABEL: &str = "eck.k8s.elastic.co/owner-namespace";
pub const SOFT_OWNER_NAME_LABEL: &str = "eck.k8s.elastic.co/owner-name";
pub const SOFT_OWNER_KIND_LABEL: &str = "eck.k8s.elastic.co/owner-kind";
pub const SOFT_OWNER_REFS_ANNOTATION: &str = "eck.k8s.elastic.co/owner-refs";

// Managed labels

pub const ON_DELETE_LABEL: &str = "asset.policy.k8s.elastic.co/on-delete";
pub const ON_DELETE_RESET: &str = "reset";
pub const ON_DELETE_DELETE: &str = "delete";

pub const TYPE_LABEL: &str = "common.k8s.elastic.co/type";
pub const ELASTICSEARCH_TYPE: &str = "elasticsearch";
pub const KIBANA_TYPE: &str = "kibana";

pub const ES_CLUSTER_NAME_LABEL: &str = "elasticsearch.k8s.elastic.co/cluster-name";
pub const KIBANA_NAME_LABEL: &str = "kibana.k8s.elastic.co/name";

// Managed annotations

pub const SETTINGS_HASH_ANNOTATION: &str = "policy.k8s.elastic.co/settings-hash";
pub const CONFIG_MOUNTS_HASH_ANNOTATION: &str = "policy.k8s.elastic.co/elasticsearch-config-mounts-hash";
pub const KIBANA_CONFIG_HASH_ANNOTATION: &str = "policy.k8s.elastic.co/kibana-config-hash";
pub const SECURE_SETTINGS_ANNOTATION: &str = "policy.k8s.elastic.co/secure-settings-secrets";
pub const SOURCE_SECRET_ANNOTATION: &str = "policy.k8s.elastic.co/source-secret-name";

// Event reasons

pub const EVENT_REASON_VALIDATION: &str = "Validation";
pub const EVENT_REASON_UNEXPECTED: &str = "Unexpected";
pub const EVENT_REASON_UNHEALTHY: &str = "Unhealthy";
pub const EVENT_REASON_CONFLICT: &str = "Conflict";
pub const EVENT_REASON_RECONCILIATION_ERROR: &str = "ReconciliationError";
