//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `stack_config_policy_reconciliations_total` - Total number of reconciliations
//! - `stack_config_policy_reconciliation_errors_total` - Total number of reconciliation errors
//! - `stack_config_policy_reconciliation_duration_seconds` - Duration of reconciliation operations
//! - `stack_config_policy_requeues_total{reason}` - Requeues by reason
//! - `stack_config_policy_file_settings_version_bumps_total` - File settings documents written with a new version
//! - `stack_config_policy_orphaned_secrets_total{action}` - Derived secrets reset or deleted for unselected targets
//! - `stack_config_policy_resources{phase}` - Resources per phase in the last status rollup

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, IntGaugeVec, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stack_config_policy_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stack_config_policy_reconciliation_errors_total",
        "Total number of reconciliation errors",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "stack_config_policy_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "stack_config_policy_requeues_total",
            "Total number of requeues by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static FILE_SETTINGS_VERSION_BUMPS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stack_config_policy_file_settings_version_bumps_total",
        "Total number of file settings documents written with a new version",
    )
    .expect("Failed to create FILE_SETTINGS_VERSION_BUMPS_TOTAL metric - this should never happen")
});

static ORPHANED_SECRETS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "stack_config_policy_orphaned_secrets_total",
            "Total number of derived secrets reset or deleted after their target was unselected",
        ),
        &["action"],
    )
    .expect("Failed to create ORPHANED_SECRETS_TOTAL metric - this should never happen")
});

static RESOURCES: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        prometheus::Opts::new(
            "stack_config_policy_resources",
            "Resources per phase in the last computed policy status",
        ),
        &["phase"],
    )
    .expect("Failed to create RESOURCES metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Registration only fails on duplicate metric names"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(FILE_SETTINGS_VERSION_BUMPS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ORPHANED_SECRETS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RESOURCES.clone()))?;

    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_requeues_total(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

pub fn increment_file_settings_version_bumps() {
    FILE_SETTINGS_VERSION_BUMPS_TOTAL.inc();
}

/// `action` is `reset` or `delete`
pub fn increment_orphaned_secrets(action: &str) {
    ORPHANED_SECRETS_TOTAL.with_label_values(&[action]).inc();
}

pub fn set_resources_by_phase<'a>(counts: impl IntoIterator<Item = (&'a str, i64)>) {
    for (phase, count) in counts {
        RESOURCES.with_label_values(&[phase]).set(count);
    }
}
