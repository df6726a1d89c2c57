//! # Status
//!
//! Building per-cluster status entries from the reserved state reported by
//! Elasticsearch, and persisting the policy status.

use super::types::Reconciler;
use crate::client::{ClientError, EventType, FileSettingsState};
use crate::constants::EVENT_REASON_UNHEALTHY;
use crate::crd::{PolicyStatusError, ResourcePolicyStatus, StackConfigPolicy, StackConfigPolicyStatus};
use crate::observability;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, info};

static STACK_FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\t]+at\s|^\.\.\. [0-9]+ more")
        .expect("Failed to compile STACK_FRAME pattern - this should never happen")
});

/// Drops Java stack frames from the errors reported by Elasticsearch and joins them.
pub fn clean_stack_trace(errors: &[String]) -> String {
    errors
        .iter()
        .map(|error| {
            error
                .lines()
                .filter(|line| !STACK_FRAME.is_match(line))
                .collect::<Vec<_>>()
                .join("\n")
                .trim_matches('\n')
                .to_string()
        })
        .collect::<Vec<_>>()
        .join(". ")
}

/// Status entry for a cluster from its reported file settings state
pub fn elasticsearch_resource_status(state: &FileSettingsState, expected_version: i64) -> ResourcePolicyStatus {
    let error = state
        .errors
        .as_ref()
        .map(|errors| PolicyStatusError {
            version: errors.version,
            message: clean_stack_trace(&errors.errors),
        })
        .unwrap_or_default();
    ResourcePolicyStatus {
        current_version: state.version,
        expected_version,
        error,
        ..Default::default()
    }
}

/// Writes the status when it changed, warning once when the policy degrades.
pub async fn persist_status(
    ctx: &Reconciler,
    policy: &StackConfigPolicy,
    status: &StackConfigPolicyStatus,
) -> Result<(), ClientError> {
    observability::set_resources_by_phase(status.phase_counts());

    if policy.status.as_ref() == Some(status) {
        debug!("Status of {} is unchanged", policy.key());
        return Ok(());
    }

    // a policy without stored status has never been Ready
    if policy.status.as_ref().is_some_and(|previous| status.is_degraded(previous)) {
        ctx.cluster
            .publish_event(
                policy,
                EventType::Warning,
                EVENT_REASON_UNHEALTHY,
                "StackConfigPolicy health degraded".to_string(),
            )
            .await;
    }

    info!(
        "Updating status of {}: phase={} ready={}",
        policy.key(),
        status.phase,
        status.ready_count
    );
    ctx.cluster.update_policy_status(policy, status).await
}
