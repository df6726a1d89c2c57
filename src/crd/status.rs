//! # StackConfigPolicy Status
//!
//! Per-resource phases and their rollup into a single policy phase.
//!
//! Each selected Elasticsearch cluster or Kibana instance gets an entry in
//! `details`, keyed by resource kind then `namespace/name`. The policy phase is
//! the worst of those entries under [`PolicyPhase::ordinal`].

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StatusError {
    #[error("policy error already exists for resource {resource:?}")]
    PolicyErrorExists { resource: String },
}

/// Phase of a policy on one resource, or of the whole policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum PolicyPhase {
    Unknown,
    #[default]
    Ready,
    ApplyingChanges,
    Invalid,
    Error,
    Conflict,
}

impl PolicyPhase {
    /// Severity, ascending
    #[must_use]
    pub fn ordinal(self) -> i8 {
        match self {
            PolicyPhase::Unknown => -1,
            PolicyPhase::Ready => 0,
            PolicyPhase::ApplyingChanges => 1,
            PolicyPhase::Invalid => 2,
            PolicyPhase::Error => 3,
            PolicyPhase::Conflict => 4,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyPhase::Unknown => "Unknown",
            PolicyPhase::Ready => "Ready",
            PolicyPhase::ApplyingChanges => "ApplyingChanges",
            PolicyPhase::Invalid => "Invalid",
            PolicyPhase::Error => "Error",
            PolicyPhase::Conflict => "Conflict",
        }
    }

    pub const ALL: [PolicyPhase; 6] = [
        PolicyPhase::Unknown,
        PolicyPhase::Ready,
        PolicyPhase::ApplyingChanges,
        PolicyPhase::Invalid,
        PolicyPhase::Error,
        PolicyPhase::Conflict,
    ];
}

impl fmt::Display for PolicyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of resource a policy is applied to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Elasticsearch,
    Kibana,
}

impl ResourceKind {
    /// Key used in `status.details` and in the `common.k8s.elastic.co/type` label
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Elasticsearch => crate::constants::ELASTICSEARCH_TYPE,
            ResourceKind::Kibana => crate::constants::KIBANA_TYPE,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatusError {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub version: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Status of the policy on a single resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePolicyStatus {
    #[serde(default)]
    pub phase: PolicyPhase,
    /// File settings version reported by the Elasticsearch cluster (Elasticsearch only)
    #[serde(default, skip_serializing_if = "is_zero")]
    pub current_version: i64,
    /// File settings version written by the controller (Elasticsearch only)
    #[serde(default, skip_serializing_if = "is_zero")]
    pub expected_version: i64,
    #[serde(default)]
    pub error: PolicyStatusError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StackConfigPolicyStatus {
    /// Resource kind -> `namespace/name` -> status
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, BTreeMap<String, ResourcePolicyStatus>>,
    /// Number of resources the policy applies to
    #[serde(default)]
    pub resources: i32,
    /// Number of resources in phase Ready
    #[serde(default)]
    pub ready: i32,
    /// Number of resources in phase Error
    #[serde(default)]
    pub errors: i32,
    /// `<ready>/<resources>`
    #[serde(default)]
    pub ready_count: String,
    #[serde(default)]
    pub phase: PolicyPhase,
    #[serde(default)]
    pub observed_generation: i64,
}

impl StackConfigPolicyStatus {
    /// Fresh status for a reconcile pass: no resources, phase Ready.
    #[must_use]
    pub fn new(generation: Option<i64>) -> Self {
        let mut status = Self {
            observed_generation: generation.unwrap_or_default(),
            ..Default::default()
        };
        status.update();
        status
    }

    pub fn get(&self, kind: ResourceKind, resource: &str) -> Option<&ResourcePolicyStatus> {
        self.details.get(kind.as_str()).and_then(|m| m.get(resource))
    }

    /// Records an error for a resource. Only the first error per resource is kept.
    pub fn add_policy_error_for(
        &mut self,
        kind: ResourceKind,
        resource: &str,
        phase: PolicyPhase,
        message: impl Into<String>,
    ) -> Result<(), StatusError> {
        let statuses = self.details.entry(kind.as_str().to_string()).or_default();
        if statuses
            .get(resource)
            .is_some_and(|s| !s.error.message.is_empty())
        {
            return Err(StatusError::PolicyErrorExists {
                resource: resource.to_string(),
            });
        }
        statuses.insert(
            resource.to_string(),
            ResourcePolicyStatus {
                phase,
                error: PolicyStatusError {
                    version: 0,
                    message: message.into(),
                },
                ..Default::default()
            },
        );
        self.update();
        Ok(())
    }

    /// Classifies the observed state of a resource and stores it.
    ///
    /// `configs_applied` tells whether every pod of the resource already runs
    /// with the latest derived configuration.
    pub fn update_resource_status_phase(
        &mut self,
        kind: ResourceKind,
        resource: &str,
        mut status: ResourcePolicyStatus,
        configs_applied: bool,
    ) {
        status.phase = match kind {
            ResourceKind::Elasticsearch => classify_elasticsearch(&status, configs_applied),
            ResourceKind::Kibana => {
                if !configs_applied {
                    PolicyPhase::ApplyingChanges
                } else if !status.error.message.is_empty() {
                    PolicyPhase::Error
                } else {
                    PolicyPhase::Ready
                }
            }
        };
        self.details
            .entry(kind.as_str().to_string())
            .or_default()
            .insert(resource.to_string(), status);
        self.update();
    }

    /// Recomputes the counters and the policy phase from `details`.
    pub fn update(&mut self) {
        let mut resources = 0;
        let mut ready = 0;
        let mut errors = 0;
        let mut phase: Option<PolicyPhase> = None;
        for status in self.details.values().flat_map(BTreeMap::values) {
            resources += 1;
            match status.phase {
                PolicyPhase::Ready => ready += 1,
                PolicyPhase::Error => errors += 1,
                _ => {}
            }
            if phase.is_none_or(|p| status.phase.ordinal() > p.ordinal()) {
                phase = Some(status.phase);
            }
        }
        self.resources = resources;
        self.ready = ready;
        self.errors = errors;
        self.phase = phase.unwrap_or(PolicyPhase::Ready);
        self.ready_count = format!("{ready}/{resources}");
    }

    /// Whether the policy went from Ready to a phase needing attention.
    #[must_use]
    pub fn is_degraded(&self, prev: &Self) -> bool {
        prev.phase == PolicyPhase::Ready
            && self.phase != PolicyPhase::Ready
            && self.phase != PolicyPhase::ApplyingChanges
    }

    /// Number of resources per phase, for metrics
    #[must_use]
    pub fn phase_counts(&self) -> BTreeMap<&'static str, i64> {
        let mut counts: BTreeMap<&'static str, i64> =
            PolicyPhase::ALL.iter().map(|p| (p.as_str(), 0)).collect();
        for status in self.details.values().flat_map(BTreeMap::values) {
            *counts.entry(status.phase.as_str()).or_default() += 1;
        }
        counts
    }
}

fn classify_elasticsearch(status: &ResourcePolicyStatus, configs_applied: bool) -> PolicyPhase {
    if !configs_applied {
        return PolicyPhase::ApplyingChanges;
    }
    if status.current_version == 0 {
        return PolicyPhase::Unknown;
    }
    if !status.error.message.is_empty() {
        // an error reported for an older version is stale
        if status.expected_version > status.error.version {
            return PolicyPhase::ApplyingChanges;
        }
        return PolicyPhase::Error;
    }
    if status.current_version == status.expected_version {
        return PolicyPhase::Ready;
    }
    PolicyPhase::ApplyingChanges
}
