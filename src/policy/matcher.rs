use crate::crd::StackConfigPolicy;
use crate::labels::{self, SelectorError};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Whether `policy` applies to the object described by `target`.
///
/// Policies in the operator namespace apply cluster-wide; any other policy
/// only applies to objects in its own namespace. Within that scope the
/// resource selector has to match the object labels.
pub fn policy_matches(
    policy: &StackConfigPolicy,
    target: &ObjectMeta,
    operator_namespace: &str,
) -> Result<bool, SelectorError> {
    if !in_scope(policy, target, operator_namespace) {
        return Ok(false);
    }
    labels::matches(&policy.spec.resource_selector, target.labels.as_ref())
}

/// Whether the namespace of `policy` lets it select `target` at all,
/// regardless of its resource selector.
pub fn in_scope(policy: &StackConfigPolicy, target: &ObjectMeta, operator_namespace: &str) -> bool {
    let policy_namespace = policy.metadata.namespace.as_deref().unwrap_or_default();
    let target_namespace = target.namespace.as_deref().unwrap_or_default();
    policy_namespace == operator_namespace || policy_namespace == target_namespace
}

/// Policies applying to `target`, excluding those being deleted.
pub fn matching_policies<'a>(
    policies: &'a [StackConfigPolicy],
    target: &ObjectMeta,
    operator_namespace: &str,
) -> Result<Vec<&'a StackConfigPolicy>, SelectorError> {
    let mut matching = Vec::new();
    for policy in policies {
        if policy.is_being_deleted() {
            continue;
        }
        if policy_matches(policy, target, operator_namespace)? {
            matching.push(policy);
        }
    }
    Ok(matching)
}
