//! # Elasticsearch Targets
//!
//! For every cluster selected by the policy:
//!
//! 1. Check the cluster runs a version supporting file-based settings
//! 2. Wait for its file settings secret, created by the Elasticsearch controller
//! 3. Refuse clusters already configured by a policy that no longer applies to them
//! 4. Merge every policy selecting the cluster
//! 5. Write the file settings, the secret mount copies and the node config
//! 6. Read back the reserved state to classify the cluster
//!
//! Failures on one cluster are recorded in its status entry and never stop
//! the other clusters from being configured.

use super::orphans::ConfiguredTargets;
use super::secrets::{new_es_config_secret, new_mounted_secret, reconcile_secret};
use super::status::elasticsearch_resource_status;
use super::types::{PassResult, Reconciler, ReconcilerError};
use crate::client::EventType;
use crate::constants::{
    CONFIG_MOUNTS_HASH_ANNOTATION, ES_CLUSTER_NAME_LABEL, EVENT_REASON_CONFLICT,
    EVENT_REASON_UNEXPECTED, FILE_SETTINGS_MIN_VERSION, SETTINGS_HASH_ANNOTATION,
};
use crate::crd::{
    namespaced_name, Elasticsearch, ElasticsearchConfigPolicySpec, PolicyPhase, ResourceKind,
    StackConfigPolicy, StackConfigPolicyStatus,
};
use crate::filesettings::{new_settings_secret, settings_secret_name};
use crate::observability;
use crate::ownership::{soft_owner_refs, SoftOwnerRef};
use crate::policy::{matching_policies, merge_policies, policy_matches, MergedPolicy};
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use semver::Version;
use tracing::{debug, info, warn};

/// Why the file settings of a cluster can't be managed
fn check_version(es: &Elasticsearch) -> Result<(), String> {
    let unsupported = |actual: &str| {
        format!(
            "invalid version to configure resource Elasticsearch {}: actual {}, expected >= {}",
            namespaced_name(&es.namespace().unwrap_or_default(), &es.name_any()),
            actual,
            FILE_SETTINGS_MIN_VERSION
        )
    };
    let min = Version::parse(FILE_SETTINGS_MIN_VERSION).map_err(|e| e.to_string())?;
    match Version::parse(&es.spec.version) {
        Ok(actual) if actual >= min => Ok(()),
        Ok(_) => Err(unsupported(&es.spec.version)),
        Err(e) => Err(format!("{}: {e}", unsupported(&es.spec.version))),
    }
}

/// First owner recorded on `secret` that is not among the policies applying to the target
pub(super) fn foreign_owner(secret: &Secret, applying: &[SoftOwnerRef]) -> Result<Option<SoftOwnerRef>, ReconcilerError> {
    Ok(soft_owner_refs(&secret.metadata)?
        .into_iter()
        .find(|owner| !applying.iter().any(|a| a.namespace == owner.namespace && a.name == owner.name)))
}

/// Whether every pod of the workload reports `hash` in `annotation`. No pods means not applied.
pub(super) async fn pods_have_hash(
    ctx: &Reconciler,
    namespace: &str,
    label_selector: &str,
    annotation: &str,
    hash: &str,
) -> Result<bool, ReconcilerError> {
    let pods = ctx.cluster.list_pods(namespace, label_selector).await?;
    Ok(!pods.is_empty()
        && pods
            .iter()
            .all(|pod| pod.annotations().get(annotation).map(String::as_str) == Some(hash)))
}

/// Elasticsearch clusters in scope of the policy, not being deleted
async fn selected_clusters(
    ctx: &Reconciler,
    policy: &StackConfigPolicy,
) -> Result<Vec<Elasticsearch>, ReconcilerError> {
    let operator_namespace = ctx.config.operator_namespace.as_str();
    let scope = (policy.namespace_or_default() != operator_namespace).then(|| policy.namespace_or_default());
    let mut selected = Vec::new();
    for es in ctx.cluster.list_elasticsearches(scope).await? {
        if es.metadata.deletion_timestamp.is_some() {
            debug!("Elasticsearch {} is being deleted, skipping", es.name_any());
            continue;
        }
        if policy_matches(policy, &es.metadata, operator_namespace)? {
            selected.push(es);
        }
    }
    Ok(selected)
}

/// Configures every Elasticsearch cluster selected by `policy`.
///
/// Returns an error only when the pass must stop; per-cluster problems land in `status`.
pub async fn reconcile_elasticsearch(
    ctx: &Reconciler,
    policy: &StackConfigPolicy,
    all_policies: &[StackConfigPolicy],
    status: &mut StackConfigPolicyStatus,
    configured: &mut ConfiguredTargets,
    result: &mut PassResult,
) -> Result<(), ReconcilerError> {
    let operator_namespace = ctx.config.operator_namespace.as_str();

    for es in selected_clusters(ctx, policy).await? {
        let es_namespace = es.namespace().unwrap_or_default();
        let es_name = es.name_any();
        let resource = namespaced_name(&es_namespace, &es_name);
        configured.elasticsearch.insert(resource.clone());

        if let Err(message) = check_version(&es) {
            warn!("{}", message);
            ctx.cluster
                .publish_event(policy, EventType::Warning, EVENT_REASON_UNEXPECTED, message.clone())
                .await;
            status.add_policy_error_for(ResourceKind::Elasticsearch, &resource, PolicyPhase::Error, message)?;
            continue;
        }

        let Some(current) = ctx
            .cluster
            .get_secret(&es_namespace, &settings_secret_name(&es_name))
            .await?
        else {
            info!(
                "File settings secret of {} does not exist yet, requeueing",
                resource
            );
            observability::increment_requeues_total("file-settings-missing");
            result.requeue(ctx.config.default_requeue_duration());
            continue;
        };

        let applying = matching_policies(all_policies, &es.metadata, operator_namespace)?;
        let owners: Vec<SoftOwnerRef> = applying
            .iter()
            .map(|p| SoftOwnerRef::policy(p.namespace_or_default(), p.name_or_default()))
            .collect();
        if let Some(other) = foreign_owner(&current, &owners)? {
            let message = format!(
                "conflict: resource Elasticsearch {} already configured by StackConfigPolicy {}",
                resource, other
            );
            warn!("{}", message);
            ctx.cluster
                .publish_event(policy, EventType::Warning, EVENT_REASON_CONFLICT, message.clone())
                .await;
            status.add_policy_error_for(ResourceKind::Elasticsearch, &resource, PolicyPhase::Conflict, message)?;
            continue;
        }

        let merged = match merge_policies::<ElasticsearchConfigPolicySpec>(applying) {
            Ok(merged) => merged,
            Err(e) => {
                warn!("Cannot merge policies for {}: {}", resource, e);
                status.add_policy_error_for(
                    ResourceKind::Elasticsearch,
                    &resource,
                    PolicyPhase::Invalid,
                    e.to_string(),
                )?;
                continue;
            }
        };

        let settings = match new_settings_secret(
            &es_namespace,
            &es_name,
            Some(&current),
            Some(&merged.spec),
            &merged.policy_refs,
            &merged.secure_settings,
        ) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Cannot build file settings for {}: {}", resource, e);
                status.add_policy_error_for(ResourceKind::Elasticsearch, &resource, PolicyPhase::Error, e.to_string())?;
                continue;
            }
        };
        let previous_hash = current
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(SETTINGS_HASH_ANNOTATION));
        if previous_hash != Some(&settings.hash) {
            observability::increment_file_settings_version_bumps();
        }
        reconcile_secret(ctx.cluster.as_ref(), settings.secret).await?;

        if let Some(message) = reconcile_secret_mounts(ctx, &es_namespace, &es_name, &merged).await? {
            warn!("{}", message);
            status.add_policy_error_for(ResourceKind::Elasticsearch, &resource, PolicyPhase::Error, message)?;
            result.requeue(ctx.config.default_requeue_duration());
            continue;
        }

        let es_config = new_es_config_secret(&es_namespace, &es_name, &merged.spec, &merged.policy_refs)?;
        reconcile_secret(ctx.cluster.as_ref(), es_config.secret).await?;

        let configs_applied = pods_have_hash(
            ctx,
            &es_namespace,
            &format!("{ES_CLUSTER_NAME_LABEL}={es_name}"),
            CONFIG_MOUNTS_HASH_ANNOTATION,
            &es_config.hash,
        )
        .await?;

        let cluster_state = match ctx.es_clients.client_for(&es).await {
            Ok(client) => client.get_cluster_state().await,
            Err(e) => Err(e),
        };
        match cluster_state {
            Ok(state) => status.update_resource_status_phase(
                ResourceKind::Elasticsearch,
                &resource,
                elasticsearch_resource_status(state.file_settings(), settings.version),
                configs_applied,
            ),
            Err(e) => {
                warn!("Cannot read cluster state of {}: {}", resource, e);
                status.add_policy_error_for(ResourceKind::Elasticsearch, &resource, PolicyPhase::Unknown, e.to_string())?;
                observability::increment_requeues_total("elasticsearch-unreachable");
                result.requeue(ctx.config.default_requeue_duration());
            }
        }
    }

    // secrets the mounts of this policy are copied from
    let mounts = policy
        .spec
        .elasticsearch
        .secret_mounts
        .iter()
        .flatten()
        .map(|m| (policy.namespace_or_default().to_string(), m.secret_name.clone()));
    ctx.watches
        .replace(policy.namespace_or_default(), policy.name_or_default(), mounts);

    Ok(())
}

/// Copies the mounted secrets next to the cluster.
///
/// Returns a message when a source secret does not exist.
async fn reconcile_secret_mounts(
    ctx: &Reconciler,
    es_namespace: &str,
    es_name: &str,
    merged: &MergedPolicy<ElasticsearchConfigPolicySpec>,
) -> Result<Option<String>, ReconcilerError> {
    for (source_namespace, mount) in &merged.secret_mount_sources {
        let Some(source) = ctx.cluster.get_secret(source_namespace, &mount.secret_name).await? else {
            return Ok(Some(format!(
                "secret {} referenced in secretMounts not found",
                namespaced_name(source_namespace, &mount.secret_name)
            )));
        };
        let copy = new_mounted_secret(es_namespace, es_name, &source, mount, &merged.policy_refs);
        reconcile_secret(ctx.cluster.as_ref(), copy).await?;
    }
    Ok(None)
}
