//! # Orphaned Secrets
//!
//! Derived secrets left behind by a policy on targets it no longer configures.
//!
//! The `on-delete` label decides what happens to them:
//! - `reset`: file settings secrets are owned by the Elasticsearch controller,
//!   so their content is reset to an empty state instead of being deleted
//! - `delete`: every other derived secret is deleted
//!
//! A secret still owned by other policies only loses this owner. The
//! remaining owners are requeued by the secret watch and rewrite it.

use super::secrets::reconcile_secret;
use super::types::{Reconciler, ReconcilerError};
use crate::constants::{
    ELASTICSEARCH_TYPE, ES_CLUSTER_NAME_LABEL, KIBANA_NAME_LABEL, KIBANA_TYPE, ON_DELETE_DELETE,
    ON_DELETE_LABEL, ON_DELETE_RESET, SOFT_OWNER_KIND_LABEL, TYPE_LABEL,
};
use crate::crd::{namespaced_name, ResourceKind};
use crate::filesettings::new_settings_secret;
use crate::labels::equality_query;
use crate::observability;
use crate::ownership::{is_soft_owned_by, remove_soft_owner, SoftOwnerRef, POLICY_OWNER_KIND};
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// `namespace/name` of the targets configured during the current pass
#[derive(Debug, Clone, Default)]
pub struct ConfiguredTargets {
    pub elasticsearch: BTreeSet<String>,
    pub kibana: BTreeSet<String>,
}

impl ConfiguredTargets {
    fn contains(&self, kind: ResourceKind, resource: &str) -> bool {
        match kind {
            ResourceKind::Elasticsearch => self.elasticsearch.contains(resource),
            ResourceKind::Kibana => self.kibana.contains(resource),
        }
    }
}

/// Target of a derived secret, from its type and name labels
fn secret_target(secret: &Secret) -> Option<(ResourceKind, String)> {
    let labels = secret.metadata.labels.as_ref()?;
    let (kind, name_label) = match labels.get(TYPE_LABEL)?.as_str() {
        ELASTICSEARCH_TYPE => (ResourceKind::Elasticsearch, ES_CLUSTER_NAME_LABEL),
        KIBANA_TYPE => (ResourceKind::Kibana, KIBANA_NAME_LABEL),
        _ => return None,
    };
    Some((kind, labels.get(name_label)?.clone()))
}

/// Resets or deletes the secrets owned by `owner` whose target is not in `configured`.
///
/// `kind` restricts the sweep to one target kind; `None` sweeps both, which is
/// what happens when the policy is deleted.
pub async fn sweep_orphans(
    ctx: &Reconciler,
    owner: &SoftOwnerRef,
    scope: Option<&str>,
    configured: &ConfiguredTargets,
    kind: Option<ResourceKind>,
) -> Result<(), ReconcilerError> {
    let mut selector = BTreeMap::from([(SOFT_OWNER_KIND_LABEL.to_string(), POLICY_OWNER_KIND.to_string())]);
    if let Some(kind) = kind {
        selector.insert(TYPE_LABEL.to_string(), kind.as_str().to_string());
    }
    let secrets = ctx.cluster.list_secrets(scope, &equality_query(&selector)).await?;

    for secret in secrets {
        if !is_soft_owned_by(&secret.metadata, owner)? {
            continue;
        }
        let Some((target_kind, target_name)) = secret_target(&secret) else {
            warn!(
                "Secret {}/{} owned by {} has no target labels, skipping",
                secret.namespace().unwrap_or_default(),
                secret.name_any(),
                owner
            );
            continue;
        };
        let namespace = secret.namespace().unwrap_or_default();
        if configured.contains(target_kind, &namespaced_name(&namespace, &target_name)) {
            continue;
        }

        let on_delete = secret
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(ON_DELETE_LABEL))
            .cloned()
            .unwrap_or_default();
        match on_delete.as_str() {
            ON_DELETE_RESET => reset_file_settings(ctx, owner, secret, &namespace, &target_name).await?,
            ON_DELETE_DELETE => release_or_delete(ctx, owner, secret).await?,
            other => debug!(
                "Secret {}/{} has on-delete {:?}, leaving it",
                namespace,
                secret.name_any(),
                other
            ),
        }
    }
    Ok(())
}

async fn reset_file_settings(
    ctx: &Reconciler,
    owner: &SoftOwnerRef,
    secret: Secret,
    es_namespace: &str,
    es_name: &str,
) -> Result<(), ReconcilerError> {
    let mut released = secret.clone();
    if remove_soft_owner(&mut released.metadata, owner)? > 0 {
        info!(
            "Releasing {} from file settings of {}/{}",
            owner, es_namespace, es_name
        );
        ctx.cluster.replace_secret(&released).await?;
        return Ok(());
    }

    match ctx.cluster.get_elasticsearch(es_namespace, es_name).await? {
        Some(es) if es.metadata.deletion_timestamp.is_none() => {}
        _ => {
            debug!(
                "Elasticsearch {}/{} is gone, not resetting its file settings",
                es_namespace, es_name
            );
            return Ok(());
        }
    }

    let reset = new_settings_secret(es_namespace, es_name, Some(&secret), None, &[], &[])?;
    info!(
        "Resetting file settings of {}/{} to version {}",
        es_namespace, es_name, reset.version
    );
    reconcile_secret(ctx.cluster.as_ref(), reset.secret).await?;
    observability::increment_orphaned_secrets(ON_DELETE_RESET);
    Ok(())
}

async fn release_or_delete(ctx: &Reconciler, owner: &SoftOwnerRef, secret: Secret) -> Result<(), ReconcilerError> {
    let namespace = secret.namespace().unwrap_or_default();
    let name = secret.name_any();
    let mut released = secret;
    if remove_soft_owner(&mut released.metadata, owner)? > 0 {
        info!("Releasing {} from secret {}/{}", owner, namespace, name);
        ctx.cluster.replace_secret(&released).await?;
        return Ok(());
    }
    info!("Deleting orphaned secret {}/{}", namespace, name);
    ctx.cluster.delete_secret(&namespace, &name).await?;
    observability::increment_orphaned_secrets(ON_DELETE_DELETE);
    Ok(())
}
