//! # Kibana Targets
//!
//! Kibana has no reserved state to read back: an instance is Ready once all
//! its pods report the hash of the config secret written for it. Instances
//! whose merged policies carry no config get no secret and are Ready.

use super::elasticsearch::{foreign_owner, pods_have_hash};
use super::orphans::ConfiguredTargets;
use super::secrets::{kibana_config_secret_name, new_kibana_config_secret, reconcile_secret};
use super::types::{Reconciler, ReconcilerError};
use crate::client::EventType;
use crate::constants::{EVENT_REASON_CONFLICT, KIBANA_CONFIG_HASH_ANNOTATION, KIBANA_NAME_LABEL};
use crate::crd::{
    namespaced_name, Kibana, KibanaConfigPolicySpec, PolicyPhase, ResourceKind, ResourcePolicyStatus,
    StackConfigPolicy, StackConfigPolicyStatus,
};
use crate::ownership::SoftOwnerRef;
use crate::policy::{matching_policies, merge_policies, policy_matches};
use crate::settings;
use kube::ResourceExt;
use tracing::{debug, warn};

async fn selected_instances(ctx: &Reconciler, policy: &StackConfigPolicy) -> Result<Vec<Kibana>, ReconcilerError> {
    let operator_namespace = ctx.config.operator_namespace.as_str();
    let scope = (policy.namespace_or_default() != operator_namespace).then(|| policy.namespace_or_default());
    let mut selected = Vec::new();
    for kibana in ctx.cluster.list_kibanas(scope).await? {
        if kibana.metadata.deletion_timestamp.is_some() {
            debug!("Kibana {} is being deleted, skipping", kibana.name_any());
            continue;
        }
        if policy_matches(policy, &kibana.metadata, operator_namespace)? {
            selected.push(kibana);
        }
    }
    Ok(selected)
}

/// Configures every Kibana instance selected by `policy`.
pub async fn reconcile_kibana(
    ctx: &Reconciler,
    policy: &StackConfigPolicy,
    all_policies: &[StackConfigPolicy],
    status: &mut StackConfigPolicyStatus,
    configured: &mut ConfiguredTargets,
) -> Result<(), ReconcilerError> {
    let operator_namespace = ctx.config.operator_namespace.as_str();

    for kibana in selected_instances(ctx, policy).await? {
        let kb_namespace = kibana.namespace().unwrap_or_default();
        let kb_name = kibana.name_any();
        let resource = namespaced_name(&kb_namespace, &kb_name);

        let applying = matching_policies(all_policies, &kibana.metadata, operator_namespace)?;
        let owners: Vec<SoftOwnerRef> = applying
            .iter()
            .map(|p| SoftOwnerRef::policy(p.namespace_or_default(), p.name_or_default()))
            .collect();

        let current = ctx
            .cluster
            .get_secret(&kb_namespace, &kibana_config_secret_name(&kb_name))
            .await?;
        if let Some(other) = current.as_ref().map(|c| foreign_owner(c, &owners)).transpose()?.flatten() {
            let message = format!(
                "conflict: resource Kibana {} already configured by StackConfigPolicy {}",
                resource, other
            );
            warn!("{}", message);
            ctx.cluster
                .publish_event(policy, EventType::Warning, EVENT_REASON_CONFLICT, message.clone())
                .await;
            configured.kibana.insert(resource.clone());
            status.add_policy_error_for(ResourceKind::Kibana, &resource, PolicyPhase::Error, message)?;
            continue;
        }

        let merged = match merge_policies::<KibanaConfigPolicySpec>(applying) {
            Ok(merged) => merged,
            Err(e) => {
                warn!("Cannot merge policies for {}: {}", resource, e);
                configured.kibana.insert(resource.clone());
                status.add_policy_error_for(ResourceKind::Kibana, &resource, PolicyPhase::Invalid, e.to_string())?;
                continue;
            }
        };

        let configs_applied = if settings::is_empty(merged.spec.config.as_ref()) {
            true
        } else {
            configured.kibana.insert(resource.clone());
            let config_secret = new_kibana_config_secret(
                &kb_namespace,
                &kb_name,
                &merged.spec,
                &merged.policy_refs,
                &merged.secure_settings,
            )?;
            reconcile_secret(ctx.cluster.as_ref(), config_secret.secret).await?;
            pods_have_hash(
                ctx,
                &kb_namespace,
                &format!("{KIBANA_NAME_LABEL}={kb_name}"),
                KIBANA_CONFIG_HASH_ANNOTATION,
                &config_secret.hash,
            )
            .await?
        };

        status.update_resource_status_phase(
            ResourceKind::Kibana,
            &resource,
            ResourcePolicyStatus::default(),
            configs_applied,
        );
    }
    Ok(())
}
