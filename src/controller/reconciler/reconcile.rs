//! # Reconciliation Logic
//!
//! Main reconciliation loop for StackConfigPolicy resources.
//!
//! A pass starts from a fresh status, configures every selected target, then
//! releases the targets the policy no longer selects. The status is written
//! once at the end, so an interrupted pass leaves the previous status intact.

use super::elasticsearch::reconcile_elasticsearch;
use super::kibana::reconcile_kibana;
use super::orphans::{sweep_orphans, ConfiguredTargets};
use super::status::persist_status;
use super::types::{PassResult, Reconciler, ReconcilerError};
use crate::client::EventType;
use crate::constants::{
    EVENT_REASON_RECONCILIATION_ERROR, EVENT_REASON_VALIDATION, POLICY_FINALIZER,
};
use crate::crd::{PolicyPhase, ResourceKind, StackConfigPolicy, StackConfigPolicyStatus};
use crate::observability;
use crate::ownership::SoftOwnerRef;
use crate::policy::validate_policy;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn, Instrument};

const ENTERPRISE_DISABLED_MESSAGE: &str =
    "StackConfigPolicy is an enterprise feature. Enterprise features are disabled";

/// Main reconciliation function
/// Errors are handled by error_policy(), which applies the per-policy backoff
pub async fn reconcile(
    policy: Arc<StackConfigPolicy>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let span = tracing::info_span!(
        "reconcile",
        resource.name = policy.name_or_default(),
        resource.namespace = policy.namespace_or_default(),
        resource.kind = "StackConfigPolicy",
        phase = tracing::field::Empty,
    );
    async move {
        let start = Instant::now();
        observability::increment_reconciliations();

        let result = reconcile_policy(&policy, &ctx).await;

        observability::observe_reconciliation_duration(start.elapsed().as_secs_f64());
        if result.is_err() {
            observability::increment_reconciliation_errors();
        }
        result
    }
    .instrument(span)
    .await
}

async fn reconcile_policy(policy: &StackConfigPolicy, ctx: &Reconciler) -> Result<Action, ReconcilerError> {
    let namespace = policy.namespace_or_default();
    let name = policy.name_or_default();
    info!("Reconciling StackConfigPolicy {}/{}", namespace, name);

    // the cached object may be stale
    let Some(mut policy) = ctx.cluster.get_policy(namespace, name).await? else {
        info!("StackConfigPolicy {}/{} not found, cleaning up", namespace, name);
        on_delete(ctx, namespace, name).await?;
        return Ok(Action::await_change());
    };

    if policy.is_being_deleted() {
        info!("StackConfigPolicy {}/{} is being deleted, cleaning up", namespace, name);
        on_delete(ctx, namespace, name).await?;
        ctx.cluster.remove_finalizer(&policy, POLICY_FINALIZER).await?;
        return Ok(Action::await_change());
    }

    if !policy
        .metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|f| f == POLICY_FINALIZER))
    {
        ctx.cluster.add_finalizer(&policy, POLICY_FINALIZER).await?;
        // the status write is guarded by the resource version the finalizer bumped
        match ctx.cluster.get_policy(namespace, name).await? {
            Some(refreshed) => policy = refreshed,
            None => return Ok(Action::await_change()),
        }
    }

    let mut status = StackConfigPolicyStatus::new(policy.metadata.generation);
    let mut pass = PassResult::default();
    if let Err(e) = do_reconcile(ctx, &policy, &mut status, &mut pass).await {
        pass.fail(e);
    }
    tracing::Span::current().record("phase", status.phase.as_str());

    match persist_status(ctx, &policy, &status).await {
        Ok(()) => {}
        Err(e) if e.is_conflict() => {
            debug!("Status of {}/{} changed concurrently, requeueing", namespace, name);
            observability::increment_requeues_total("status-conflict");
            return Ok(Action::requeue(Duration::ZERO));
        }
        Err(e) => {
            warn!("Failed to update status of {}/{}: {}", namespace, name, e);
            pass.fail(e.into());
        }
    }

    if let Some(e) = pass.error {
        error!("Reconciliation of {}/{} failed: {}", namespace, name, e);
        if !matches!(e, ReconcilerError::Validation(_)) {
            ctx.cluster
                .publish_event(
                    &policy,
                    EventType::Warning,
                    EVENT_REASON_RECONCILIATION_ERROR,
                    e.to_string(),
                )
                .await;
        }
        return Err(e);
    }

    if let Ok(mut states) = ctx.backoff_states.lock() {
        if let Some(state) = states.get_mut(&policy.key()) {
            state.reset();
        }
    }

    let requeue_after = match pass.requeue_after {
        Some(after) => Some(after),
        None if status.phase != PolicyPhase::Ready => {
            observability::increment_requeues_total("not-ready");
            Some(ctx.config.default_requeue_duration())
        }
        None => None,
    };
    info!(
        "Reconciled StackConfigPolicy {}/{}: phase={} ready={}",
        namespace, name, status.phase, status.ready_count
    );
    Ok(match requeue_after {
        Some(after) => Action::requeue(after),
        None => Action::await_change(),
    })
}

/// Computes `status` for the policy and writes the derived secrets.
///
/// An `Err` stops the pass; `status` holds whatever was computed until then.
async fn do_reconcile(
    ctx: &Reconciler,
    policy: &StackConfigPolicy,
    status: &mut StackConfigPolicyStatus,
    pass: &mut PassResult,
) -> Result<(), ReconcilerError> {
    if !ctx.license.enterprise_features_enabled().await {
        warn!("{}", ENTERPRISE_DISABLED_MESSAGE);
        ctx.cluster
            .publish_event(
                policy,
                EventType::Warning,
                EVENT_REASON_RECONCILIATION_ERROR,
                ENTERPRISE_DISABLED_MESSAGE.to_string(),
            )
            .await;
        observability::increment_requeues_total("license");
        pass.requeue(ctx.config.license_requeue_duration());
        return Ok(());
    }

    if let Err(errors) = validate_policy(policy) {
        warn!("StackConfigPolicy {} is invalid: {}", policy.key(), errors);
        status.phase = PolicyPhase::Invalid;
        ctx.cluster
            .publish_event(
                policy,
                EventType::Warning,
                EVENT_REASON_VALIDATION,
                errors.to_string(),
            )
            .await;
        return Err(errors.into());
    }

    let all_policies = ctx.cluster.list_policies().await?;
    let owner = SoftOwnerRef::policy(policy.namespace_or_default(), policy.name_or_default());
    let scope = scope_of(ctx, policy);
    let mut configured = ConfiguredTargets::default();

    reconcile_elasticsearch(ctx, policy, &all_policies, status, &mut configured, pass).await?;
    sweep_orphans(ctx, &owner, scope, &configured, Some(ResourceKind::Elasticsearch)).await?;

    reconcile_kibana(ctx, policy, &all_policies, status, &mut configured).await?;
    sweep_orphans(ctx, &owner, scope, &configured, Some(ResourceKind::Kibana)).await?;

    Ok(())
}

/// `None` for policies in the operator namespace, which may select targets anywhere
fn scope_of<'a>(ctx: &Reconciler, policy: &'a StackConfigPolicy) -> Option<&'a str> {
    let namespace = policy.namespace_or_default();
    (namespace != ctx.config.operator_namespace).then_some(namespace)
}

/// Releases everything the policy configured.
async fn on_delete(ctx: &Reconciler, namespace: &str, name: &str) -> Result<(), ReconcilerError> {
    ctx.watches.remove(namespace, name);
    let scope = (namespace != ctx.config.operator_namespace).then_some(namespace);
    sweep_orphans(
        ctx,
        &SoftOwnerRef::policy(namespace, name),
        scope,
        &ConfiguredTargets::default(),
        None,
    )
    .await?;
    if let Ok(mut states) = ctx.backoff_states.lock() {
        states.remove(&crate::crd::namespaced_name(namespace, name));
    }
    Ok(())
}
