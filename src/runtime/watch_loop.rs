//! # Watch Loop
//!
//! Controller watch loop that monitors StackConfigPolicy resources and triggers
//! reconciliation when changes are detected.
//!
//! Besides the policies themselves, three kinds of objects requeue policies:
//! - Elasticsearch and Kibana resources, mapped to every policy whose namespace covers them
//! - Secrets, mapped to their soft owners and to the policies mounting them

use crate::constants::{WATCH_BACKOFF_MAX_MS, WATCH_BACKOFF_START_MS};
use crate::controller::reconciler::{reconcile, Reconciler};
use crate::controller::server::ServerState;
use crate::controller::watches::DynamicWatches;
use crate::crd::{Elasticsearch, Kibana, StackConfigPolicy};
use crate::ownership::{soft_owner_refs, POLICY_OWNER_KIND};
use crate::policy::in_scope;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::Api;
use kube::runtime::reflector::ObjectRef;
use kube::Client;
use kube_runtime::{controller, watcher, Controller};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Policies that may select the target now or may have selected it before.
///
/// A policy that stops selecting a target has to run again to reset or delete
/// what it wrote for it, so the selector is not consulted here: every policy
/// whose namespace covers the target is requeued.
pub fn policies_for_target(
    policies: &[Arc<StackConfigPolicy>],
    target: &ObjectMeta,
    operator_namespace: &str,
) -> Vec<ObjectRef<StackConfigPolicy>> {
    policies
        .iter()
        .filter(|policy| in_scope(policy, target, operator_namespace))
        .map(|policy| ObjectRef::new(policy.name_or_default()).within(policy.namespace_or_default()))
        .collect()
}

/// Soft owners of the secret, plus the policies copying it through a secret mount
pub fn policies_for_secret(secret: &Secret, watches: &DynamicWatches) -> Vec<ObjectRef<StackConfigPolicy>> {
    let mut refs: Vec<ObjectRef<StackConfigPolicy>> = soft_owner_refs(&secret.metadata)
        .unwrap_or_default()
        .into_iter()
        .filter(|owner| owner.kind == POLICY_OWNER_KIND)
        .map(|owner| ObjectRef::new(&owner.name).within(&owner.namespace))
        .collect();
    if let (Some(namespace), Some(name)) = (secret.metadata.namespace.as_deref(), secret.metadata.name.as_deref()) {
        refs.extend(
            watches
                .policies_watching(namespace, name)
                .into_iter()
                .map(|(ns, policy)| ObjectRef::new(&policy).within(&ns)),
        );
    }
    refs
}

/// Run the controller watch loop
///
/// Restarts the controller when its stream ends, until a shutdown signal
/// marks the server as not ready.
pub async fn run_watch_loop(
    client: Client,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
) -> Result<(), anyhow::Error> {
    let policies: Api<StackConfigPolicy> = Api::all(client.clone());
    let elasticsearches: Api<Elasticsearch> = Api::all(client.clone());
    let kibanas: Api<Kibana> = Api::all(client.clone());
    let secrets: Api<Secret> = Api::all(client);

    // Mark the server as not ready on SIGTERM/SIGINT
    let shutdown_server_state = Arc::clone(&server_state);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
        shutdown_server_state.is_ready.store(false, Ordering::Relaxed);
    });

    let backoff_duration_ms = Arc::new(AtomicU64::new(WATCH_BACKOFF_START_MS));
    let watch_restart_delay = reconciler.config.watch_restart_delay_duration();

    loop {
        if !server_state.is_ready.load(Ordering::Relaxed) {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        info!("Starting controller watch loop...");
        let controller = Controller::new(policies.clone(), watcher::Config::default().any_semantic())
            .with_config(
                controller::Config::default().concurrency(reconciler.config.max_concurrent_reconciliations),
            );

        let es_store = controller.store();
        let kb_store = controller.store();
        let es_operator_namespace = reconciler.config.operator_namespace.clone();
        let kb_operator_namespace = reconciler.config.operator_namespace.clone();
        let watches = reconciler.watches.clone();
        let backoff = Arc::clone(&backoff_duration_ms);

        controller
            .watches(elasticsearches.clone(), watcher::Config::default(), move |es: Elasticsearch| {
                policies_for_target(&es_store.state(), &es.metadata, &es_operator_namespace)
            })
            .watches(kibanas.clone(), watcher::Config::default(), move |kibana: Kibana| {
                policies_for_target(&kb_store.state(), &kibana.metadata, &kb_operator_namespace)
            })
            .watches(secrets.clone(), watcher::Config::default(), move |secret: Secret| {
                policies_for_secret(&secret, &watches)
            })
            .shutdown_on_signal()
            .run(reconcile, handle_reconciliation_error, Arc::clone(&reconciler))
            .filter_map(move |x| {
                let backoff = Arc::clone(&backoff);
                async move {
                    match x {
                        Ok((object, action)) => {
                            backoff.store(WATCH_BACKOFF_START_MS, Ordering::Relaxed);
                            debug!(policy = %object, action = ?action, "watch.event.reconciled");
                            Some(())
                        }
                        // already handled by the error policy
                        Err(controller::Error::ReconcilerFailed(e, object)) => {
                            debug!(policy = %object, error = %e, "watch.event.reconciliation_failed");
                            None
                        }
                        Err(e) => {
                            let error_string = format!("{e:?}");
                            handle_watch_stream_error(
                                &error_string,
                                &backoff,
                                WATCH_BACKOFF_MAX_MS,
                                watch_restart_delay,
                            )
                            .await
                        }
                    }
                }
            })
            .for_each(|()| futures::future::ready(()))
            .await;

        if !server_state.is_ready.load(Ordering::Relaxed) {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        warn!(
            "Controller watch stream ended, restarting in {} seconds...",
            watch_restart_delay.as_secs()
        );
        tokio::time::sleep(watch_restart_delay).await;
    }

    info!("Controller stopped gracefully");
    Ok(())
}
