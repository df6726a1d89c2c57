//! # Types
//!
//! Core types for the reconciler.

use crate::client::{ClientError, ClusterClient, ElasticsearchClientProvider, LicenseChecker};
use crate::config::ControllerConfig;
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::watches::DynamicWatches;
use crate::crd::StatusError;
use crate::filesettings::FileSettingsError;
use crate::labels::SelectorError;
use crate::ownership::OwnershipError;
use crate::policy::ValidationErrors;
use crate::settings::SettingsError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("invalid policy: {0}")]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    FileSettings(#[from] FileSettingsError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Ownership(#[from] OwnershipError),

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error(transparent)]
    Selector(#[from] SelectorError),

    #[error("Reconciliation failed: {0}")]
    ReconciliationFailed(#[from] anyhow::Error),
}

/// Backoff state for a specific policy
/// Tracks error count and backoff calculator for progressive retries
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_minutes, max_minutes),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Outcome of one reconcile pass besides the computed status.
///
/// Targets never abort the pass on their own errors, they only ask for an
/// earlier requeue. `error` is set when the pass had to stop.
#[derive(Debug, Default)]
pub struct PassResult {
    pub requeue_after: Option<Duration>,
    pub error: Option<ReconcilerError>,
}

impl PassResult {
    /// Keeps the shortest requested delay
    pub fn requeue(&mut self, after: Duration) {
        self.requeue_after = Some(match self.requeue_after {
            Some(current) => current.min(after),
            None => after,
        });
    }

    pub fn fail(&mut self, error: ReconcilerError) {
        self.error.get_or_insert(error);
    }
}

/// Shared reconciliation context
pub struct Reconciler {
    pub cluster: Arc<dyn ClusterClient>,
    pub es_clients: Arc<dyn ElasticsearchClientProvider>,
    pub license: Arc<dyn LicenseChecker>,
    pub config: ControllerConfig,
    // Secrets referenced by secretMounts, per policy
    pub watches: DynamicWatches,
    // Backoff state per policy (identified by namespace/name), driven by error_policy()
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .field("watches", &self.watches)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        es_clients: Arc<dyn ElasticsearchClientProvider>,
        license: Arc<dyn LicenseChecker>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            cluster,
            es_clients,
            license,
            config,
            watches: DynamicWatches::new(),
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn new_backoff_state(&self) -> BackoffState {
        BackoffState::new(self.config.backoff_min_minutes, self.config.backoff_max_minutes)
    }
}
