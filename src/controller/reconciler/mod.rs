//! # Reconciler
//!
//! Core reconciliation logic for `StackConfigPolicy` resources.
//!
//! The reconciler:
//! - Watches `StackConfigPolicy` resources across all namespaces
//! - Merges every policy selecting an Elasticsearch cluster or Kibana instance
//! - Writes the derived secrets consumed by the workload controllers
//! - Reads back the reserved state of each cluster to report progress
//! - Resets or deletes derived secrets of targets that are no longer selected
//!
//! ## Reconciliation Flow
//!
//! 1. Re-read the policy; clean up if it is gone or being deleted
//! 2. Check the enterprise license and validate the policy
//! 3. Configure Elasticsearch clusters, then sweep their orphans
//! 4. Configure Kibana instances, then sweep their orphans
//! 5. Update status

pub mod elasticsearch;
pub mod kibana;
pub mod orphans;
pub mod reconcile;
pub mod secrets;
pub mod status;
pub mod types;

// Re-export public API
pub use orphans::ConfiguredTargets;
pub use reconcile::reconcile;
pub use status::clean_stack_trace;
pub use types::{BackoffState, PassResult, Reconciler, ReconcilerError};
