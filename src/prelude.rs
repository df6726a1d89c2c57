//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ## Usage
//!
//! ```rust
//! use stack_config_policy_controller::prelude::*;
//! ```
//!
//! This brings into scope:
//! - All CRD types (StackConfigPolicy, Elasticsearch, Kibana, status types)
//! - Client contracts (ClusterClient, ElasticsearchClientProvider, LicenseChecker)
//! - Reconciler types (Reconciler, ReconcilerError, etc.)
//! - Config types (ControllerConfig)
//! - Policy merging and validation

// CRD types - most commonly used
pub use crate::crd::*;

// Client contracts - needed for driving the reconciler
pub use crate::client::{
    ClientError, ClusterClient, ElasticsearchClient, ElasticsearchClientProvider, EsClientError,
    LicenseChecker,
};

// Reconciler types - core controller functionality
pub use crate::controller::reconciler::{reconcile, BackoffState, Reconciler, ReconcilerError};

pub use crate::config::ControllerConfig;

pub use crate::policy::{merge_policies, validate_policy, MergeError, MergedPolicy, ValidationErrors};

pub use crate::settings::Config;
