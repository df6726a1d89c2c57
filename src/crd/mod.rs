//! # Custom Resource Definitions
//!
//! CRD types for the StackConfigPolicy controller.
//!
//! ## Module Structure
//!
//! - `policy.rs` - StackConfigPolicy specification and its Elasticsearch/Kibana slots
//! - `status.rs` - Per-target phases and the policy-level rollup
//! - `targets.rs` - The Elasticsearch and Kibana resources selected by policies (read only)

mod policy;
mod status;
mod targets;

pub use policy::{
    ElasticsearchConfigPolicySpec, IndexTemplates, KeyToPath, KibanaConfigPolicySpec,
    NamespacedSecretSource, SecretMount, SecretSource, StackConfigPolicy, StackConfigPolicySpec,
};
pub use status::{
    PolicyPhase, PolicyStatusError, ResourceKind, ResourcePolicyStatus, StackConfigPolicyStatus,
    StatusError,
};
pub use targets::{Elasticsearch, ElasticsearchSpec, Kibana, KibanaSpec};

/// `namespace/name` of a namespaced object
pub fn namespaced_name(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}
