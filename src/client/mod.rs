//! # Cluster Clients
//!
//! Contracts the reconciler depends on, with their production implementations.
//!
//! - `kubernetes.rs` - [`ClusterClient`] backed by the Kubernetes API
//! - `elasticsearch.rs` - reserved state lookups against the Elasticsearch REST API
//! - `license.rs` - enterprise feature gate
//!
//! The reconciler only sees the traits so it can be driven against in-memory
//! fakes in tests.

mod elasticsearch;
mod kubernetes;
mod license;

pub use self::elasticsearch::{
    ClusterState, ElasticsearchClient, ElasticsearchClientProvider, EsClientError,
    FileSettingsErrors, FileSettingsState, HttpElasticsearchProvider,
};
pub use self::kubernetes::KubeClusterClient;
pub use self::license::{LicenseChecker, StaticLicenseChecker};

use crate::crd::{Elasticsearch, Kibana, StackConfigPolicy, StackConfigPolicyStatus};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Secret};
use thiserror::Error;

pub use kube::runtime::events::EventType;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("conflict while writing {kind} {namespace}/{name}")]
    Conflict {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ClientError::Conflict { .. })
    }
}

/// Everything the reconciler reads from and writes to the cluster.
///
/// `namespace: None` lists across all namespaces. Label selectors use the
/// API server query syntax.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn list_policies(&self) -> Result<Vec<StackConfigPolicy>, ClientError>;

    async fn get_policy(&self, namespace: &str, name: &str) -> Result<Option<StackConfigPolicy>, ClientError>;

    async fn list_elasticsearches(&self, namespace: Option<&str>) -> Result<Vec<Elasticsearch>, ClientError>;

    async fn get_elasticsearch(&self, namespace: &str, name: &str) -> Result<Option<Elasticsearch>, ClientError>;

    async fn list_kibanas(&self, namespace: Option<&str>) -> Result<Vec<Kibana>, ClientError>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ClientError>;

    async fn list_secrets(&self, namespace: Option<&str>, label_selector: &str) -> Result<Vec<Secret>, ClientError>;

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ClientError>;

    /// Replaces a secret, failing with [`ClientError::Conflict`] when its resource version is stale.
    async fn replace_secret(&self, secret: &Secret) -> Result<Secret, ClientError>;

    /// Deleting a missing secret is not an error.
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), ClientError>;

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, ClientError>;

    /// Writes the status subresource, guarded by the resource version of `policy`.
    async fn update_policy_status(
        &self,
        policy: &StackConfigPolicy,
        status: &StackConfigPolicyStatus,
    ) -> Result<(), ClientError>;

    async fn add_finalizer(&self, policy: &StackConfigPolicy, finalizer: &str) -> Result<(), ClientError>;

    async fn remove_finalizer(&self, policy: &StackConfigPolicy, finalizer: &str) -> Result<(), ClientError>;

    /// Fire and forget: failures are logged, never returned.
    async fn publish_event(&self, policy: &StackConfigPolicy, event_type: EventType, reason: &str, note: String);
}
