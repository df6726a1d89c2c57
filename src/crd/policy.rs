//! # StackConfigPolicy Spec
//!
//! A StackConfigPolicy selects Elasticsearch clusters and Kibana instances by
//! label and carries the configuration that should be pushed onto them.
//!
//! ## Example
//!
//! ```yaml
//! apiVersion: stackconfigpolicy.k8s.elastic.co/v1alpha1
//! kind: StackConfigPolicy
//! metadata:
//!   name: cluster-defaults
//!   namespace: elastic-system
//! spec:
//!   weight: 10
//!   resourceSelector:
//!     matchLabels:
//!       env: prod
//!   elasticsearch:
//!     clusterSettings:
//!       indices.recovery.max_bytes_per_sec: 42mb
//!     snapshotRepositories:
//!       backups:
//!         type: s3
//!         settings:
//!           bucket: prod-backups
//! ```

use super::StackConfigPolicyStatus;
use crate::settings::Config;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::{json_schema, JsonSchema, Schema, SchemaGenerator};
use serde::{Deserialize, Serialize};

/// Free-form configuration is stored as-is by the API server.
fn raw_config_schema(_gen: &mut SchemaGenerator) -> Schema {
    json_schema!({
        "type": "object",
        "nullable": true,
        "x-kubernetes-preserve-unknown-fields": true,
    })
}

#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[kube(
    kind = "StackConfigPolicy",
    group = "stackconfigpolicy.k8s.elastic.co",
    version = "v1alpha1",
    namespaced,
    status = "StackConfigPolicyStatus",
    shortname = "scp",
    category = "elastic",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.readyCount", "description":"Resources configured"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    printcolumn = r#"{"name":"Weight", "type":"integer", "jsonPath":".spec.weight", "priority":1}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StackConfigPolicySpec {
    /// Selects the Elasticsearch and Kibana resources the policy applies to.
    /// An empty selector selects every resource in scope.
    #[serde(default)]
    pub resource_selector: LabelSelector,

    /// Precedence between policies selecting the same resource.
    /// Policies are applied from the highest weight down, so the lowest weight wins on overlap.
    #[serde(default)]
    pub weight: i32,

    /// Deprecated: use `elasticsearch.secureSettings` instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure_settings: Option<Vec<SecretSource>>,

    #[serde(default)]
    pub elasticsearch: ElasticsearchConfigPolicySpec,

    #[serde(default)]
    pub kibana: KibanaConfigPolicySpec,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ElasticsearchConfigPolicySpec {
    /// Persistent cluster settings (`_cluster/settings`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_config_schema")]
    pub cluster_settings: Option<Config>,

    /// Snapshot repositories keyed by repository name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_config_schema")]
    pub snapshot_repositories: Option<Config>,

    /// Snapshot lifecycle policies keyed by policy id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_config_schema")]
    pub snapshot_lifecycle_policies: Option<Config>,

    /// Role mappings keyed by mapping name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_config_schema")]
    pub security_role_mappings: Option<Config>,

    /// Index lifecycle policies keyed by policy name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_config_schema")]
    pub index_lifecycle_policies: Option<Config>,

    /// Ingest pipelines keyed by pipeline id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_config_schema")]
    pub ingest_pipelines: Option<Config>,

    #[serde(default)]
    pub index_templates: IndexTemplates,

    /// Node configuration merged into `elasticsearch.yml`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_config_schema")]
    pub config: Option<Config>,

    /// Secrets mounted into every Elasticsearch node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_mounts: Option<Vec<SecretMount>>,

    /// Secrets whose entries are added to the Elasticsearch keystore
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure_settings: Option<Vec<SecretSource>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IndexTemplates {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_config_schema")]
    pub component_templates: Option<Config>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_config_schema")]
    pub composable_index_templates: Option<Config>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KibanaConfigPolicySpec {
    /// Configuration merged into `kibana.yml`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_config_schema")]
    pub config: Option<Config>,

    /// Secrets whose entries are added to the Kibana keystore
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure_settings: Option<Vec<SecretSource>>,
}

/// A user secret copied next to the Elasticsearch cluster and mounted into its nodes
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretMount {
    /// Name of the secret in the policy namespace
    pub secret_name: String,
    /// Absolute path the secret is mounted at
    pub mount_path: String,
}

/// Reference to a secret in the policy namespace
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretSource {
    pub secret_name: String,
    /// Restricts the projected keys. All keys are used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<KeyToPath>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KeyToPath {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// A [`SecretSource`] qualified with the namespace it lives in.
///
/// This is the shape written to the `secure-settings-secrets` annotation so the
/// workload controllers can resolve keystore entries across namespaces.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct NamespacedSecretSource {
    pub namespace: String,
    pub secret_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<KeyToPath>>,
}

impl NamespacedSecretSource {
    pub fn from_source(namespace: &str, source: &SecretSource) -> Self {
        Self {
            namespace: namespace.to_string(),
            secret_name: source.secret_name.clone(),
            entries: source.entries.clone(),
        }
    }
}

impl StackConfigPolicy {
    pub fn namespace_or_default(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or("default")
    }

    pub fn name_or_default(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("unknown")
    }

    /// `namespace/name` used as the policy identity in owner refs and status
    pub fn key(&self) -> String {
        super::namespaced_name(self.namespace_or_default(), self.name_or_default())
    }

    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
