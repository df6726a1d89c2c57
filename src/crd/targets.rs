//! # Policy Targets
//!
//! Minimal views of the Elasticsearch and Kibana resources owned by their own
//! controllers. Only the fields this controller reads are modelled; everything
//! else is ignored on decode. Schemas are disabled since these CRDs are never
//! generated from here.

use kube::CustomResource;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    kind = "Elasticsearch",
    group = "elasticsearch.k8s.elastic.co",
    version = "v1",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ElasticsearchSpec {
    /// Elastic Stack version, e.g. `8.6.1`
    #[serde(default)]
    pub version: String,
}

#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    kind = "Kibana",
    group = "kibana.k8s.elastic.co",
    version = "v1",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct KibanaSpec {
    #[serde(default)]
    pub version: String,
}
