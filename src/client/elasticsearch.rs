//! Reserved state lookups against Elasticsearch.
//!
//! The reconciler only needs `GET /_cluster/state/metadata` to learn which
//! file settings version a cluster has applied and whether it was rejected.

use super::ClusterClient;
use crate::config::ControllerConfig;
use crate::crd::Elasticsearch;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

const ELASTIC_USER: &str = "elastic";
const ELASTIC_USER_SECRET_SUFFIX: &str = "-es-elastic-user";
const HTTP_SERVICE_SUFFIX: &str = "-es-http";
const HTTP_PORT: u16 = 9200;

#[derive(Debug, Error)]
pub enum EsClientError {
    #[error("request to Elasticsearch failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Elasticsearch returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode cluster state: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("no credentials for Elasticsearch {namespace}/{name}: {reason}")]
    Credentials {
        namespace: String,
        name: String,
        reason: String,
    },
}

/// Subset of `GET /_cluster/state/metadata`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ClusterState {
    #[serde(default)]
    pub metadata: ClusterStateMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ClusterStateMetadata {
    #[serde(default)]
    pub reserved_state: ReservedState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ReservedState {
    #[serde(default)]
    pub file_settings: FileSettingsState,
}

/// What the cluster reports about the file settings it loaded
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FileSettingsState {
    /// 0 until a document has been processed
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub errors: Option<FileSettingsErrors>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FileSettingsErrors {
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ClusterState {
    pub fn file_settings(&self) -> &FileSettingsState {
        &self.metadata.reserved_state.file_settings
    }
}

/// A client bound to one cluster
#[async_trait]
pub trait ElasticsearchClient: Send + Sync {
    async fn get_cluster_state(&self) -> Result<ClusterState, EsClientError>;
}

/// Opens a client per cluster. Clients live for a single reconcile.
#[async_trait]
pub trait ElasticsearchClientProvider: Send + Sync {
    async fn client_for(&self, es: &Elasticsearch) -> Result<Box<dyn ElasticsearchClient>, EsClientError>;
}

/// Reaches clusters through their `<name>-es-http` service as the `elastic` user
pub struct HttpElasticsearchProvider {
    cluster: Arc<dyn ClusterClient>,
    http: reqwest::Client,
    scheme: String,
}

impl std::fmt::Debug for HttpElasticsearchProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpElasticsearchProvider")
            .field("scheme", &self.scheme)
            .finish_non_exhaustive()
    }
}

impl HttpElasticsearchProvider {
    pub fn new(cluster: Arc<dyn ClusterClient>, config: &ControllerConfig) -> Result<Self, EsClientError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.es_accept_invalid_certs)
            .timeout(config.es_request_timeout())
            .build()?;
        Ok(Self {
            cluster,
            http,
            scheme: config.es_scheme.clone(),
        })
    }

    async fn password(&self, namespace: &str, name: &str) -> Result<String, EsClientError> {
        let credentials = |reason: String| EsClientError::Credentials {
            namespace: namespace.to_string(),
            name: name.to_string(),
            reason,
        };
        let secret_name = format!("{name}{ELASTIC_USER_SECRET_SUFFIX}");
        let secret = self
            .cluster
            .get_secret(namespace, &secret_name)
            .await
            .map_err(|e| credentials(e.to_string()))?
            .ok_or_else(|| credentials(format!("secret {secret_name} not found")))?;
        let raw = secret
            .data
            .as_ref()
            .and_then(|d| d.get(ELASTIC_USER))
            .ok_or_else(|| credentials(format!("secret {secret_name} has no {ELASTIC_USER} key")))?;
        String::from_utf8(raw.0.clone()).map_err(|e| credentials(e.to_string()))
    }
}

#[async_trait]
impl ElasticsearchClientProvider for HttpElasticsearchProvider {
    async fn client_for(&self, es: &Elasticsearch) -> Result<Box<dyn ElasticsearchClient>, EsClientError> {
        let namespace = es.metadata.namespace.as_deref().unwrap_or("default");
        let name = es.metadata.name.as_deref().unwrap_or_default();
        let password = self.password(namespace, name).await?;
        Ok(Box::new(HttpElasticsearchClient {
            http: self.http.clone(),
            url: format!(
                "{}://{name}{HTTP_SERVICE_SUFFIX}.{namespace}.svc:{HTTP_PORT}",
                self.scheme
            ),
            password,
        }))
    }
}

struct HttpElasticsearchClient {
    http: reqwest::Client,
    url: String,
    password: String,
}

#[async_trait]
impl ElasticsearchClient for HttpElasticsearchClient {
    async fn get_cluster_state(&self) -> Result<ClusterState, EsClientError> {
        let url = format!("{}/_cluster/state/metadata", self.url);
        debug!(url = %url, "Fetching cluster state");
        let response = self
            .http
            .get(&url)
            .basic_auth(ELASTIC_USER, Some(&self.password))
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(EsClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }
}
