//! Common test utilities for the reconciler integration tests
//!
//! `FakeCluster` keeps every object in memory and enforces resource versions
//! on writes like the API server does. `FakeElasticsearch` answers cluster
//! state requests from a per-cluster script. Neither needs a network.

#![allow(dead_code, reason = "each test binary uses a different subset of the fixtures")]

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::ByteString;
use kube_runtime::controller::Action;
use kube_runtime::reflector::ObjectRef;
use serde_json::json;
use stack_config_policy_controller::client::{
    ClientError, ClusterClient, ClusterState, ElasticsearchClient, ElasticsearchClientProvider,
    EsClientError, EventType, StaticLicenseChecker,
};
use stack_config_policy_controller::config::ControllerConfig;
use stack_config_policy_controller::constants::{
    CONFIG_MOUNTS_HASH_ANNOTATION, ELASTICSEARCH_TYPE, ES_CLUSTER_NAME_LABEL,
    KIBANA_CONFIG_HASH_ANNOTATION, KIBANA_NAME_LABEL, SETTINGS_SECRET_KEY, TYPE_LABEL,
};
use stack_config_policy_controller::controller::reconciler::secrets::{
    es_config_secret_name, kibana_config_secret_name,
};
use stack_config_policy_controller::controller::reconciler::{reconcile, Reconciler, ReconcilerError};
use stack_config_policy_controller::crd::{
    namespaced_name, Elasticsearch, ElasticsearchSpec, Kibana, KibanaSpec, StackConfigPolicy,
    StackConfigPolicySpec, StackConfigPolicyStatus,
};
use stack_config_policy_controller::filesettings::settings_secret_name;
use stack_config_policy_controller::settings::Config;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

pub const OPERATOR_NAMESPACE: &str = "elastic-system";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub policy: String,
    pub warning: bool,
    pub reason: String,
    pub note: String,
}

#[derive(Debug, Default)]
struct State {
    policies: BTreeMap<String, StackConfigPolicy>,
    elasticsearches: BTreeMap<String, Elasticsearch>,
    kibanas: BTreeMap<String, Kibana>,
    secrets: BTreeMap<String, Secret>,
    pods: BTreeMap<String, Pod>,
    events: Vec<RecordedEvent>,
    secret_writes: Vec<String>,
    resource_version: u64,
}

impl State {
    fn next_resource_version(&mut self) -> Option<String> {
        self.resource_version += 1;
        Some(self.resource_version.to_string())
    }
}

fn key_of(meta: &ObjectMeta) -> String {
    namespaced_name(
        meta.namespace.as_deref().unwrap_or_default(),
        meta.name.as_deref().unwrap_or_default(),
    )
}

fn in_scope(meta: &ObjectMeta, namespace: Option<&str>) -> bool {
    namespace.is_none_or(|ns| meta.namespace.as_deref() == Some(ns))
}

/// Equality-only label query, the only form the reconciler sends
fn selects(meta: &ObjectMeta, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|requirement| !requirement.is_empty())
        .all(|requirement| match requirement.split_once('=') {
            Some((key, value)) => {
                meta.labels.as_ref().and_then(|l| l.get(key)).map(String::as_str) == Some(value)
            }
            None => false,
        })
}

fn stale(given: Option<&String>, stored: Option<&String>) -> bool {
    given.is_some() && given != stored
}

pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

pub fn config(value: serde_json::Value) -> Option<Config> {
    match value {
        serde_json::Value::Object(map) => Some(map),
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// A policy selecting targets by `matchLabels`
pub fn policy(namespace: &str, name: &str, weight: i32, selector: &[(&str, &str)]) -> StackConfigPolicy {
    let mut policy = StackConfigPolicy::new(
        name,
        StackConfigPolicySpec {
            resource_selector: LabelSelector {
                match_labels: (!selector.is_empty()).then(|| labels(selector)),
                ..Default::default()
            },
            weight,
            ..Default::default()
        },
    );
    policy.metadata.namespace = Some(namespace.to_string());
    policy
}

pub fn secret(namespace: &str, name: &str, data: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                .collect(),
        ),
        ..Default::default()
    }
}

/// In-memory [`ClusterClient`]
#[derive(Debug, Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn add_policy(&self, mut policy: StackConfigPolicy) {
        let mut state = self.state.lock().unwrap();
        policy.metadata.generation.get_or_insert(1);
        policy.metadata.resource_version = state.next_resource_version();
        state.policies.insert(key_of(&policy.metadata), policy);
    }

    /// Edits the spec like `kubectl apply` would, bumping the generation.
    pub fn update_policy(&self, namespace: &str, name: &str, edit: impl FnOnce(&mut StackConfigPolicySpec)) {
        let mut state = self.state.lock().unwrap();
        let resource_version = state.next_resource_version();
        let policy = state
            .policies
            .get_mut(&namespaced_name(namespace, name))
            .expect("policy exists");
        edit(&mut policy.spec);
        policy.metadata.generation = policy.metadata.generation.map(|g| g + 1);
        policy.metadata.resource_version = resource_version;
    }

    /// Deletion is deferred while finalizers remain.
    pub fn delete_policy(&self, namespace: &str, name: &str) {
        let mut state = self.state.lock().unwrap();
        let key = namespaced_name(namespace, name);
        let resource_version = state.next_resource_version();
        let Some(policy) = state.policies.get_mut(&key) else {
            return;
        };
        if policy.metadata.finalizers.as_ref().is_none_or(Vec::is_empty) {
            state.policies.remove(&key);
            return;
        }
        policy.metadata.deletion_timestamp =
            Some(serde_json::from_value(json!("2026-10-16T00:00:00Z")).unwrap());
        policy.metadata.resource_version = resource_version;
    }

    /// Adds a cluster together with the empty file settings secret its own controller creates.
    pub fn add_elasticsearch(&self, namespace: &str, name: &str, version: &str, es_labels: &[(&str, &str)]) {
        self.add_elasticsearch_only(namespace, name, version, es_labels);
        let mut file_settings = secret(namespace, &settings_secret_name(name), &[(SETTINGS_SECRET_KEY, "")]);
        file_settings.metadata.labels = Some(labels(&[
            (TYPE_LABEL, ELASTICSEARCH_TYPE),
            (ES_CLUSTER_NAME_LABEL, name),
        ]));
        self.add_secret(file_settings);
    }

    pub fn add_elasticsearch_only(&self, namespace: &str, name: &str, version: &str, es_labels: &[(&str, &str)]) {
        let mut es = Elasticsearch::new(
            name,
            ElasticsearchSpec {
                version: version.to_string(),
            },
        );
        es.metadata.namespace = Some(namespace.to_string());
        es.metadata.labels = Some(labels(es_labels));
        let mut state = self.state.lock().unwrap();
        es.metadata.resource_version = state.next_resource_version();
        state.elasticsearches.insert(key_of(&es.metadata), es);
    }

    pub fn remove_elasticsearch(&self, namespace: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .elasticsearches
            .remove(&namespaced_name(namespace, name));
    }

    pub fn relabel_elasticsearch(&self, namespace: &str, name: &str, es_labels: &[(&str, &str)]) {
        let mut state = self.state.lock().unwrap();
        if let Some(es) = state.elasticsearches.get_mut(&namespaced_name(namespace, name)) {
            es.metadata.labels = Some(labels(es_labels));
        }
    }

    pub fn elasticsearch(&self, namespace: &str, name: &str) -> Option<Elasticsearch> {
        self.state
            .lock()
            .unwrap()
            .elasticsearches
            .get(&namespaced_name(namespace, name))
            .cloned()
    }

    pub fn relabel_kibana(&self, namespace: &str, name: &str, kb_labels: &[(&str, &str)]) {
        let mut state = self.state.lock().unwrap();
        if let Some(kibana) = state.kibanas.get_mut(&namespaced_name(namespace, name)) {
            kibana.metadata.labels = Some(labels(kb_labels));
        }
    }

    pub fn kibana(&self, namespace: &str, name: &str) -> Option<Kibana> {
        self.state
            .lock()
            .unwrap()
            .kibanas
            .get(&namespaced_name(namespace, name))
            .cloned()
    }

    /// Policies as the controller store would hold them
    pub fn cached_policies(&self) -> Vec<Arc<StackConfigPolicy>> {
        self.state
            .lock()
            .unwrap()
            .policies
            .values()
            .cloned()
            .map(Arc::new)
            .collect()
    }

    pub fn add_kibana(&self, namespace: &str, name: &str, kb_labels: &[(&str, &str)]) {
        let mut kibana = Kibana::new(
            name,
            KibanaSpec {
                version: "8.15.0".to_string(),
            },
        );
        kibana.metadata.namespace = Some(namespace.to_string());
        kibana.metadata.labels = Some(labels(kb_labels));
        let mut state = self.state.lock().unwrap();
        kibana.metadata.resource_version = state.next_resource_version();
        state.kibanas.insert(key_of(&kibana.metadata), kibana);
    }

    pub fn add_secret(&self, mut secret: Secret) {
        let mut state = self.state.lock().unwrap();
        secret.metadata.resource_version = state.next_resource_version();
        state.secrets.insert(key_of(&secret.metadata), secret);
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.state
            .lock()
            .unwrap()
            .secrets
            .get(&namespaced_name(namespace, name))
            .cloned()
    }

    pub fn secret_data(&self, namespace: &str, name: &str, key: &str) -> Option<serde_json::Value> {
        let secret = self.secret(namespace, name)?;
        let raw = secret.data?.get(key)?.0.clone();
        Some(serde_json::from_slice(&raw).expect("secret data is JSON"))
    }

    pub fn policy(&self, namespace: &str, name: &str) -> Option<StackConfigPolicy> {
        self.state
            .lock()
            .unwrap()
            .policies
            .get(&namespaced_name(namespace, name))
            .cloned()
    }

    pub fn status(&self, namespace: &str, name: &str) -> StackConfigPolicyStatus {
        self.policy(namespace, name)
            .and_then(|p| p.status)
            .unwrap_or_default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn events_with_reason(&self, reason: &str) -> Vec<RecordedEvent> {
        self.events().into_iter().filter(|e| e.reason == reason).collect()
    }

    /// `create|replace|delete ns/name`, in order
    pub fn secret_writes(&self) -> Vec<String> {
        self.state.lock().unwrap().secret_writes.clone()
    }

    pub fn clear_secret_writes(&self) {
        self.state.lock().unwrap().secret_writes.clear();
    }

    /// Simulates the Elasticsearch controller restarting the nodes with the current node config.
    pub fn roll_out_elasticsearch(&self, namespace: &str, es_name: &str) {
        let hash = self
            .secret(namespace, &es_config_secret_name(es_name))
            .and_then(|s| s.metadata.annotations?.get(CONFIG_MOUNTS_HASH_ANNOTATION).cloned())
            .expect("node config secret exists");
        self.add_pod(
            namespace,
            &format!("{es_name}-es-default-0"),
            &[(ES_CLUSTER_NAME_LABEL, es_name)],
            &[(CONFIG_MOUNTS_HASH_ANNOTATION, &hash)],
        );
    }

    /// Simulates the Kibana controller restarting the instance with the current config.
    pub fn roll_out_kibana(&self, namespace: &str, kibana_name: &str) {
        let hash = self
            .secret(namespace, &kibana_config_secret_name(kibana_name))
            .and_then(|s| s.metadata.annotations?.get(KIBANA_CONFIG_HASH_ANNOTATION).cloned())
            .expect("kibana config secret exists");
        self.add_pod(
            namespace,
            &format!("{kibana_name}-kb-0"),
            &[(KIBANA_NAME_LABEL, kibana_name)],
            &[(KIBANA_CONFIG_HASH_ANNOTATION, &hash)],
        );
    }

    pub fn add_pod(&self, namespace: &str, name: &str, pod_labels: &[(&str, &str)], annotations: &[(&str, &str)]) {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(labels(pod_labels)),
                annotations: Some(labels(annotations)),
                ..Default::default()
            },
            ..Default::default()
        };
        self.state.lock().unwrap().pods.insert(key_of(&pod.metadata), pod);
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn list_policies(&self) -> Result<Vec<StackConfigPolicy>, ClientError> {
        Ok(self.state.lock().unwrap().policies.values().cloned().collect())
    }

    async fn get_policy(&self, namespace: &str, name: &str) -> Result<Option<StackConfigPolicy>, ClientError> {
        Ok(self.policy(namespace, name))
    }

    async fn list_elasticsearches(&self, namespace: Option<&str>) -> Result<Vec<Elasticsearch>, ClientError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .elasticsearches
            .values()
            .filter(|es| in_scope(&es.metadata, namespace))
            .cloned()
            .collect())
    }

    async fn get_elasticsearch(&self, namespace: &str, name: &str) -> Result<Option<Elasticsearch>, ClientError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .elasticsearches
            .get(&namespaced_name(namespace, name))
            .cloned())
    }

    async fn list_kibanas(&self, namespace: Option<&str>) -> Result<Vec<Kibana>, ClientError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .kibanas
            .values()
            .filter(|kb| in_scope(&kb.metadata, namespace))
            .cloned()
            .collect())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ClientError> {
        Ok(self.secret(namespace, name))
    }

    async fn list_secrets(&self, namespace: Option<&str>, label_selector: &str) -> Result<Vec<Secret>, ClientError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .secrets
            .values()
            .filter(|s| in_scope(&s.metadata, namespace) && selects(&s.metadata, label_selector))
            .cloned()
            .collect())
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ClientError> {
        let mut state = self.state.lock().unwrap();
        let key = key_of(&secret.metadata);
        if state.secrets.contains_key(&key) {
            return Err(ClientError::Conflict {
                kind: "Secret",
                namespace: secret.metadata.namespace.clone().unwrap_or_default(),
                name: secret.metadata.name.clone().unwrap_or_default(),
            });
        }
        let mut created = secret.clone();
        created.metadata.resource_version = state.next_resource_version();
        state.secret_writes.push(format!("create {key}"));
        state.secrets.insert(key, created.clone());
        Ok(created)
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<Secret, ClientError> {
        let mut state = self.state.lock().unwrap();
        let key = key_of(&secret.metadata);
        let namespace = secret.metadata.namespace.clone().unwrap_or_default();
        let name = secret.metadata.name.clone().unwrap_or_default();
        let Some(stored) = state.secrets.get(&key) else {
            return Err(ClientError::NotFound {
                kind: "Secret",
                namespace,
                name,
            });
        };
        if stale(
            secret.metadata.resource_version.as_ref(),
            stored.metadata.resource_version.as_ref(),
        ) {
            return Err(ClientError::Conflict {
                kind: "Secret",
                namespace,
                name,
            });
        }
        let mut replaced = secret.clone();
        replaced.metadata.resource_version = state.next_resource_version();
        state.secret_writes.push(format!("replace {key}"));
        state.secrets.insert(key, replaced.clone());
        Ok(replaced)
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        let key = namespaced_name(namespace, name);
        if state.secrets.remove(&key).is_some() {
            state.secret_writes.push(format!("delete {key}"));
        }
        Ok(())
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, ClientError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .pods
            .values()
            .filter(|p| in_scope(&p.metadata, Some(namespace)) && selects(&p.metadata, label_selector))
            .cloned()
            .collect())
    }

    async fn update_policy_status(
        &self,
        policy: &StackConfigPolicy,
        status: &StackConfigPolicyStatus,
    ) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        let resource_version = state.next_resource_version();
        let conflict = || ClientError::Conflict {
            kind: "StackConfigPolicy",
            namespace: policy.namespace_or_default().to_string(),
            name: policy.name_or_default().to_string(),
        };
        let stored = state.policies.get_mut(&policy.key()).ok_or_else(conflict)?;
        if stale(
            policy.metadata.resource_version.as_ref(),
            stored.metadata.resource_version.as_ref(),
        ) {
            return Err(conflict());
        }
        stored.status = Some(status.clone());
        stored.metadata.resource_version = resource_version;
        Ok(())
    }

    async fn add_finalizer(&self, policy: &StackConfigPolicy, finalizer: &str) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        let resource_version = state.next_resource_version();
        if let Some(stored) = state.policies.get_mut(&policy.key()) {
            let finalizers = stored.metadata.finalizers.get_or_insert_with(Vec::new);
            if !finalizers.iter().any(|f| f == finalizer) {
                finalizers.push(finalizer.to_string());
                stored.metadata.resource_version = resource_version;
            }
        }
        Ok(())
    }

    async fn remove_finalizer(&self, policy: &StackConfigPolicy, finalizer: &str) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        let key = policy.key();
        let Some(stored) = state.policies.get_mut(&key) else {
            return Ok(());
        };
        if let Some(finalizers) = stored.metadata.finalizers.as_mut() {
            finalizers.retain(|f| f != finalizer);
        }
        if stored.metadata.deletion_timestamp.is_some()
            && stored.metadata.finalizers.as_ref().is_none_or(Vec::is_empty)
        {
            state.policies.remove(&key);
        }
        Ok(())
    }

    async fn publish_event(&self, policy: &StackConfigPolicy, event_type: EventType, reason: &str, note: String) {
        self.state.lock().unwrap().events.push(RecordedEvent {
            policy: policy.key(),
            warning: matches!(event_type, EventType::Warning),
            reason: reason.to_string(),
            note,
        });
    }
}

/// Scripted [`ElasticsearchClientProvider`]. Unscripted clusters report version 0.
#[derive(Debug, Default)]
pub struct FakeElasticsearch {
    states: Mutex<HashMap<String, Result<ClusterState, String>>>,
}

impl FakeElasticsearch {
    fn script(&self, namespace: &str, name: &str, state: Result<ClusterState, String>) {
        self.states
            .lock()
            .unwrap()
            .insert(namespaced_name(namespace, name), state);
    }

    /// The cluster applied file settings `version` without error.
    pub fn report_version(&self, namespace: &str, name: &str, version: i64) {
        let state = serde_json::from_value(json!({
            "metadata": {"reserved_state": {"file_settings": {"version": version}}}
        }))
        .unwrap();
        self.script(namespace, name, Ok(state));
    }

    /// The cluster is at `version` and rejected `error_version`.
    pub fn report_error(&self, namespace: &str, name: &str, version: i64, error_version: i64, errors: &[&str]) {
        let state = serde_json::from_value(json!({
            "metadata": {"reserved_state": {"file_settings": {
                "version": version,
                "errors": {"version": error_version, "error_kind": "validation", "errors": errors}
            }}}
        }))
        .unwrap();
        self.script(namespace, name, Ok(state));
    }

    pub fn unreachable(&self, namespace: &str, name: &str) {
        self.script(namespace, name, Err("connection refused".to_string()));
    }
}

#[derive(Debug)]
struct FakeElasticsearchClient {
    state: Result<ClusterState, String>,
}

#[async_trait]
impl ElasticsearchClient for FakeElasticsearchClient {
    async fn get_cluster_state(&self) -> Result<ClusterState, EsClientError> {
        self.state.clone().map_err(|body| EsClientError::Status { status: 503, body })
    }
}

#[async_trait]
impl ElasticsearchClientProvider for FakeElasticsearch {
    async fn client_for(&self, es: &Elasticsearch) -> Result<Box<dyn ElasticsearchClient>, EsClientError> {
        let key = key_of(&es.metadata);
        let state = self
            .states
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Ok(ClusterState::default()));
        Ok(Box::new(FakeElasticsearchClient { state }))
    }
}

/// A reconciler wired to the fakes
#[derive(Debug)]
pub struct Harness {
    pub cluster: Arc<FakeCluster>,
    pub elasticsearch: Arc<FakeElasticsearch>,
    pub reconciler: Arc<Reconciler>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_license(true)
    }

    pub fn with_license(enterprise_features_enabled: bool) -> Self {
        let cluster = Arc::new(FakeCluster::default());
        let elasticsearch = Arc::new(FakeElasticsearch::default());
        let config = ControllerConfig {
            operator_namespace: OPERATOR_NAMESPACE.to_string(),
            enterprise_features_enabled,
            ..Default::default()
        };
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&cluster) as Arc<dyn ClusterClient>,
            Arc::clone(&elasticsearch) as Arc<dyn ElasticsearchClientProvider>,
            Arc::new(StaticLicenseChecker {
                enabled: enterprise_features_enabled,
            }),
            config,
        ));
        Self {
            cluster,
            elasticsearch,
            reconciler,
        }
    }

    /// Runs one pass for the policy, as the controller would on a watch event.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Action, ReconcilerError> {
        let policy = self
            .cluster
            .policy(namespace, name)
            .unwrap_or_else(|| policy(namespace, name, 0, &[]));
        reconcile(Arc::new(policy), Arc::clone(&self.reconciler)).await
    }

    /// Runs one pass for every policy a watch mapper requeued.
    pub async fn reconcile_all(&self, refs: &[ObjectRef<StackConfigPolicy>]) -> Result<(), ReconcilerError> {
        for r in refs {
            self.reconcile(r.namespace.as_deref().unwrap_or_default(), &r.name).await?;
        }
        Ok(())
    }
}
