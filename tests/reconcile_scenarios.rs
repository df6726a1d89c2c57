//! # Reconcile Scenarios
//!
//! End-to-end passes of the reconciler against the in-memory cluster:
//! - a policy selecting nothing
//! - a single cluster receiving cluster settings
//! - snapshot repository rewrites
//! - a settings change bumping the file settings version
//! - two policies with the same weight
//! - orphaning on policy deletion

mod common;

use common::{config, policy, secret, Harness, OPERATOR_NAMESPACE};
use kube_runtime::controller::Action;
use serde_json::json;
use stack_config_policy_controller::constants::{
    DEFAULT_REQUEUE_SECS, ES_CONFIG_KEY, POLICY_FINALIZER, SECRET_MOUNTS_KEY, SETTINGS_SECRET_KEY,
    SOFT_OWNER_KIND_LABEL, SOFT_OWNER_NAMESPACE_LABEL, SOFT_OWNER_NAME_LABEL, SOFT_OWNER_REFS_ANNOTATION,
};
use stack_config_policy_controller::controller::reconciler::secrets::{es_config_secret_name, mounted_secret_name};
use stack_config_policy_controller::crd::{PolicyPhase, ResourceKind, SecretMount};
use stack_config_policy_controller::filesettings::settings_secret_name;
use std::time::Duration;

const ES_NAMESPACE: &str = "es-ns";
const ES_NAME: &str = "quickstart";

fn empty_state() -> serde_json::Value {
    json!({
        "cluster_settings": {},
        "snapshot_repositories": {},
        "slm": {},
        "role_mappings": {},
        "ilm": {},
        "ingest_pipelines": {},
        "index_templates": {"component_templates": {}, "composable_index_templates": {}}
    })
}

fn file_settings(h: &Harness) -> serde_json::Value {
    h.cluster
        .secret_data(ES_NAMESPACE, &settings_secret_name(ES_NAME), SETTINGS_SECRET_KEY)
        .expect("file settings document")
}

fn es_status(h: &Harness, policy_name: &str) -> stack_config_policy_controller::crd::ResourcePolicyStatus {
    h.cluster
        .status(OPERATOR_NAMESPACE, policy_name)
        .get(ResourceKind::Elasticsearch, &format!("{ES_NAMESPACE}/{ES_NAME}"))
        .cloned()
        .expect("status entry for the cluster")
}

/// One cluster at 8.6.1 labelled `env=prod` and a policy setting the recovery rate
fn single_cluster_setup(h: &Harness) {
    h.cluster.add_elasticsearch(ES_NAMESPACE, ES_NAME, "8.6.1", &[("env", "prod")]);
    let mut p = policy(OPERATOR_NAMESPACE, "defaults", 0, &[("env", "prod")]);
    p.spec.elasticsearch.cluster_settings = config(json!({"indices.recovery.max_bytes_per_sec": "42mb"}));
    h.cluster.add_policy(p);
}

#[tokio::test]
async fn test_policy_selecting_nothing() {
    let h = Harness::new();
    let mut p = policy(OPERATOR_NAMESPACE, "lonely", 0, &[("env", "prod")]);
    p.spec.elasticsearch.cluster_settings = config(json!({"a": 1}));
    h.cluster.add_policy(p);

    let action = h.reconcile(OPERATOR_NAMESPACE, "lonely").await.unwrap();
    assert_eq!(action, Action::await_change());

    let status = h.cluster.status(OPERATOR_NAMESPACE, "lonely");
    assert_eq!(status.resources, 0);
    assert_eq!(status.ready, 0);
    assert_eq!(status.ready_count, "0/0");
    assert_eq!(status.phase, PolicyPhase::Ready);
    assert_eq!(status.observed_generation, 1);

    let stored = h.cluster.policy(OPERATOR_NAMESPACE, "lonely").unwrap();
    assert_eq!(stored.metadata.finalizers, Some(vec![POLICY_FINALIZER.to_string()]));
    assert!(h.cluster.secret_writes().is_empty());
}

#[tokio::test]
async fn test_single_cluster_cluster_settings() {
    let h = Harness::new();
    single_cluster_setup(&h);

    let action = h.reconcile(OPERATOR_NAMESPACE, "defaults").await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(DEFAULT_REQUEUE_SECS)));

    assert_eq!(
        file_settings(&h),
        json!({
            "metadata": {"version": "1", "compatibility": "8.6.1"},
            "state": {
                "cluster_settings": {"indices.recovery.max_bytes_per_sec": "42mb"},
                "snapshot_repositories": {},
                "slm": {},
                "role_mappings": {},
                "ilm": {},
                "ingest_pipelines": {},
                "index_templates": {"component_templates": {}, "composable_index_templates": {}}
            }
        })
    );

    let stored = h.cluster.secret(ES_NAMESPACE, &settings_secret_name(ES_NAME)).unwrap();
    let labels = stored.metadata.labels.unwrap();
    assert_eq!(labels.get(SOFT_OWNER_NAME_LABEL).map(String::as_str), Some("defaults"));
    assert_eq!(labels.get(SOFT_OWNER_NAMESPACE_LABEL).map(String::as_str), Some(OPERATOR_NAMESPACE));
    assert_eq!(labels.get(SOFT_OWNER_KIND_LABEL).map(String::as_str), Some("StackConfigPolicy"));

    // nodes still run the previous node config
    assert_eq!(es_status(&h, "defaults").phase, PolicyPhase::ApplyingChanges);

    h.cluster.roll_out_elasticsearch(ES_NAMESPACE, ES_NAME);
    h.elasticsearch.report_version(ES_NAMESPACE, ES_NAME, 1);
    let action = h.reconcile(OPERATOR_NAMESPACE, "defaults").await.unwrap();
    assert_eq!(action, Action::await_change());

    let status = h.cluster.status(OPERATOR_NAMESPACE, "defaults");
    assert_eq!(status.phase, PolicyPhase::Ready);
    assert_eq!(status.ready, 1);
    assert_eq!(status.ready_count, "1/1");
    let entry = es_status(&h, "defaults");
    assert_eq!(entry.current_version, 1);
    assert_eq!(entry.expected_version, 1);
}

#[tokio::test]
async fn test_snapshot_repositories_are_scoped_to_the_cluster() {
    let h = Harness::new();
    h.cluster.add_elasticsearch(ES_NAMESPACE, ES_NAME, "8.6.1", &[("env", "prod")]);
    let mut p = policy(OPERATOR_NAMESPACE, "snapshots", 0, &[("env", "prod")]);
    p.spec.elasticsearch.snapshot_repositories = config(json!({
        "repo-s3": {"type": "s3", "settings": {"bucket": "b"}},
        "repo-fs": {"type": "fs", "settings": {"location": "/mnt/backup"}}
    }));
    h.cluster.add_policy(p);

    h.reconcile(OPERATOR_NAMESPACE, "snapshots").await.unwrap();

    let repositories = file_settings(&h)["state"]["snapshot_repositories"].clone();
    assert_eq!(
        repositories["repo-s3"],
        json!({"type": "s3", "settings": {"bucket": "b", "base_path": "snapshots/es-ns-quickstart"}})
    );
    assert_eq!(
        repositories["repo-fs"],
        json!({"type": "fs", "settings": {"location": "/mnt/backup/es-ns-quickstart"}})
    );
}

#[tokio::test]
async fn test_settings_change_bumps_version() {
    let h = Harness::new();
    single_cluster_setup(&h);
    h.reconcile(OPERATOR_NAMESPACE, "defaults").await.unwrap();
    h.cluster.roll_out_elasticsearch(ES_NAMESPACE, ES_NAME);
    h.elasticsearch.report_version(ES_NAMESPACE, ES_NAME, 1);
    h.reconcile(OPERATOR_NAMESPACE, "defaults").await.unwrap();
    assert_eq!(es_status(&h, "defaults").phase, PolicyPhase::Ready);

    h.cluster.update_policy(OPERATOR_NAMESPACE, "defaults", |spec| {
        spec.elasticsearch.cluster_settings = config(json!({"indices.recovery.max_bytes_per_sec": "43mb"}));
    });
    h.reconcile(OPERATOR_NAMESPACE, "defaults").await.unwrap();

    let document = file_settings(&h);
    assert_eq!(document["metadata"]["version"], json!("2"));
    assert_eq!(
        document["state"]["cluster_settings"],
        json!({"indices.recovery.max_bytes_per_sec": "43mb"})
    );
    let entry = es_status(&h, "defaults");
    assert_eq!(entry.phase, PolicyPhase::ApplyingChanges);
    assert_eq!(entry.expected_version, 2);
    assert_eq!(h.cluster.status(OPERATOR_NAMESPACE, "defaults").observed_generation, 2);

    h.elasticsearch.report_version(ES_NAMESPACE, ES_NAME, 2);
    h.reconcile(OPERATOR_NAMESPACE, "defaults").await.unwrap();
    assert_eq!(es_status(&h, "defaults").phase, PolicyPhase::Ready);
}

#[tokio::test]
async fn test_weight_tie_is_invalid() {
    let h = Harness::new();
    h.cluster.add_elasticsearch(ES_NAMESPACE, ES_NAME, "8.6.1", &[("env", "prod")]);
    let mut first = policy(OPERATOR_NAMESPACE, "first", 5, &[("env", "prod")]);
    first.spec.elasticsearch.cluster_settings = config(json!({"a": "first"}));
    let mut second = policy(OPERATOR_NAMESPACE, "second", 5, &[("env", "prod")]);
    second.spec.elasticsearch.cluster_settings = config(json!({"a": "second"}));
    h.cluster.add_policy(first);
    h.cluster.add_policy(second);

    for name in ["first", "second"] {
        let action = h.reconcile(OPERATOR_NAMESPACE, name).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(DEFAULT_REQUEUE_SECS)));

        let status = h.cluster.status(OPERATOR_NAMESPACE, name);
        assert_eq!(status.phase, PolicyPhase::Invalid);
        let entry = es_status(&h, name);
        assert_eq!(entry.phase, PolicyPhase::Invalid);
        assert!(entry.error.message.contains("weight conflict"), "{}", entry.error.message);
        assert!(entry.error.message.contains("same weight 5"), "{}", entry.error.message);
    }

    // neither policy wrote anything to the cluster
    assert!(h.cluster.secret_writes().is_empty());
    assert!(h.cluster.secret(ES_NAMESPACE, &es_config_secret_name(ES_NAME)).is_none());
}

#[tokio::test]
async fn test_deleting_policy_orphans_derived_secrets() {
    let h = Harness::new();
    h.cluster.add_elasticsearch(ES_NAMESPACE, ES_NAME, "8.6.1", &[("env", "prod")]);
    h.cluster
        .add_secret(secret(OPERATOR_NAMESPACE, "certs", &[("ca.crt", "-----BEGIN CERTIFICATE-----")]));
    let mut p = policy(OPERATOR_NAMESPACE, "defaults", 0, &[("env", "prod")]);
    p.spec.elasticsearch.cluster_settings = config(json!({"indices.recovery.max_bytes_per_sec": "42mb"}));
    p.spec.elasticsearch.config = config(json!({"logger.org.elasticsearch.discovery": "DEBUG"}));
    p.spec.elasticsearch.secret_mounts = Some(vec![SecretMount {
        secret_name: "certs".to_string(),
        mount_path: "/usr/share/elasticsearch/config/certs".to_string(),
    }]);
    h.cluster.add_policy(p);

    h.reconcile(OPERATOR_NAMESPACE, "defaults").await.unwrap();

    let mount_copy = mounted_secret_name(ES_NAME, "certs");
    let copied = h.cluster.secret(ES_NAMESPACE, &mount_copy).expect("mounted secret copy");
    assert_eq!(
        copied.data.unwrap().get("ca.crt").map(|b| b.0.clone()),
        Some(b"-----BEGIN CERTIFICATE-----".to_vec())
    );
    let node_config = h.cluster.secret_data(ES_NAMESPACE, &es_config_secret_name(ES_NAME), ES_CONFIG_KEY);
    assert_eq!(node_config, Some(json!({"logger.org.elasticsearch.discovery": "DEBUG"})));
    assert_eq!(
        h.cluster
            .secret_data(ES_NAMESPACE, &es_config_secret_name(ES_NAME), SECRET_MOUNTS_KEY),
        Some(json!([{"secretName": "certs", "mountPath": "/usr/share/elasticsearch/config/certs"}]))
    );
    assert_eq!(
        h.reconciler.watches.policies_watching(OPERATOR_NAMESPACE, "certs"),
        vec![(OPERATOR_NAMESPACE.to_string(), "defaults".to_string())]
    );

    h.cluster.delete_policy(OPERATOR_NAMESPACE, "defaults");
    let action = h.reconcile(OPERATOR_NAMESPACE, "defaults").await.unwrap();
    assert_eq!(action, Action::await_change());

    let document = file_settings(&h);
    assert_eq!(document["state"], empty_state());
    assert_eq!(document["metadata"]["version"], json!("2"));
    let reset = h.cluster.secret(ES_NAMESPACE, &settings_secret_name(ES_NAME)).unwrap();
    let labels = reset.metadata.labels.unwrap_or_default();
    for label in [SOFT_OWNER_KIND_LABEL, SOFT_OWNER_NAMESPACE_LABEL, SOFT_OWNER_NAME_LABEL] {
        assert!(!labels.contains_key(label), "{label} should be gone");
    }
    assert!(!reset
        .metadata
        .annotations
        .unwrap_or_default()
        .contains_key(SOFT_OWNER_REFS_ANNOTATION));

    assert!(h.cluster.secret(ES_NAMESPACE, &es_config_secret_name(ES_NAME)).is_none());
    assert!(h.cluster.secret(ES_NAMESPACE, &mount_copy).is_none());
    // the user secret itself is untouched
    assert!(h.cluster.secret(OPERATOR_NAMESPACE, "certs").is_some());

    assert!(h.cluster.policy(OPERATOR_NAMESPACE, "defaults").is_none());
    assert!(h.reconciler.watches.policies_watching(OPERATOR_NAMESPACE, "certs").is_empty());
}
