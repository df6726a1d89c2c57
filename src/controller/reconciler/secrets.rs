//! # Derived Secrets
//!
//! Builders for the secrets written next to each target, and the idempotent
//! write used for all of them.
//!
//! A write only happens when the expected data differs from the stored data,
//! or when an expected label or annotation is missing or different. Labels and
//! annotations added by other actors are preserved; the ones this controller
//! manages are removed when no longer expected.

use crate::client::{ClientError, ClusterClient};
use crate::constants::{
    CONFIG_MOUNTS_HASH_ANNOTATION, ELASTICSEARCH_TYPE, ES_CLUSTER_NAME_LABEL, ES_CONFIG_KEY,
    ES_CONFIG_SECRET_SUFFIX, KIBANA_CONFIG_HASH_ANNOTATION, KIBANA_CONFIG_KEY,
    KIBANA_CONFIG_SECRET_SUFFIX, KIBANA_NAME_LABEL, KIBANA_TYPE, ON_DELETE_DELETE, ON_DELETE_LABEL,
    SECRET_MOUNTS_KEY, SECURE_SETTINGS_ANNOTATION, SETTINGS_HASH_ANNOTATION,
    SOFT_OWNER_KIND_LABEL, SOFT_OWNER_NAMESPACE_LABEL, SOFT_OWNER_NAME_LABEL,
    SOFT_OWNER_REFS_ANNOTATION, SOURCE_SECRET_ANNOTATION, TYPE_LABEL,
};
use crate::crd::{ElasticsearchConfigPolicySpec, KibanaConfigPolicySpec, NamespacedSecretSource, SecretMount};
use crate::ownership::{set_multiple_soft_owners, SoftOwnerRef, POLICY_OWNER_KIND};
use crate::settings::{stable_hash, Config, SettingsError};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;
use tracing::{debug, info};

const MANAGED_LABELS: &[&str] = &[
    SOFT_OWNER_NAMESPACE_LABEL,
    SOFT_OWNER_NAME_LABEL,
    SOFT_OWNER_KIND_LABEL,
];

const MANAGED_ANNOTATIONS: &[&str] = &[
    SOFT_OWNER_REFS_ANNOTATION,
    SETTINGS_HASH_ANNOTATION,
    SECURE_SETTINGS_ANNOTATION,
    CONFIG_MOUNTS_HASH_ANNOTATION,
    KIBANA_CONFIG_HASH_ANNOTATION,
    SOURCE_SECRET_ANNOTATION,
];

/// `<es>-es-config`
pub fn es_config_secret_name(es_name: &str) -> String {
    format!("{es_name}{ES_CONFIG_SECRET_SUFFIX}")
}

/// `<kb>-kb-policy-config`
pub fn kibana_config_secret_name(kibana_name: &str) -> String {
    format!("{kibana_name}{KIBANA_CONFIG_SECRET_SUFFIX}")
}

/// `<es>-<source secret>`
pub fn mounted_secret_name(es_name: &str, source_name: &str) -> String {
    format!("{es_name}-{source_name}")
}

/// A derived secret with the content hash the workload pods are expected to report
#[derive(Debug, Clone)]
pub struct HashedSecret {
    pub secret: Secret,
    pub hash: String,
}

fn derived_meta(
    namespace: &str,
    name: String,
    mut labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    owners: &[SoftOwnerRef],
) -> ObjectMeta {
    labels.insert(ON_DELETE_LABEL.to_string(), ON_DELETE_DELETE.to_string());
    let mut metadata = ObjectMeta {
        name: Some(name),
        namespace: Some(namespace.to_string()),
        labels: Some(labels),
        annotations: Some(annotations),
        ..Default::default()
    };
    set_multiple_soft_owners(&mut metadata, POLICY_OWNER_KIND, owners);
    metadata
}

fn elasticsearch_labels(es_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (TYPE_LABEL.to_string(), ELASTICSEARCH_TYPE.to_string()),
        (ES_CLUSTER_NAME_LABEL.to_string(), es_name.to_string()),
    ])
}

/// Node configuration and secret mounts for an Elasticsearch cluster.
///
/// The hash covers both, since either one requires the nodes to restart.
pub fn new_es_config_secret(
    es_namespace: &str,
    es_name: &str,
    spec: &ElasticsearchConfigPolicySpec,
    owners: &[SoftOwnerRef],
) -> Result<HashedSecret, SettingsError> {
    let config = spec.config.clone().unwrap_or_default();
    let mounts = spec.secret_mounts.clone().unwrap_or_default();
    let hash = stable_hash(&(&config, &mounts))?;

    let mut data = BTreeMap::from([(ES_CONFIG_KEY.to_string(), ByteString(serde_json::to_vec(&config)?))]);
    if !mounts.is_empty() {
        data.insert(SECRET_MOUNTS_KEY.to_string(), ByteString(serde_json::to_vec(&mounts)?));
    }

    let annotations = BTreeMap::from([(CONFIG_MOUNTS_HASH_ANNOTATION.to_string(), hash.clone())]);
    let metadata = derived_meta(
        es_namespace,
        es_config_secret_name(es_name),
        elasticsearch_labels(es_name),
        annotations,
        owners,
    );
    Ok(HashedSecret {
        secret: Secret {
            metadata,
            data: Some(data),
            ..Default::default()
        },
        hash,
    })
}

/// Copy of a user secret into the namespace of the cluster mounting it
pub fn new_mounted_secret(
    es_namespace: &str,
    es_name: &str,
    source: &Secret,
    mount: &SecretMount,
    owners: &[SoftOwnerRef],
) -> Secret {
    let annotations = BTreeMap::from([(SOURCE_SECRET_ANNOTATION.to_string(), mount.secret_name.clone())]);
    Secret {
        metadata: derived_meta(
            es_namespace,
            mounted_secret_name(es_name, &mount.secret_name),
            elasticsearch_labels(es_name),
            annotations,
            owners,
        ),
        data: Some(source.data.clone().unwrap_or_default()),
        type_: source.type_.clone(),
        ..Default::default()
    }
}

/// `kibana.json` plus the keystore sources for a Kibana instance
pub fn new_kibana_config_secret(
    kibana_namespace: &str,
    kibana_name: &str,
    spec: &KibanaConfigPolicySpec,
    owners: &[SoftOwnerRef],
    secure_settings: &[NamespacedSecretSource],
) -> Result<HashedSecret, SettingsError> {
    let config: Config = spec.config.clone().unwrap_or_default();
    let hash = stable_hash(&config)?;

    let mut annotations = BTreeMap::from([(KIBANA_CONFIG_HASH_ANNOTATION.to_string(), hash.clone())]);
    if !secure_settings.is_empty() {
        annotations.insert(
            SECURE_SETTINGS_ANNOTATION.to_string(),
            serde_json::to_string(secure_settings)?,
        );
    }
    let labels = BTreeMap::from([
        (TYPE_LABEL.to_string(), KIBANA_TYPE.to_string()),
        (KIBANA_NAME_LABEL.to_string(), kibana_name.to_string()),
    ]);
    let metadata = derived_meta(
        kibana_namespace,
        kibana_config_secret_name(kibana_name),
        labels,
        annotations,
        owners,
    );
    Ok(HashedSecret {
        secret: Secret {
            metadata,
            data: Some(BTreeMap::from([(
                KIBANA_CONFIG_KEY.to_string(),
                ByteString(serde_json::to_vec(&config)?),
            )])),
            ..Default::default()
        },
        hash,
    })
}

fn is_subset(expected: Option<&BTreeMap<String, String>>, actual: Option<&BTreeMap<String, String>>) -> bool {
    expected
        .into_iter()
        .flatten()
        .all(|(k, v)| actual.and_then(|a| a.get(k)) == Some(v))
}

fn has_stale_keys(
    expected: Option<&BTreeMap<String, String>>,
    actual: Option<&BTreeMap<String, String>>,
    managed: &[&str],
) -> bool {
    managed.iter().any(|key| {
        actual.is_some_and(|a| a.contains_key(*key)) && !expected.is_some_and(|e| e.contains_key(*key))
    })
}

fn merge_managed(
    current: Option<BTreeMap<String, String>>,
    expected: Option<&BTreeMap<String, String>>,
    managed: &[&str],
) -> Option<BTreeMap<String, String>> {
    let mut merged = current.unwrap_or_default();
    for key in managed {
        merged.remove(*key);
    }
    merged.extend(expected.into_iter().flatten().map(|(k, v)| (k.clone(), v.clone())));
    (!merged.is_empty()).then_some(merged)
}

/// Whether `current` already carries everything `expected` asks for
pub fn is_up_to_date(expected: &Secret, current: &Secret) -> bool {
    let expected_data = expected.data.clone().unwrap_or_default();
    let current_data = current.data.clone().unwrap_or_default();
    expected_data == current_data
        && is_subset(expected.metadata.labels.as_ref(), current.metadata.labels.as_ref())
        && is_subset(
            expected.metadata.annotations.as_ref(),
            current.metadata.annotations.as_ref(),
        )
        && !has_stale_keys(
            expected.metadata.labels.as_ref(),
            current.metadata.labels.as_ref(),
            MANAGED_LABELS,
        )
        && !has_stale_keys(
            expected.metadata.annotations.as_ref(),
            current.metadata.annotations.as_ref(),
            MANAGED_ANNOTATIONS,
        )
}

/// Creates the secret, or updates it when it differs from `expected`.
pub async fn reconcile_secret(cluster: &dyn ClusterClient, expected: Secret) -> Result<Secret, ClientError> {
    let namespace = expected.metadata.namespace.clone().unwrap_or_default();
    let name = expected.metadata.name.clone().unwrap_or_default();

    let Some(current) = cluster.get_secret(&namespace, &name).await? else {
        info!("Creating secret {}/{}", namespace, name);
        return cluster.create_secret(&expected).await;
    };

    if is_up_to_date(&expected, &current) {
        debug!("Secret {}/{} is up to date", namespace, name);
        return Ok(current);
    }

    let mut updated = current;
    updated.metadata.labels = merge_managed(
        updated.metadata.labels.take(),
        expected.metadata.labels.as_ref(),
        MANAGED_LABELS,
    );
    updated.metadata.annotations = merge_managed(
        updated.metadata.annotations.take(),
        expected.metadata.annotations.as_ref(),
        MANAGED_ANNOTATIONS,
    );
    updated.data = expected.data;
    if expected.type_.is_some() {
        updated.type_ = expected.type_;
    }
    info!("Updating secret {}/{}", namespace, name);
    cluster.replace_secret(&updated).await
}
