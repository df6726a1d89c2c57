use super::{FileSettingsError, Settings};
use crate::constants::{
    ELASTICSEARCH_TYPE, ES_CLUSTER_NAME_LABEL, FILE_SETTINGS_SECRET_SUFFIX, ON_DELETE_LABEL,
    ON_DELETE_RESET, SECURE_SETTINGS_ANNOTATION, SETTINGS_HASH_ANNOTATION, SETTINGS_SECRET_KEY,
    TYPE_LABEL,
};
use crate::crd::{ElasticsearchConfigPolicySpec, NamespacedSecretSource};
use crate::ownership::{set_multiple_soft_owners, SoftOwnerRef, POLICY_OWNER_KIND};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;

/// `<es>-es-file-settings`
pub fn settings_secret_name(es_name: &str) -> String {
    format!("{es_name}{FILE_SETTINGS_SECRET_SUFFIX}")
}

/// Expected file settings secret with the version it carries
#[derive(Debug, Clone)]
pub struct SettingsSecret {
    pub secret: Secret,
    pub version: i64,
    pub hash: String,
}

/// Builds the expected file settings secret for a cluster.
///
/// The version of `current` is kept when the state hash is unchanged and
/// bumped by one otherwise. Without a merged policy the state is empty, which
/// is how orphaned clusters get their reserved state cleared.
pub fn new_settings_secret(
    es_namespace: &str,
    es_name: &str,
    current: Option<&Secret>,
    policy: Option<&ElasticsearchConfigPolicySpec>,
    owners: &[SoftOwnerRef],
    secure_settings: &[NamespacedSecretSource],
) -> Result<SettingsSecret, FileSettingsError> {
    let mut settings = Settings::empty(0);
    if let Some(policy) = policy {
        settings.update_state(es_namespace, es_name, policy)?;
    }
    let hash = settings.hash()?;

    let version = match current {
        Some(current) => {
            let previous = extract_version(current)?;
            let previous_hash = current
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(SETTINGS_HASH_ANNOTATION));
            if previous_hash == Some(&hash) {
                previous
            } else {
                previous + 1
            }
        }
        None => 1,
    };
    settings.metadata.version = version.to_string();

    let mut annotations = BTreeMap::from([(SETTINGS_HASH_ANNOTATION.to_string(), hash.clone())]);
    if !secure_settings.is_empty() {
        annotations.insert(
            SECURE_SETTINGS_ANNOTATION.to_string(),
            serde_json::to_string(secure_settings)?,
        );
    }
    let labels = BTreeMap::from([
        (TYPE_LABEL.to_string(), ELASTICSEARCH_TYPE.to_string()),
        (ES_CLUSTER_NAME_LABEL.to_string(), es_name.to_string()),
        (ON_DELETE_LABEL.to_string(), ON_DELETE_RESET.to_string()),
    ]);

    let mut metadata = ObjectMeta {
        name: Some(settings_secret_name(es_name)),
        namespace: Some(es_namespace.to_string()),
        labels: Some(labels),
        annotations: Some(annotations),
        ..Default::default()
    };
    set_multiple_soft_owners(&mut metadata, POLICY_OWNER_KIND, owners);

    let secret = Secret {
        metadata,
        data: Some(BTreeMap::from([(
            SETTINGS_SECRET_KEY.to_string(),
            ByteString(serde_json::to_vec(&settings)?),
        )])),
        ..Default::default()
    };
    Ok(SettingsSecret {
        secret,
        version,
        hash,
    })
}

/// Version stored in a file settings secret. A secret without a document is at version 0.
pub fn extract_version(secret: &Secret) -> Result<i64, FileSettingsError> {
    let Some(raw) = secret
        .data
        .as_ref()
        .and_then(|d| d.get(SETTINGS_SECRET_KEY))
        .filter(|raw| !raw.0.is_empty())
    else {
        return Ok(0);
    };
    let settings: Settings = serde_json::from_slice(&raw.0)?;
    settings
        .metadata
        .version
        .parse::<i64>()
        .map_err(|source| FileSettingsError::InvalidVersion {
            version: settings.metadata.version.clone(),
            source,
        })
}

/// Secure settings sources recorded on a derived secret, for the workload controllers.
pub fn secure_settings_sources(secret: &Secret) -> Result<Vec<NamespacedSecretSource>, FileSettingsError> {
    match secret
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(SECURE_SETTINGS_ANNOTATION))
    {
        Some(raw) => Ok(serde_json::from_str(raw)?),
        None => Ok(Vec::new()),
    }
}
