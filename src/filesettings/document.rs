use super::{mutate_snapshot_repositories, FileSettingsError};
use crate::constants::FILE_SETTINGS_COMPATIBILITY;
use crate::crd::ElasticsearchConfigPolicySpec;
use crate::settings::{stable_hash, Config};
use serde::{Deserialize, Serialize};

/// The document Elasticsearch reloads from disk
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Settings {
    pub metadata: SettingsMetadata,
    pub state: SettingsState,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SettingsMetadata {
    /// Decimal string, bumped whenever `state` changes
    pub version: String,
    pub compatibility: String,
}

/// Reserved state slots. Every slot is always present, empty or not.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SettingsState {
    #[serde(default)]
    pub cluster_settings: Config,
    #[serde(default)]
    pub snapshot_repositories: Config,
    #[serde(default)]
    pub slm: Config,
    #[serde(default)]
    pub role_mappings: Config,
    #[serde(default)]
    pub ilm: Config,
    #[serde(default)]
    pub ingest_pipelines: Config,
    #[serde(default)]
    pub index_templates: IndexTemplatesState,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct IndexTemplatesState {
    #[serde(default)]
    pub component_templates: Config,
    #[serde(default)]
    pub composable_index_templates: Config,
}

impl Settings {
    /// A document with every slot empty
    #[must_use]
    pub fn empty(version: i64) -> Self {
        Self {
            metadata: SettingsMetadata {
                version: version.to_string(),
                compatibility: FILE_SETTINGS_COMPATIBILITY.to_string(),
            },
            state: SettingsState::default(),
        }
    }

    /// Copies every slot of the policy into the state, rewriting snapshot
    /// repositories for the given cluster.
    pub fn update_state(
        &mut self,
        es_namespace: &str,
        es_name: &str,
        policy: &ElasticsearchConfigPolicySpec,
    ) -> Result<(), FileSettingsError> {
        let copy = |slot: &Option<Config>| slot.clone().unwrap_or_default();

        let mut state = SettingsState {
            cluster_settings: copy(&policy.cluster_settings),
            snapshot_repositories: Config::new(),
            slm: copy(&policy.snapshot_lifecycle_policies),
            role_mappings: copy(&policy.security_role_mappings),
            ilm: copy(&policy.index_lifecycle_policies),
            ingest_pipelines: copy(&policy.ingest_pipelines),
            index_templates: IndexTemplatesState {
                component_templates: copy(&policy.index_templates.component_templates),
                composable_index_templates: copy(&policy.index_templates.composable_index_templates),
            },
        };
        if let Some(repositories) = policy.snapshot_repositories.as_ref() {
            state.snapshot_repositories =
                mutate_snapshot_repositories(repositories, es_namespace, es_name)?;
        }
        self.state = state;
        Ok(())
    }

    /// Content hash of the state only; metadata is excluded.
    pub fn hash(&self) -> Result<String, FileSettingsError> {
        Ok(stable_hash(&self.state)?)
    }
}
