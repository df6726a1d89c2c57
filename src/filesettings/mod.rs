//! # File Settings
//!
//! The file settings document is the JSON file Elasticsearch watches on disk
//! and applies as reserved cluster state. One document exists per cluster,
//! stored in the `<es>-es-file-settings` secret under `settings.json`.
//!
//! - `document.rs` - the `{metadata, state}` envelope and its content hash
//! - `snapshot.rs` - per-cluster rewrite of snapshot repository locations
//! - `secret.rs` - the settings secret, its version bump and secure settings annotation

mod document;
mod secret;
mod snapshot;

pub use document::{IndexTemplatesState, Settings, SettingsMetadata, SettingsState};
pub use secret::{
    extract_version, new_settings_secret, secure_settings_sources, settings_secret_name,
    SettingsSecret,
};
pub use snapshot::mutate_snapshot_repositories;

use crate::settings::SettingsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileSettingsError {
    #[error("invalid snapshot repository {repository:?}: {reason}")]
    InvalidSnapshotRepo { repository: String, reason: String },

    #[error("failed to serialize file settings: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid file settings version {version:?}")]
    InvalidVersion {
        version: String,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error(transparent)]
    Settings(#[from] SettingsError),
}
