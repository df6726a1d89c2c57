//! # Settings Codec
//!
//! Canonical representation of free-form configuration.
//!
//! Configuration is carried as a JSON object. Two spellings of the same
//! setting are accepted by Elasticsearch and Kibana: nested objects
//! (`{"a": {"b": 1}}`) and dotted keys (`{"a.b": 1}`). The canonical form
//! expands every dotted key into nested objects so both spellings compare
//! equal and can be merged field by field.
//!
//! Integers stay 64-bit integers and floats stay floats through every
//! operation in this module.

mod canonical;
mod hash;
mod merge;

pub use canonical::{canonicalize, flatten};
pub use hash::stable_hash;
pub use merge::{deep_merge, shallow_merge};

use thiserror::Error;

/// Free-form configuration object
pub type Config = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to serialize settings: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Returns true when the config is absent or has no keys
pub fn is_empty(config: Option<&Config>) -> bool {
    config.is_none_or(Config::is_empty)
}
