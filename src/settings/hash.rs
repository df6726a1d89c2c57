use super::{flatten, SettingsError};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Content hash of any serializable value.
///
/// The value is rendered to JSON with sorted keys after collapsing nested
/// objects into dotted keys, so the hash does not depend on key order,
/// formatting, or nested vs dotted spelling.
pub fn stable_hash<T: Serialize + ?Sized>(value: &T) -> Result<String, SettingsError> {
    let normalized = normalize(serde_json::to_value(value)?);
    let bytes = serde_json::to_vec(&normalized)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(flatten(&map)),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
        other => other,
    }
}
