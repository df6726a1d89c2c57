//! Snapshot repositories shared by several clusters must not collide, so each
//! cluster writes below its own `<namespace>-<name>` prefix.

use super::FileSettingsError;
use crate::settings::Config;
use serde_json::Value;

/// Returns a copy of `repositories` with per-cluster locations.
///
/// | type | rewrite |
/// |---|---|
/// | `azure`, `gcs`, `s3` | `settings.base_path` defaults to `snapshots/<ns>-<name>` |
/// | `fs` | `/<ns>-<name>` appended to `settings.location` |
/// | `hdfs` | `/<ns>-<name>` appended to `settings.path` |
/// | anything else | untouched |
pub fn mutate_snapshot_repositories(
    repositories: &Config,
    es_namespace: &str,
    es_name: &str,
) -> Result<Config, FileSettingsError> {
    let suffix = format!("{es_namespace}-{es_name}");
    let mut mutated = Config::new();
    for (name, repository) in repositories {
        let Value::Object(repository) = repository else {
            return Err(invalid(name, "repository definition is not an object"));
        };
        let mut repository = repository.clone();
        let kind = repository.get("type").and_then(Value::as_str).map(str::to_owned);
        match kind.as_deref() {
            Some("azure" | "gcs" | "s3") => {
                let settings = settings_of(name, &mut repository)?;
                settings
                    .entry("base_path")
                    .or_insert_with(|| Value::String(format!("snapshots/{suffix}")));
            }
            Some("fs") => append_to(name, settings_of(name, &mut repository)?, "location", &suffix)?,
            Some("hdfs") => append_to(name, settings_of(name, &mut repository)?, "path", &suffix)?,
            _ => {}
        }
        mutated.insert(name.clone(), Value::Object(repository));
    }
    Ok(mutated)
}

fn invalid(repository: &str, reason: impl Into<String>) -> FileSettingsError {
    FileSettingsError::InvalidSnapshotRepo {
        repository: repository.to_string(),
        reason: reason.into(),
    }
}

fn settings_of<'a>(name: &str, repository: &'a mut Config) -> Result<&'a mut Config, FileSettingsError> {
    let settings = repository
        .entry("settings")
        .or_insert_with(|| Value::Object(Config::new()));
    match settings {
        Value::Object(settings) => Ok(settings),
        _ => Err(invalid(name, "settings is not an object")),
    }
}

fn append_to(name: &str, settings: &mut Config, key: &str, suffix: &str) -> Result<(), FileSettingsError> {
    let Some(Value::String(base)) = settings.get(key) else {
        return Err(invalid(name, format!("settings.{key} must be a string")));
    };
    let joined = format!("{}/{suffix}", base.trim_end_matches('/'));
    settings.insert(key.to_string(), Value::String(joined));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn repos(value: Value) -> Config {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_object_store_base_path_injection() {
        let input = repos(json!({
            "repo-s3": {"type": "s3", "settings": {"bucket": "b"}},
            "repo-gcs": {"type": "gcs"},
            "repo-azure": {"type": "azure", "settings": {"base_path": "custom"}}
        }));
        let out = mutate_snapshot_repositories(&input, "esNs", "esName").unwrap();
        assert_eq!(
            out["repo-s3"],
            json!({"type": "s3", "settings": {"bucket": "b", "base_path": "snapshots/esNs-esName"}})
        );
        assert_eq!(out["repo-gcs"]["settings"]["base_path"], json!("snapshots/esNs-esName"));
        assert_eq!(out["repo-azure"]["settings"]["base_path"], json!("custom"));
    }

    #[test]
    fn test_fs_and_hdfs_paths_are_suffixed() {
        let input = repos(json!({
            "repo-fs": {"type": "fs", "settings": {"location": "/mnt/backup"}},
            "repo-hdfs": {"type": "hdfs", "settings": {"uri": "hdfs://nn:8020", "path": "snapshots/"}}
        }));
        let out = mutate_snapshot_repositories(&input, "esNs", "esName").unwrap();
        assert_eq!(out["repo-fs"]["settings"]["location"], json!("/mnt/backup/esNs-esName"));
        assert_eq!(out["repo-hdfs"]["settings"]["path"], json!("snapshots/esNs-esName"));
    }

    #[test]
    fn test_url_and_unknown_types_untouched() {
        let input = repos(json!({
            "repo-url": {"type": "url", "settings": {"url": "http://x"}},
            "repo-source": {"type": "source", "settings": {"delegate_type": "fs"}},
            "repo-odd": {"type": 42}
        }));
        let out = mutate_snapshot_repositories(&input, "ns", "es").unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn test_invalid_repositories() {
        let not_object = repos(json!({"r": "s3"}));
        assert!(matches!(
            mutate_snapshot_repositories(&not_object, "ns", "es"),
            Err(FileSettingsError::InvalidSnapshotRepo { .. })
        ));

        let missing_location = repos(json!({"r": {"type": "fs", "settings": {}}}));
        assert!(matches!(
            mutate_snapshot_repositories(&missing_location, "ns", "es"),
            Err(FileSettingsError::InvalidSnapshotRepo { .. })
        ));

        let numeric_path = repos(json!({"r": {"type": "hdfs", "settings": {"path": 3}}}));
        assert!(matches!(
            mutate_snapshot_repositories(&numeric_path, "ns", "es"),
            Err(FileSettingsError::InvalidSnapshotRepo { .. })
        ));
    }

    #[test]
    fn test_input_is_not_modified() {
        let input = repos(json!({"r": {"type": "fs", "settings": {"location": "/a"}}}));
        let _ = mutate_snapshot_repositories(&input, "ns", "es").unwrap();
        assert_eq!(input["r"]["settings"]["location"], json!("/a"));
    }
}
