//! # Dynamic Watches
//!
//! Secrets referenced by `secretMounts` live in the policy namespace and carry
//! no label tying them to the policy. The registry remembers which policy
//! references which secret so a change to the source secret requeues the
//! policies copying it.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

/// Identifies the registry entry of a policy
pub fn watch_name(policy_namespace: &str, policy_name: &str) -> String {
    format!("{policy_name}-{policy_namespace}-additional-secret-mounts-watcher")
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct WatchEntry {
    policy_namespace: String,
    policy_name: String,
    secrets: BTreeSet<(String, String)>,
}

/// Shared between the reconciler, which updates it, and the secret watch mapper.
#[derive(Debug, Clone, Default)]
pub struct DynamicWatches {
    entries: Arc<Mutex<HashMap<String, WatchEntry>>>,
}

impl DynamicWatches {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the secrets watched for a policy. An empty set removes the entry.
    pub fn replace(
        &self,
        policy_namespace: &str,
        policy_name: &str,
        secrets: impl IntoIterator<Item = (String, String)>,
    ) {
        let secrets: BTreeSet<_> = secrets.into_iter().collect();
        let name = watch_name(policy_namespace, policy_name);
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if secrets.is_empty() {
            entries.remove(&name);
            return;
        }
        entries.insert(
            name,
            WatchEntry {
                policy_namespace: policy_namespace.to_string(),
                policy_name: policy_name.to_string(),
                secrets,
            },
        );
    }

    pub fn remove(&self, policy_namespace: &str, policy_name: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&watch_name(policy_namespace, policy_name));
    }

    /// `(namespace, name)` of every policy watching the given secret
    pub fn policies_watching(&self, secret_namespace: &str, secret_name: &str) -> Vec<(String, String)> {
        let key = (secret_namespace.to_string(), secret_name.to_string());
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut policies: Vec<_> = entries
            .values()
            .filter(|e| e.secrets.contains(&key))
            .map(|e| (e.policy_namespace.clone(), e.policy_name.clone()))
            .collect();
        policies.sort();
        policies
    }

    pub fn registrations(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}
