//! Folding every policy that selects a target into one spec.
//!
//! Policies are applied from the highest weight down, so a lower weight
//! overrides on overlap. Elasticsearch and Kibana share the algorithm and
//! only differ in how their slots combine, see [`TargetSpec`].

use super::MergeError;
use crate::crd::{
    ElasticsearchConfigPolicySpec, KibanaConfigPolicySpec, NamespacedSecretSource, SecretMount,
    SecretSource, StackConfigPolicy,
};
use crate::ownership::SoftOwnerRef;
use crate::settings::{deep_merge, shallow_merge};
use std::collections::HashMap;

/// Per-target slice of a StackConfigPolicy
pub trait TargetSpec: Clone + Default {
    /// The part of `policy` that applies to this kind of target
    fn of(policy: &StackConfigPolicy) -> &Self;

    /// Merges every slot of `src` over `self`, secret mounts excepted
    fn merge_slots(&mut self, src: &Self);

    /// Keystore sources contributed by `policy`, in declaration order
    fn secure_settings(policy: &StackConfigPolicy) -> Vec<&SecretSource>;

    fn secret_mounts(&self) -> &[SecretMount] {
        &[]
    }

    fn set_secret_mounts(&mut self, _mounts: Vec<SecretMount>) {}
}

impl TargetSpec for ElasticsearchConfigPolicySpec {
    fn of(policy: &StackConfigPolicy) -> &Self {
        &policy.spec.elasticsearch
    }

    fn merge_slots(&mut self, src: &Self) {
        self.cluster_settings = deep_merge(self.cluster_settings.as_ref(), src.cluster_settings.as_ref());
        self.config = deep_merge(self.config.as_ref(), src.config.as_ref());

        self.snapshot_repositories =
            shallow_merge(self.snapshot_repositories.take(), src.snapshot_repositories.as_ref());
        self.snapshot_lifecycle_policies = shallow_merge(
            self.snapshot_lifecycle_policies.take(),
            src.snapshot_lifecycle_policies.as_ref(),
        );
        self.security_role_mappings =
            shallow_merge(self.security_role_mappings.take(), src.security_role_mappings.as_ref());
        self.index_lifecycle_policies = shallow_merge(
            self.index_lifecycle_policies.take(),
            src.index_lifecycle_policies.as_ref(),
        );
        self.ingest_pipelines = shallow_merge(self.ingest_pipelines.take(), src.ingest_pipelines.as_ref());
        self.index_templates.component_templates = shallow_merge(
            self.index_templates.component_templates.take(),
            src.index_templates.component_templates.as_ref(),
        );
        self.index_templates.composable_index_templates = shallow_merge(
            self.index_templates.composable_index_templates.take(),
            src.index_templates.composable_index_templates.as_ref(),
        );
    }

    fn secure_settings(policy: &StackConfigPolicy) -> Vec<&SecretSource> {
        // deprecated top-level field first
        policy
            .spec
            .secure_settings
            .iter()
            .flatten()
            .chain(policy.spec.elasticsearch.secure_settings.iter().flatten())
            .collect()
    }

    fn secret_mounts(&self) -> &[SecretMount] {
        self.secret_mounts.as_deref().unwrap_or_default()
    }

    fn set_secret_mounts(&mut self, mounts: Vec<SecretMount>) {
        self.secret_mounts = if mounts.is_empty() { None } else { Some(mounts) };
    }
}

impl TargetSpec for KibanaConfigPolicySpec {
    fn of(policy: &StackConfigPolicy) -> &Self {
        &policy.spec.kibana
    }

    fn merge_slots(&mut self, src: &Self) {
        self.config = deep_merge(self.config.as_ref(), src.config.as_ref());
    }

    fn secure_settings(policy: &StackConfigPolicy) -> Vec<&SecretSource> {
        policy.spec.kibana.secure_settings.iter().flatten().collect()
    }
}

/// Result of merging every policy selecting one target
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedPolicy<T> {
    pub spec: T,
    /// Keystore sources qualified with the namespace of the contributing policy
    pub secure_settings: Vec<NamespacedSecretSource>,
    /// Contributing policies, in application order (highest weight first)
    pub policy_refs: Vec<SoftOwnerRef>,
    /// Secret mounts with the namespace of the policy that declared them
    pub secret_mount_sources: Vec<(String, SecretMount)>,
}

/// Merges already selected policies.
///
/// Equal weights cannot be ordered and fail with [`MergeError::WeightConflict`].
/// A single policy is returned as-is, without canonicalizing its settings.
pub fn merge_policies<T: TargetSpec>(
    mut policies: Vec<&StackConfigPolicy>,
) -> Result<MergedPolicy<T>, MergeError> {
    // key tie-break keeps the error message stable across list orders
    policies.sort_by(|a, b| b.spec.weight.cmp(&a.spec.weight).then_with(|| a.key().cmp(&b.key())));
    for pair in policies.windows(2) {
        if pair[0].spec.weight == pair[1].spec.weight {
            return Err(MergeError::WeightConflict {
                first: pair[0].key(),
                second: pair[1].key(),
                weight: pair[0].spec.weight,
            });
        }
    }

    let mut merged = MergedPolicy::<T>::default();
    let mut mounts = MountAggregator::default();
    let mut mounted = Vec::new();
    let mut contributors = 0;

    for policy in &policies {
        let spec = T::of(policy);
        merged.spec.merge_slots(spec);
        mounted = mounts.add(mounted, spec.secret_mounts(), policy)?;
        for mount in spec.secret_mounts() {
            merged
                .secret_mount_sources
                .push((policy.namespace_or_default().to_string(), mount.clone()));
        }

        let sources = T::secure_settings(policy);
        if !sources.is_empty() {
            contributors += 1;
            merged.secure_settings.extend(
                sources
                    .into_iter()
                    .map(|s| NamespacedSecretSource::from_source(policy.namespace_or_default(), s)),
            );
        }
        merged.policy_refs.push(SoftOwnerRef::policy(
            policy.namespace_or_default(),
            policy.name_or_default(),
        ));
    }

    if contributors > 1 {
        merged
            .secure_settings
            .sort_by(|a, b| (&a.namespace, &a.secret_name).cmp(&(&b.namespace, &b.secret_name)));
    }
    merged.secret_mount_sources.sort_by(|a, b| a.1.secret_name.cmp(&b.1.secret_name));

    if let [single] = policies.as_slice() {
        merged.spec = T::of(single).clone();
    } else {
        merged.spec.set_secret_mounts(mounted);
    }
    Ok(merged)
}

/// Tracks which policy declared each secret name and mount path.
#[derive(Default)]
struct MountAggregator {
    by_secret_name: HashMap<String, String>,
    by_mount_path: HashMap<String, String>,
}

impl MountAggregator {
    fn add(
        &mut self,
        mut dst: Vec<SecretMount>,
        src: &[SecretMount],
        policy: &StackConfigPolicy,
    ) -> Result<Vec<SecretMount>, MergeError> {
        if src.is_empty() {
            return Ok(dst);
        }
        let should_sort = !dst.is_empty();
        let key = policy.key();
        for mount in src {
            if let Some(existing) = self.by_secret_name.get(&mount.secret_name) {
                return Err(MergeError::SecretMountConflict {
                    field: "with name",
                    value: mount.secret_name.clone(),
                    policy: key,
                    existing: existing.clone(),
                });
            }
            if let Some(existing) = self.by_mount_path.get(&mount.mount_path) {
                return Err(MergeError::SecretMountConflict {
                    field: "mount path",
                    value: mount.mount_path.clone(),
                    policy: key,
                    existing: existing.clone(),
                });
            }
            self.by_secret_name.insert(mount.secret_name.clone(), key.clone());
            self.by_mount_path.insert(mount.mount_path.clone(), key.clone());
            dst.push(mount.clone());
        }
        if should_sort {
            dst.sort_by(|a, b| a.secret_name.cmp(&b.secret_name));
        }
        Ok(dst)
    }
}
