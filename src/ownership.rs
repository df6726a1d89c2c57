//! # Soft Ownership
//!
//! Derived secrets can't carry owner references to a policy in another
//! namespace, and several policies may contribute to the same secret. Ownership
//! is therefore recorded with labels and annotations instead:
//!
//! - single owner: the `owner-kind`, `owner-namespace` and `owner-name` labels
//! - several owners: the `owner-kind` label plus the `owner-refs` annotation,
//!   a JSON set `{"<ns>/<name>": {}}`
//!
//! An object either has no soft owner or a non-empty owner set. An empty
//! `owner-refs` annotation is never written.

use crate::constants::{
    SOFT_OWNER_KIND_LABEL, SOFT_OWNER_NAMESPACE_LABEL, SOFT_OWNER_NAME_LABEL,
    SOFT_OWNER_REFS_ANNOTATION,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

/// Kind recorded in the owner-kind label
pub const POLICY_OWNER_KIND: &str = "StackConfigPolicy";

#[derive(Debug, Error)]
pub enum OwnershipError {
    #[error("malformed {annotation} annotation: {source}")]
    MalformedOwnerRefs {
        annotation: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// A policy recorded as owner of a derived object
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SoftOwnerRef {
    pub namespace: String,
    pub name: String,
    pub kind: String,
}

impl SoftOwnerRef {
    pub fn policy(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            kind: POLICY_OWNER_KIND.to_string(),
        }
    }

    /// `namespace/name`
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    fn parse(key: &str, kind: &str) -> Option<Self> {
        let (namespace, name) = key.split_once('/')?;
        if namespace.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            kind: kind.to_string(),
        })
    }
}

impl fmt::Display for SoftOwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Reads the owner set annotation. Older writers stored a plain JSON list.
fn parse_owner_refs(raw: &str) -> Result<BTreeSet<String>, OwnershipError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|source| OwnershipError::MalformedOwnerRefs {
            annotation: SOFT_OWNER_REFS_ANNOTATION,
            source,
        })?;
    let set = match value {
        serde_json::Value::Array(_) => serde_json::from_value::<Vec<String>>(value)
            .map(|v| v.into_iter().collect())
            .map_err(|source| OwnershipError::MalformedOwnerRefs {
                annotation: SOFT_OWNER_REFS_ANNOTATION,
                source,
            })?,
        other => serde_json::from_value::<BTreeMap<String, serde_json::Value>>(other)
            .map(|m| m.into_keys().collect())
            .map_err(|source| OwnershipError::MalformedOwnerRefs {
                annotation: SOFT_OWNER_REFS_ANNOTATION,
                source,
            })?,
    };
    Ok(set)
}

fn render_owner_refs(owners: &BTreeSet<String>) -> String {
    let set: BTreeMap<&str, serde_json::Value> = owners
        .iter()
        .map(|o| (o.as_str(), serde_json::Value::Object(serde_json::Map::new())))
        .collect();
    // a map of strings to empty objects always serializes
    serde_json::to_string(&set).unwrap_or_default()
}

fn single_owner_from_labels(labels: &BTreeMap<String, String>) -> Option<SoftOwnerRef> {
    let namespace = labels.get(SOFT_OWNER_NAMESPACE_LABEL)?;
    let name = labels.get(SOFT_OWNER_NAME_LABEL)?;
    let kind = labels.get(SOFT_OWNER_KIND_LABEL)?;
    if namespace.is_empty() || name.is_empty() || kind.is_empty() {
        return None;
    }
    Some(SoftOwnerRef {
        namespace: namespace.clone(),
        name: name.clone(),
        kind: kind.clone(),
    })
}

fn clear_all(meta: &mut ObjectMeta) {
    if let Some(labels) = meta.labels.as_mut() {
        labels.remove(SOFT_OWNER_NAMESPACE_LABEL);
        labels.remove(SOFT_OWNER_NAME_LABEL);
        labels.remove(SOFT_OWNER_KIND_LABEL);
    }
    if let Some(annotations) = meta.annotations.as_mut() {
        annotations.remove(SOFT_OWNER_REFS_ANNOTATION);
    }
}

/// Records a single owner, dropping any owner set annotation.
pub fn set_single_soft_owner(meta: &mut ObjectMeta, owner: &SoftOwnerRef) {
    if let Some(annotations) = meta.annotations.as_mut() {
        annotations.remove(SOFT_OWNER_REFS_ANNOTATION);
    }
    let labels = meta.labels.get_or_insert_with(BTreeMap::new);
    labels.insert(SOFT_OWNER_NAMESPACE_LABEL.to_string(), owner.namespace.clone());
    labels.insert(SOFT_OWNER_NAME_LABEL.to_string(), owner.name.clone());
    labels.insert(SOFT_OWNER_KIND_LABEL.to_string(), owner.kind.clone());
}

/// Records a set of owners, dropping the single-owner labels.
///
/// One owner is stored in the single-owner form and no owner clears
/// ownership entirely, so the owner set annotation is never empty.
pub fn set_multiple_soft_owners(meta: &mut ObjectMeta, kind: &str, owners: &[SoftOwnerRef]) {
    match owners {
        [] => clear_all(meta),
        [owner] => set_single_soft_owner(meta, owner),
        _ => {
            let labels = meta.labels.get_or_insert_with(BTreeMap::new);
            labels.remove(SOFT_OWNER_NAMESPACE_LABEL);
            labels.remove(SOFT_OWNER_NAME_LABEL);
            labels.insert(SOFT_OWNER_KIND_LABEL.to_string(), kind.to_string());

            let set: BTreeSet<String> = owners.iter().map(SoftOwnerRef::key).collect();
            meta.annotations
                .get_or_insert_with(BTreeMap::new)
                .insert(SOFT_OWNER_REFS_ANNOTATION.to_string(), render_owner_refs(&set));
        }
    }
}

/// All soft owners recorded on the object
pub fn soft_owner_refs(meta: &ObjectMeta) -> Result<Vec<SoftOwnerRef>, OwnershipError> {
    let Some(kind) = meta
        .labels
        .as_ref()
        .and_then(|l| l.get(SOFT_OWNER_KIND_LABEL))
    else {
        return Ok(Vec::new());
    };
    if let Some(raw) = meta
        .annotations
        .as_ref()
        .and_then(|a| a.get(SOFT_OWNER_REFS_ANNOTATION))
    {
        return Ok(parse_owner_refs(raw)?
            .iter()
            // malformed entries are skipped
            .filter_map(|key| SoftOwnerRef::parse(key, kind))
            .collect());
    }
    Ok(meta
        .labels
        .as_ref()
        .and_then(single_owner_from_labels)
        .into_iter()
        .collect())
}

/// Whether `owner` is one of the soft owners of the object
pub fn is_soft_owned_by(meta: &ObjectMeta, owner: &SoftOwnerRef) -> Result<bool, OwnershipError> {
    let Some(labels) = meta.labels.as_ref() else {
        return Ok(false);
    };
    if labels.get(SOFT_OWNER_KIND_LABEL) != Some(&owner.kind) {
        return Ok(false);
    }
    if let Some(raw) = meta
        .annotations
        .as_ref()
        .and_then(|a| a.get(SOFT_OWNER_REFS_ANNOTATION))
    {
        return Ok(parse_owner_refs(raw)?.contains(&owner.key()));
    }
    Ok(single_owner_from_labels(labels)
        .is_some_and(|o| o.namespace == owner.namespace && o.name == owner.name))
}

/// Removes `owner` from the object, returning how many owners remain.
///
/// When no owner remains every soft-owner label and annotation is stripped.
pub fn remove_soft_owner(meta: &mut ObjectMeta, owner: &SoftOwnerRef) -> Result<usize, OwnershipError> {
    if let Some(raw) = meta
        .annotations
        .as_ref()
        .and_then(|a| a.get(SOFT_OWNER_REFS_ANNOTATION))
    {
        let mut set = parse_owner_refs(raw)?;
        set.remove(&owner.key());
        let kind = meta
            .labels
            .as_ref()
            .and_then(|l| l.get(SOFT_OWNER_KIND_LABEL))
            .cloned()
            .unwrap_or_else(|| owner.kind.clone());
        let remaining: Vec<SoftOwnerRef> = set
            .iter()
            .filter_map(|key| SoftOwnerRef::parse(key, &kind))
            .collect();
        set_multiple_soft_owners(meta, &kind, &remaining);
        return Ok(remaining.len());
    }

    match meta.labels.as_ref().and_then(single_owner_from_labels) {
        None => Ok(0),
        Some(current) if current.namespace == owner.namespace && current.name == owner.name => {
            clear_all(meta);
            Ok(0)
        }
        Some(_) => Ok(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta_with(labels: &[(&str, &str)], annotations: &[(&str, &str)]) -> ObjectMeta {
        ObjectMeta {
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            ),
            annotations: Some(
                annotations
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn test_single_owner_round_trip() {
        let owner = SoftOwnerRef::policy("ns1", "p1");
        let mut meta = meta_with(&[("app", "x")], &[(SOFT_OWNER_REFS_ANNOTATION, r#"{"a/b":{}}"#)]);
        set_single_soft_owner(&mut meta, &owner);

        assert!(meta.annotations.as_ref().unwrap().get(SOFT_OWNER_REFS_ANNOTATION).is_none());
        assert_eq!(soft_owner_refs(&meta).unwrap(), vec![owner.clone()]);
        assert!(is_soft_owned_by(&meta, &owner).unwrap());
        assert!(!is_soft_owned_by(&meta, &SoftOwnerRef::policy("ns1", "other")).unwrap());
        // user labels are untouched
        assert_eq!(meta.labels.as_ref().unwrap().get("app").map(String::as_str), Some("x"));
    }

    #[test]
    fn test_multiple_owners_replace_single_owner_labels() {
        let p1 = SoftOwnerRef::policy("ns1", "p1");
        let p2 = SoftOwnerRef::policy("ns2", "p2");
        let mut meta = ObjectMeta::default();
        set_single_soft_owner(&mut meta, &p1);
        set_multiple_soft_owners(&mut meta, POLICY_OWNER_KIND, &[p2.clone(), p1.clone()]);

        let labels = meta.labels.as_ref().unwrap();
        assert!(!labels.contains_key(SOFT_OWNER_NAME_LABEL));
        assert!(!labels.contains_key(SOFT_OWNER_NAMESPACE_LABEL));
        assert_eq!(labels.get(SOFT_OWNER_KIND_LABEL).map(String::as_str), Some(POLICY_OWNER_KIND));
        assert_eq!(
            meta.annotations.as_ref().unwrap().get(SOFT_OWNER_REFS_ANNOTATION).map(String::as_str),
            Some(r#"{"ns1/p1":{},"ns2/p2":{}}"#)
        );
        assert_eq!(soft_owner_refs(&meta).unwrap(), vec![p1.clone(), p2.clone()]);
        assert!(is_soft_owned_by(&meta, &p2).unwrap());
    }

    #[test]
    fn test_remove_collapses_to_no_owner() {
        let p1 = SoftOwnerRef::policy("ns1", "p1");
        let p2 = SoftOwnerRef::policy("ns2", "p2");
        let mut meta = ObjectMeta::default();
        set_multiple_soft_owners(&mut meta, POLICY_OWNER_KIND, &[p1.clone(), p2.clone()]);

        assert_eq!(remove_soft_owner(&mut meta, &p1).unwrap(), 1);
        assert!(!is_soft_owned_by(&meta, &p1).unwrap());
        assert!(is_soft_owned_by(&meta, &p2).unwrap());

        assert_eq!(remove_soft_owner(&mut meta, &p2).unwrap(), 0);
        assert!(soft_owner_refs(&meta).unwrap().is_empty());
        assert!(meta.annotations.as_ref().unwrap().get(SOFT_OWNER_REFS_ANNOTATION).is_none());
        assert!(meta.labels.as_ref().unwrap().get(SOFT_OWNER_KIND_LABEL).is_none());
    }

    #[test]
    fn test_remove_other_single_owner_is_a_no_op() {
        let mut meta = ObjectMeta::default();
        set_single_soft_owner(&mut meta, &SoftOwnerRef::policy("ns1", "p1"));
        assert_eq!(remove_soft_owner(&mut meta, &SoftOwnerRef::policy("ns1", "p2")).unwrap(), 1);
        assert_eq!(soft_owner_refs(&meta).unwrap().len(), 1);
    }

    #[test]
    fn test_legacy_list_annotation_is_read() {
        let meta = meta_with(
            &[(SOFT_OWNER_KIND_LABEL, POLICY_OWNER_KIND)],
            &[(SOFT_OWNER_REFS_ANNOTATION, r#"["ns1/p1","broken","ns2/p2"]"#)],
        );
        let owners = soft_owner_refs(&meta).unwrap();
        assert_eq!(
            owners,
            vec![SoftOwnerRef::policy("ns1", "p1"), SoftOwnerRef::policy("ns2", "p2")]
        );
    }

    #[test]
    fn test_malformed_annotation_is_an_error() {
        let meta = meta_with(
            &[(SOFT_OWNER_KIND_LABEL, POLICY_OWNER_KIND)],
            &[(SOFT_OWNER_REFS_ANNOTATION, "not json")],
        );
        assert!(matches!(
            is_soft_owned_by(&meta, &SoftOwnerRef::policy("ns1", "p1")),
            Err(OwnershipError::MalformedOwnerRefs { .. })
        ));
    }

    #[test]
    fn test_unowned_object() {
        let meta = ObjectMeta::default();
        assert!(soft_owner_refs(&meta).unwrap().is_empty());
        assert!(!is_soft_owned_by(&meta, &SoftOwnerRef::policy("a", "b")).unwrap());
        let mut meta = meta;
        assert_eq!(remove_soft_owner(&mut meta, &SoftOwnerRef::policy("a", "b")).unwrap(), 0);
    }
}
