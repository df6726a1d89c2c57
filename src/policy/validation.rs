//! Policy validation.
//!
//! `scpctl validate` runs both checks; the reconciler runs
//! [`validate_policy`] before writing anything. Strict
//! decoding needs the raw document since the API server prunes unknown
//! fields before the controller ever sees them.

use crate::constants::POLICY_NAME_MAX_LENGTH;
use crate::crd::{ElasticsearchConfigPolicySpec, StackConfigPolicy};
use crate::settings::is_empty;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("spec.elasticsearch and spec.kibana.config are both empty")]
    NoConfiguration,

    #[error("spec.elasticsearch.secretMounts: mountPath {mount_path:?} is used more than once")]
    DuplicateMountPath { mount_path: String },

    #[error("metadata.name: {name:?} is {length} characters long, at most {max} are allowed")]
    NameTooLong { name: String, length: usize, max: usize },

    #[error("{path}: unknown field {field:?}")]
    UnknownField { path: String, field: String },

    #[error("{path}: expected {expected}")]
    UnexpectedType { path: String, expected: &'static str },
}

/// Every violation found in a policy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&messages.join("; "))
    }
}

fn has_elasticsearch_config(es: &ElasticsearchConfigPolicySpec) -> bool {
    !is_empty(es.cluster_settings.as_ref())
        || !is_empty(es.snapshot_repositories.as_ref())
        || !is_empty(es.snapshot_lifecycle_policies.as_ref())
        || !is_empty(es.security_role_mappings.as_ref())
        || !is_empty(es.index_lifecycle_policies.as_ref())
        || !is_empty(es.ingest_pipelines.as_ref())
        || !is_empty(es.index_templates.component_templates.as_ref())
        || !is_empty(es.index_templates.composable_index_templates.as_ref())
        || !is_empty(es.config.as_ref())
        || es.secret_mounts.as_ref().is_some_and(|m| !m.is_empty())
        || es.secure_settings.as_ref().is_some_and(|s| !s.is_empty())
}

/// Checks a decoded policy. All violations are reported at once.
pub fn validate_policy(policy: &StackConfigPolicy) -> Result<(), ValidationErrors> {
    let mut errors = Vec::new();

    let name = policy.metadata.name.as_deref().unwrap_or_default();
    if name.len() > POLICY_NAME_MAX_LENGTH {
        errors.push(ValidationError::NameTooLong {
            name: name.to_string(),
            length: name.len(),
            max: POLICY_NAME_MAX_LENGTH,
        });
    }

    if !has_elasticsearch_config(&policy.spec.elasticsearch) && is_empty(policy.spec.kibana.config.as_ref()) {
        errors.push(ValidationError::NoConfiguration);
    }

    let mut paths = HashSet::new();
    for mount in policy.spec.elasticsearch.secret_mounts.iter().flatten() {
        if !paths.insert(mount.mount_path.as_str()) {
            errors.push(ValidationError::DuplicateMountPath {
                mount_path: mount.mount_path.clone(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors(errors))
    }
}

/// Fields of the typed parts of the spec. Free-form slots are not descended into.
enum Shape {
    Object(&'static [(&'static str, Shape)]),
    List(&'static Shape),
    Leaf,
}

const KEY_TO_PATH: Shape = Shape::Object(&[("key", Shape::Leaf), ("path", Shape::Leaf)]);

const SECRET_SOURCE: Shape = Shape::Object(&[("secretName", Shape::Leaf), ("entries", Shape::List(&KEY_TO_PATH))]);

const SECRET_MOUNT: Shape = Shape::Object(&[("secretName", Shape::Leaf), ("mountPath", Shape::Leaf)]);

const SPEC: Shape = Shape::Object(&[
    ("resourceSelector", Shape::Leaf),
    ("weight", Shape::Leaf),
    ("secureSettings", Shape::List(&SECRET_SOURCE)),
    (
        "elasticsearch",
        Shape::Object(&[
            ("clusterSettings", Shape::Leaf),
            ("snapshotRepositories", Shape::Leaf),
            ("snapshotLifecyclePolicies", Shape::Leaf),
            ("securityRoleMappings", Shape::Leaf),
            ("indexLifecyclePolicies", Shape::Leaf),
            ("ingestPipelines", Shape::Leaf),
            (
                "indexTemplates",
                Shape::Object(&[("componentTemplates", Shape::Leaf), ("composableIndexTemplates", Shape::Leaf)]),
            ),
            ("config", Shape::Leaf),
            ("secretMounts", Shape::List(&SECRET_MOUNT)),
            ("secureSettings", Shape::List(&SECRET_SOURCE)),
        ]),
    ),
    (
        "kibana",
        Shape::Object(&[("config", Shape::Leaf), ("secureSettings", Shape::List(&SECRET_SOURCE))]),
    ),
]);

/// Strict decode of a raw `spec` document: rejects fields the policy does not define.
pub fn validate_raw_spec(spec: &Value) -> Result<(), ValidationErrors> {
    let mut errors = Vec::new();
    check_shape(spec, &SPEC, "spec", &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors(errors))
    }
}

fn check_shape(value: &Value, shape: &Shape, path: &str, errors: &mut Vec<ValidationError>) {
    match (shape, value) {
        (_, Value::Null) | (Shape::Leaf, _) => {}
        (Shape::Object(fields), Value::Object(map)) => {
            for (key, child) in map {
                match fields.iter().find(|field| field.0 == key.as_str()) {
                    Some((_, child_shape)) => check_shape(child, child_shape, &format!("{path}.{key}"), errors),
                    None => errors.push(ValidationError::UnknownField {
                        path: path.to_string(),
                        field: key.clone(),
                    }),
                }
            }
        }
        (Shape::List(item), Value::Array(items)) => {
            for (i, child) in items.iter().enumerate() {
                check_shape(child, item, &format!("{path}[{i}]"), errors);
            }
        }
        (Shape::Object(_), _) => errors.push(ValidationError::UnexpectedType {
            path: path.to_string(),
            expected: "an object",
        }),
        (Shape::List(_), _) => errors.push(ValidationError::UnexpectedType {
            path: path.to_string(),
            expected: "a list",
        }),
    }
}
