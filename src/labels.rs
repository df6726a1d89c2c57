//! # Label Selectors
//!
//! Evaluation of Kubernetes label selectors against label sets, and rendering
//! of equality label maps into the query string accepted by the API server.
//!
//! A selector with neither match labels nor match expressions selects
//! everything.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::core::{ParseExpressionError, Selector, SelectorExt};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SelectorError {
    #[error("label selector with binary operator {operator:?} must have values")]
    BinaryOperatorWithoutValues { operator: String },

    #[error("label selector with unary operator {operator:?} must not have values")]
    UnaryOperatorWithValues { operator: String },

    #[error("invalid labelSelector: {0}")]
    Parse(#[from] ParseExpressionError),
}

/// Converts a [`LabelSelector`] into a [`Selector`].
///
/// The API server rejects `In`/`NotIn` without values and `Exists`/`DoesNotExist`
/// with values; the conversion in `kube` does not, so those are checked here.
pub fn selector(label_selector: &LabelSelector) -> Result<Selector, SelectorError> {
    for requirement in label_selector.match_expressions.iter().flatten() {
        let has_values = requirement.values.as_ref().is_some_and(|v| !v.is_empty());
        match requirement.operator.as_str() {
            operator @ ("In" | "NotIn") if !has_values => {
                return Err(SelectorError::BinaryOperatorWithoutValues {
                    operator: operator.to_owned(),
                });
            }
            operator @ ("Exists" | "DoesNotExist") if has_values => {
                return Err(SelectorError::UnaryOperatorWithValues {
                    operator: operator.to_owned(),
                });
            }
            _ => {}
        }
    }
    Ok(Selector::try_from(label_selector.clone())?)
}

/// Returns whether the selector selects the given labels.
pub fn matches(
    label_selector: &LabelSelector,
    labels: Option<&BTreeMap<String, String>>,
) -> Result<bool, SelectorError> {
    let selector = selector(label_selector)?;
    Ok(match labels {
        Some(labels) => selector.matches(labels),
        None => selector.matches(&BTreeMap::new()),
    })
}

/// Render a plain equality map as an API server label query.
pub fn equality_query(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}
