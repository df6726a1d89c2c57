//! # Policy Matching and Merging
//!
//! - `matcher.rs` - which policies apply to a target
//! - `merger.rs` - folding the applicable policies into one spec per target kind
//! - `validation.rs` - checks run by the engine before touching any target

mod matcher;
mod merger;
mod validation;

pub use matcher::{in_scope, matching_policies, policy_matches};
pub use merger::{merge_policies, MergedPolicy, TargetSpec};
pub use validation::{validate_policy, validate_raw_spec, ValidationError, ValidationErrors};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("weight conflict: policies {first:?} and {second:?} have the same weight {weight}")]
    WeightConflict {
        first: String,
        second: String,
        weight: i32,
    },

    #[error("merge conflict: secret {field} {value:?} is defined in policy {policy:?}, {existing:?}")]
    SecretMountConflict {
        field: &'static str,
        value: String,
        policy: String,
        existing: String,
    },
}
