//! StackConfigPolicy Controller Library
//!
//! Propagates `StackConfigPolicy` resources onto the Elasticsearch clusters and
//! Kibana instances they select, by writing the derived secrets the workload
//! controllers consume. Tests are included in the module files.
//!
//! ## Quick Start
//!
//! ```rust
//! use stack_config_policy_controller::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod client;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod filesettings;
pub mod labels;
pub mod observability;
pub mod ownership;
pub mod policy;
pub mod prelude;
pub mod runtime;
pub mod settings;
