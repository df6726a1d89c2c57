//! # Runtime
//!
//! Process-level wiring of the controller.
//!
//! - `initialization`: crypto provider, logging, metrics, HTTP server and Kubernetes client
//! - `watch_loop`: kube-runtime controller with its secondary watches
//! - `error_policy`: per-policy backoff and watch stream error handling

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
