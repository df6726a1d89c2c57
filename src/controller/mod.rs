//! # Controller
//!
//! Core controller modules for the StackConfigPolicy controller.
//!
//! - `backoff`: Fibonacci backoff mechanism for retries
//! - `reconciler`: Core reconciliation logic
//! - `server`: HTTP server for metrics and health checks
//! - `watches`: Secrets referenced by policies, for requeueing on change

pub mod backoff;
pub mod reconciler;
pub mod server;
pub mod watches;
