//! # StackConfigPolicy Controller
//!
//! A Kubernetes controller that pushes configuration from `StackConfigPolicy`
//! resources onto Elasticsearch clusters and Kibana instances.
//!
//! ## Overview
//!
//! 1. **Selecting targets** - Policies select Elasticsearch and Kibana resources by label
//! 2. **Merging policies** - Several policies may select the same target; they are merged by weight
//! 3. **Writing derived secrets** - File settings, node config, secret mounts and Kibana config
//! 4. **Tracking progress** - The reserved state reported by Elasticsearch drives the policy status
//!
//! ## Features
//!
//! - **Multi-namespace**: Policies in the operator namespace may select targets anywhere
//! - **Soft ownership**: Derived secrets record every policy contributing to them
//! - **Prometheus metrics**: Exposes metrics for monitoring and observability
//! - **Health probes**: HTTP endpoints for liveness and readiness checks

use anyhow::Result;
use stack_config_policy_controller::runtime::{initialization::initialize, watch_loop::run_watch_loop};

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;
    run_watch_loop(init.client, init.reconciler, init.server_state).await
}
