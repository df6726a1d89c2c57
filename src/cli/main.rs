//! # SCPCTL CLI
//!
//! Command-line companion of the StackConfigPolicy controller.
//!
//! ## Usage
//!
//! ```bash
//! # Check a policy manifest before applying it
//! scpctl validate -f policy.yaml
//!
//! # Print the CustomResourceDefinition
//! scpctl crd
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kube::core::CustomResourceExt;
use serde_json::Value;
use stack_config_policy_controller::crd::StackConfigPolicy;
use stack_config_policy_controller::policy::{validate_policy, validate_raw_spec};
use std::path::{Path, PathBuf};

/// StackConfigPolicy controller CLI
#[derive(Parser)]
#[command(name = "scpctl")]
#[command(
    about = "StackConfigPolicy controller CLI",
    long_about = None,
    after_help = "\
Examples:
  scpctl validate -f policy.yaml
  scpctl crd | kubectl apply -f -
"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a StackConfigPolicy manifest the way the controller does
    Validate {
        /// Path to the manifest (YAML or JSON)
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Print the StackConfigPolicy CustomResourceDefinition
    Crd,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { file } => validate_command(&file),
        Commands::Crd => crd_command(),
    }
}

fn validate_command(file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let errors = validate_manifest(&content)?;

    if errors.is_empty() {
        println!("✅ {} is a valid StackConfigPolicy", file.display());
        return Ok(());
    }

    eprintln!("❌ {} is not a valid StackConfigPolicy:", file.display());
    for error in &errors {
        eprintln!("   - {error}");
    }
    anyhow::bail!("{} validation error(s)", errors.len())
}

/// Strict decode of the raw spec first, then the checks the controller runs.
/// Unknown fields stop validation since the typed decode would silently drop them.
fn validate_manifest(content: &str) -> Result<Vec<String>> {
    let raw: Value = serde_yaml::from_str(content).context("Failed to parse manifest")?;

    let kind = raw.get("kind").and_then(Value::as_str).unwrap_or_default();
    if kind != "StackConfigPolicy" {
        anyhow::bail!("Expected kind StackConfigPolicy, got {kind:?}");
    }

    if let Some(spec) = raw.get("spec") {
        if let Err(errors) = validate_raw_spec(spec) {
            return Ok(errors.0.iter().map(ToString::to_string).collect());
        }
    }

    let policy: StackConfigPolicy =
        serde_json::from_value(raw).context("Failed to decode StackConfigPolicy")?;
    Ok(match validate_policy(&policy) {
        Ok(()) => Vec::new(),
        Err(errors) => errors.0.iter().map(ToString::to_string).collect(),
    })
}

fn crd_command() -> Result<()> {
    let yaml = serde_yaml::to_string(&StackConfigPolicy::crd()).context("Failed to serialize CRD to YAML")?;
    print!("{yaml}");
    Ok(())
}
