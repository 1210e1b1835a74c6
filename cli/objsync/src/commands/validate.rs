//! Validate command.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use crate::output::{print_success, OutputFormat};

use super::{load_manifest, CommandContext};

/// Check a manifest without contacting the cluster.
#[derive(Debug, Args)]
pub struct ValidateCommand {
    /// Manifest file path (TOML). Defaults to ./objsync.toml.
    #[arg(long, value_name = "PATH")]
    pub manifest: Option<PathBuf>,
}

impl ValidateCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let loaded = load_manifest(self.manifest)?;
        let m = &loaded.manifest;

        match ctx.format {
            OutputFormat::Table => print_success(&format!(
                "{} is valid: {} users, {} groups, {} buckets, {} tiers, {} identity providers",
                loaded.path.display(),
                m.users.len(),
                m.groups.len(),
                m.buckets.len(),
                m.tiers.len(),
                m.identity_providers.len()
            )),
            OutputFormat::Json => println!(
                "{}",
                serde_json::json!({
                    "valid": true,
                    "manifest_path": loaded.path.display().to_string(),
                    "manifest_hash": loaded.hash,
                    "users": m.users.len(),
                    "groups": m.groups.len(),
                    "buckets": m.buckets.len(),
                    "tiers": m.tiers.len(),
                    "identity_providers": m.identity_providers.len(),
                })
            ),
        }
        Ok(())
    }
}
