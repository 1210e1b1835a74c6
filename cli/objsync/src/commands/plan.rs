//! Plan command.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use objsync_reconcile::CancelSignal;

use crate::apply::Applier;
use crate::output::{print_info, print_plan, OutputFormat};
use crate::state::ObservedState;

use super::{load_manifest, CommandContext};

/// Show the changes an apply would make.
#[derive(Debug, Args)]
pub struct PlanCommand {
    /// Manifest file path (TOML). Defaults to ./objsync.toml.
    #[arg(long, value_name = "PATH")]
    pub manifest: Option<PathBuf>,

    /// Do not plan deletion of entities dropped from the manifest.
    #[arg(long)]
    pub no_prune: bool,
}

impl PlanCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let loaded = load_manifest(self.manifest)?;
        let state = ObservedState::load(&ctx.config.state_file)?;

        if ctx.format == OutputFormat::Table
            && state.manifest_hash.as_deref() == Some(loaded.hash.as_str())
        {
            print_info("Manifest unchanged since the last apply; checking the cluster for drift.");
        }

        let applier = Applier::new(ctx.handlers(CancelSignal::never())?).with_prune(!self.no_prune);
        let plan = applier.plan(&loaded.manifest, &state).await;
        print_plan(&plan, ctx.format);

        if !plan.errors.is_empty() {
            anyhow::bail!("{} resource(s) could not be planned", plan.errors.len());
        }
        Ok(())
    }
}
