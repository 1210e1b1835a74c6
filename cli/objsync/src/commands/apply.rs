//! Apply command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use objsync_reconcile::CancelSignal;
use tracing::warn;

use crate::apply::Applier;
use crate::error::CliError;
use crate::output::{print_info, print_report, print_success, OutputFormat};
use crate::resources::Action;
use crate::state::ObservedState;

use super::{load_manifest, CommandContext};

/// Converge the cluster on a manifest.
#[derive(Debug, Args)]
pub struct ApplyCommand {
    /// Manifest file path (TOML). Defaults to ./objsync.toml.
    #[arg(long, value_name = "PATH")]
    pub manifest: Option<PathBuf>,

    /// Keep entities dropped from the manifest instead of deleting them.
    #[arg(long)]
    pub no_prune: bool,
}

impl ApplyCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let loaded = load_manifest(self.manifest)?;
        let state_file = ctx.config.state_file.clone();
        let mut state = ObservedState::load(&state_file)?;

        let (cancel_handle, cancel) = CancelSignal::new();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Received interrupt, cancelling apply");
                cancel_handle.cancel();
            }
        });

        let applier = Applier::new(ctx.handlers(cancel)?).with_prune(!self.no_prune);
        let report = applier.apply(&loaded.manifest, &mut state).await;

        if ctx.memory {
            print_info("In-memory run; observed state was not saved.");
        } else {
            state.manifest_hash = Some(loaded.hash);
            state
                .save(&state_file)
                .with_context(|| format!("Failed to save state to {}", state_file.display()))?;
        }

        print_report(&report, ctx.format);

        if report.cancelled {
            return Err(CliError::Cancelled.into());
        }
        let failed = report.failures().count();
        if failed > 0 {
            return Err(CliError::ApplyFailed { failed }.into());
        }

        if ctx.format == OutputFormat::Table {
            print_success(&format!(
                "Applied {}: {} created, {} updated, {} deleted, {} unchanged",
                loaded.path.display(),
                report.count(Action::Created),
                report.count(Action::Updated),
                report.count(Action::Deleted),
                report.count(Action::Unchanged)
            ));
        }
        Ok(())
    }
}
