//! CLI commands.

mod apply;
mod plan;
mod state;
mod validate;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use objsync_admin::{AdminApi, HttpAdminClient, MemoryAdmin};
use objsync_reconcile::CancelSignal;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::CliError;
use crate::manifest::{manifest_hash, Manifest};
use crate::output::OutputFormat;
use crate::resources::HandlerContext;

/// Default manifest path.
const DEFAULT_MANIFEST: &str = "objsync.toml";

/// objsync - converge an object-storage cluster on a declarative manifest.
#[derive(Debug, Parser)]
#[command(name = "objsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (table or json).
    #[arg(long, global = true, default_value = "table")]
    format: String,

    /// Cluster admin endpoint.
    #[arg(long, global = true, env = "OBJSYNC_ENDPOINT")]
    endpoint: Option<String>,

    /// Admin access key.
    #[arg(long, global = true, env = "OBJSYNC_ACCESS_KEY")]
    access_key: Option<String>,

    /// Observed state file.
    #[arg(long, global = true, env = "OBJSYNC_STATE_FILE", value_name = "PATH")]
    state_file: Option<PathBuf>,

    /// Log filter (trace, debug, info, warn, error, or a tracing directive).
    #[arg(long, global = true, env = "OBJSYNC_LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Run against an empty in-memory cluster instead of the endpoint.
    #[arg(long, global = true)]
    memory: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Check a manifest without contacting the cluster.
    Validate(validate::ValidateCommand),

    /// Show the changes an apply would make.
    Plan(plan::PlanCommand),

    /// Converge the cluster on a manifest.
    Apply(apply::ApplyCommand),

    /// Show the observed state recorded by the last apply.
    State(state::StateCommand),

    /// Show CLI version.
    Version,
}

impl Cli {
    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        let mut config = Config::from_env()?;
        if let Some(endpoint) = self.endpoint {
            config.endpoint = endpoint;
        }
        if let Some(access_key) = self.access_key {
            config.access_key = access_key;
        }
        if let Some(state_file) = self.state_file {
            config.state_file = state_file;
        }

        let ctx = CommandContext {
            config,
            format: OutputFormat::parse(&self.format),
            memory: self.memory,
        };

        match self.command {
            Commands::Validate(cmd) => cmd.run(ctx).await,
            Commands::Plan(cmd) => cmd.run(ctx).await,
            Commands::Apply(cmd) => cmd.run(ctx).await,
            Commands::State(cmd) => cmd.run(ctx).await,
            Commands::Version => {
                println!("objsync {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    pub config: Config,
    pub format: OutputFormat,
    pub memory: bool,
}

impl CommandContext {
    /// Build the admin client.
    pub fn admin(&self) -> Result<Arc<dyn AdminApi>> {
        if self.memory {
            warn!("Using an in-memory cluster; nothing is sent to the endpoint");
            return Ok(Arc::new(MemoryAdmin::new()));
        }
        if self.config.access_key.is_empty() || self.config.secret_key.is_empty() {
            return Err(CliError::MissingCredentials.into());
        }
        let client = HttpAdminClient::new(&self.config.admin())
            .with_context(|| format!("Failed to create admin client for {}", self.config.endpoint))?;
        debug!(endpoint = %self.config.endpoint, "Admin client ready");
        Ok(Arc::new(client))
    }

    /// Build the handler context for one run.
    pub fn handlers(&self, cancel: CancelSignal) -> Result<HandlerContext> {
        Ok(HandlerContext::new(
            self.admin()?,
            self.config.wait_policy.clone(),
            cancel,
        ))
    }
}

/// A manifest read from disk, with the hash of its contents.
pub struct LoadedManifest {
    pub path: PathBuf,
    pub manifest: Manifest,
    pub hash: String,
}

/// Read and validate a manifest. Defaults to ./objsync.toml.
pub fn load_manifest(path: Option<PathBuf>) -> Result<LoadedManifest> {
    let path = path.unwrap_or_else(|| PathBuf::from(DEFAULT_MANIFEST));
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;
    let manifest = Manifest::from_toml_str(&contents)
        .with_context(|| format!("Invalid manifest {}", path.display()))?;
    let hash = manifest_hash(&contents)?;
    Ok(LoadedManifest {
        path,
        manifest,
        hash,
    })
}
