//! State command.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{Table, Tabled};

use crate::output::OutputFormat;
use crate::state::ObservedState;

use super::CommandContext;

/// Show the observed state recorded by the last apply.
#[derive(Debug, Args)]
pub struct StateCommand {}

#[derive(Debug, Serialize, Tabled)]
struct StateRow {
    #[tabled(rename = "KIND")]
    kind: &'static str,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "APPLIED")]
    applied_at: String,
}

fn rows(state: &ObservedState) -> Vec<StateRow> {
    let row = |kind, name: &str, at: &chrono::DateTime<chrono::Utc>| StateRow {
        kind,
        name: name.to_string(),
        applied_at: at.to_rfc3339(),
    };

    let mut rows = Vec::new();
    rows.extend(state.tiers.values().map(|t| row("tier", &t.info.name, &t.applied_at)));
    rows.extend(
        state
            .identity_providers
            .iter()
            .map(|(key, i)| row("identity provider", key, &i.applied_at)),
    );
    rows.extend(state.users.values().map(|u| row("user", &u.access_key, &u.applied_at)));
    rows.extend(state.groups.values().map(|g| row("group", &g.name, &g.applied_at)));
    rows.extend(state.buckets.values().map(|b| row("bucket", &b.name, &b.applied_at)));
    rows
}

impl StateCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let state = ObservedState::load(&ctx.config.state_file)?;

        match ctx.format {
            OutputFormat::Table => {
                println!("{} {}", "State file:".bold(), ctx.config.state_file.display());
                if let Some(updated_at) = state.updated_at {
                    println!("{} {}", "Updated:".bold(), updated_at.to_rfc3339());
                }
                let rows = rows(&state);
                if rows.is_empty() {
                    println!("{}", "No managed resources.".dimmed());
                } else {
                    println!("{}", Table::new(rows));
                }
            }
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&state)?),
        }
        Ok(())
    }
}
