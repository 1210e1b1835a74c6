//! Error handling and display for the CLI.

use colored::Colorize;
use objsync_admin::AdminError;
use thiserror::Error;

use crate::manifest::ManifestError;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("No admin credentials. Set OBJSYNC_ACCESS_KEY and OBJSYNC_SECRET_KEY.")]
    MissingCredentials,

    #[error("{failed} resource(s) failed to apply")]
    ApplyFailed { failed: usize },

    #[error("Apply cancelled")]
    Cancelled,
}

fn hint(message: &str) {
    eprintln!("\n{}", format!("Hint: {message}").yellow());
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {:#}", "Error:".red().bold(), err);

    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        match cli_err {
            CliError::MissingCredentials => {
                hint("Pass --access-key, or export the credentials of an admin user.")
            }
            CliError::ApplyFailed { .. } => {
                hint("Fix the errors above and run `objsync apply` again; converged resources are skipped.")
            }
            CliError::Cancelled => hint("Resources applied before cancellation were saved to state."),
        }
        return;
    }

    if let Some(manifest_err) = err.chain().find_map(|e| e.downcast_ref::<ManifestError>()) {
        match manifest_err {
            ManifestError::MissingSecret { .. } => {
                hint("Export the referenced variable or inline the secret.")
            }
            ManifestError::MembershipConflict { .. } => hint(
                "A group with a `members` list must agree with the `groups` list of each declared user.",
            ),
            _ => hint("Run `objsync validate` to check the manifest."),
        }
        return;
    }

    match err.chain().find_map(|e| e.downcast_ref::<AdminError>()) {
        Some(AdminError::Api { status: 401 | 403, .. }) => {
            hint("Check that the access key belongs to an admin user.")
        }
        Some(AdminError::Transport(_)) => hint("Check the endpoint and your network connection."),
        _ => {}
    }
}
