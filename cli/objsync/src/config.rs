//! Configuration for objsync.
//!
//! Values come from `OBJSYNC_*` environment variables; command-line flags
//! override them. `OBJSYNC_LOG_LEVEL` is read by the CLI itself, before
//! logging is set up.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use objsync_admin::AdminConfig;
use objsync_reconcile::RetryPolicy;

/// Observed state file name.
const STATE_FILE: &str = "state.json";

/// objsync configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Cluster admin endpoint.
    pub endpoint: String,

    /// Admin access key.
    pub access_key: String,

    /// Admin secret key.
    pub secret_key: String,

    /// Per-request timeout.
    pub request_timeout: Duration,

    /// Where observed state is persisted between runs.
    pub state_file: PathBuf,

    /// Visibility polling after mutating calls.
    pub wait_policy: RetryPolicy,
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid {name}={raw}: {e}")),
        Err(_) => Ok(None),
    }
}

/// Default location of the observed state file.
pub fn default_state_file() -> PathBuf {
    ProjectDirs::from("io", "objsync", "objsync")
        .map(|dirs| dirs.data_dir().join(STATE_FILE))
        .unwrap_or_else(|| PathBuf::from(STATE_FILE))
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let endpoint = std::env::var("OBJSYNC_ENDPOINT")
            .unwrap_or_else(|_| "http://127.0.0.1:9000".to_string());

        let access_key = std::env::var("OBJSYNC_ACCESS_KEY").unwrap_or_default();
        let secret_key = std::env::var("OBJSYNC_SECRET_KEY").unwrap_or_default();

        let request_timeout =
            Duration::from_secs(env_parse("OBJSYNC_REQUEST_TIMEOUT_SECS")?.unwrap_or(30));

        let state_file = std::env::var("OBJSYNC_STATE_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_state_file());

        let defaults = RetryPolicy::default();
        let wait_policy = RetryPolicy::new(
            env_parse("OBJSYNC_WAIT_MAX_RETRIES")?.unwrap_or(defaults.max_retries()),
            env_parse("OBJSYNC_WAIT_BACKOFF_BASE")?.unwrap_or(defaults.backoff_base()),
            env_parse("OBJSYNC_WAIT_BASE_UNIT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_unit()),
            env_parse("OBJSYNC_WAIT_MAX_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_backoff()),
        )
        .context("invalid visibility wait settings")?;

        Ok(Self {
            endpoint,
            access_key,
            secret_key,
            request_timeout,
            state_file,
            wait_policy,
        })
    }

    /// Admin client settings.
    pub fn admin(&self) -> AdminConfig {
        AdminConfig {
            endpoint: self.endpoint.clone(),
            access_key: self.access_key.clone(),
            secret_key: self.secret_key.clone(),
            timeout: self.request_timeout,
        }
    }
}
