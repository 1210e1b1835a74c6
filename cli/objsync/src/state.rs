//! Observed state persisted between runs.
//!
//! After every apply the observed fields of each managed entity are written
//! to a JSON file. The next run uses them to detect secret rotation (only
//! hashes are stored) and to delete entities dropped from the manifest.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use objsync_admin::{AccountStatus, IdpKind, TierInfo};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Current state file format version.
pub const STATE_VERSION: u32 = 1;

/// Hash a secret for change detection.
pub fn secret_hash(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedUser {
    pub access_key: String,
    pub status: AccountStatus,
    pub groups: BTreeSet<String>,
    pub secret_hash: String,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedGroup {
    pub name: String,
    pub status: AccountStatus,
    pub members: BTreeSet<String>,
    /// Whether the member list is managed by this group's declaration.
    pub manages_members: bool,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedBucket {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub object_locking: bool,
    pub lifecycle_rules: Vec<String>,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedTier {
    #[serde(flatten)]
    pub info: TierInfo,
    pub credentials_hash: String,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedIdp {
    pub kind: IdpKind,
    pub name: String,
    pub entries: BTreeMap<String, String>,
    pub secret_hash: Option<String>,
    pub applied_at: DateTime<Utc>,
}

impl ObservedIdp {
    /// Key used in [`ObservedState::identity_providers`].
    pub fn key(kind: IdpKind, name: &str) -> String {
        format!("{kind}/{name}")
    }
}

/// Everything objsync manages, as last observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedState {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub users: BTreeMap<String, ObservedUser>,
    #[serde(default)]
    pub groups: BTreeMap<String, ObservedGroup>,
    #[serde(default)]
    pub buckets: BTreeMap<String, ObservedBucket>,
    #[serde(default)]
    pub tiers: BTreeMap<String, ObservedTier>,
    #[serde(default)]
    pub identity_providers: BTreeMap<String, ObservedIdp>,
}

impl Default for ObservedState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            manifest_hash: None,
            updated_at: None,
            users: BTreeMap::new(),
            groups: BTreeMap::new(),
            buckets: BTreeMap::new(),
            tiers: BTreeMap::new(),
            identity_providers: BTreeMap::new(),
        }
    }
}

impl ObservedState {
    /// Load state from disk, or return empty state if the file is missing.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read state from {:?}", path))?;

        let state: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse state from {:?}", path))?;

        if state.version != STATE_VERSION {
            anyhow::bail!(
                "Unsupported state version {} in {:?} (expected {})",
                state.version,
                path,
                STATE_VERSION
            );
        }

        Ok(state)
    }

    /// Save state to disk, replacing the previous file atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create state directory {:?}", dir))?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;

            let mut file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&tmp)
                .with_context(|| format!("Failed to write state to {:?}", tmp))?;
            file.write_all(contents.as_bytes())?;
            file.sync_all()?;
        }

        #[cfg(not(unix))]
        {
            fs::write(&tmp, contents)
                .with_context(|| format!("Failed to write state to {:?}", tmp))?;
        }

        fs::rename(&tmp, path)
            .with_context(|| format!("Failed to move state into place at {:?}", path))?;
        Ok(())
    }
}
