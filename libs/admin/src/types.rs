//! Resource shapes exchanged with the cluster admin API.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AdminError;

/// Enabled/disabled status of a user or group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    #[default]
    Enabled,
    Disabled,
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountStatus::Enabled => write!(f, "enabled"),
            AccountStatus::Disabled => write!(f, "disabled"),
        }
    }
}

/// A user as reported by the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub access_key: String,
    pub status: AccountStatus,
    /// Groups the user belongs to.
    #[serde(default)]
    pub member_of: BTreeSet<String>,
}

/// A group as reported by the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub name: String,
    pub status: AccountStatus,
    #[serde(default)]
    pub members: BTreeSet<String>,
}

/// Add or remove users from a group.
///
/// Adding members to a missing group creates it. Removing with an empty
/// member list deletes the group if it has no members left.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMembersUpdate {
    pub group: String,
    pub members: Vec<String>,
    pub is_remove: bool,
}

impl GroupMembersUpdate {
    pub fn add(group: impl Into<String>, members: Vec<String>) -> Self {
        Self {
            group: group.into(),
            members,
            is_remove: false,
        }
    }

    pub fn remove(group: impl Into<String>, members: Vec<String>) -> Self {
        Self {
            group: group.into(),
            members,
            is_remove: true,
        }
    }
}

/// Parameters for creating a bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default)]
    pub object_locking: bool,
}

/// Transition of objects to a remote tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LifecycleTransition {
    pub days: u32,
    pub storage_class: String,
}

/// One bucket lifecycle rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LifecycleRule {
    pub id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noncurrent_expiration_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_incomplete_upload_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition: Option<LifecycleTransition>,
}

fn default_true() -> bool {
    true
}

impl LifecycleRule {
    /// Check the rule before it is sent to the cluster.
    pub fn validate(&self) -> Result<(), AdminError> {
        if self.id.trim().is_empty() {
            return Err(AdminError::Invalid("lifecycle rule id cannot be empty".into()));
        }
        if self.id.len() > 255 {
            return Err(AdminError::Invalid(format!(
                "lifecycle rule id {} is longer than 255 characters",
                self.id
            )));
        }

        let has_action = self.expiration_days.is_some()
            || self.noncurrent_expiration_days.is_some()
            || self.abort_incomplete_upload_days.is_some()
            || self.transition.is_some();
        if !has_action {
            return Err(AdminError::Invalid(format!(
                "lifecycle rule {} has no action",
                self.id
            )));
        }

        for (field, days) in [
            ("expiration_days", self.expiration_days),
            ("noncurrent_expiration_days", self.noncurrent_expiration_days),
            ("abort_incomplete_upload_days", self.abort_incomplete_upload_days),
            ("transition.days", self.transition.as_ref().map(|t| t.days)),
        ] {
            if days == Some(0) {
                return Err(AdminError::Invalid(format!(
                    "lifecycle rule {}: {field} must be at least 1",
                    self.id
                )));
            }
        }

        if let Some(transition) = &self.transition {
            if transition.storage_class.trim().is_empty() {
                return Err(AdminError::Invalid(format!(
                    "lifecycle rule {}: transition storage class cannot be empty",
                    self.id
                )));
            }
        }

        Ok(())
    }
}

/// The complete lifecycle configuration of a bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    pub rules: Vec<LifecycleRule>,
}

impl LifecycleConfig {
    /// Validate every rule and reject duplicate rule ids.
    pub fn validate(&self) -> Result<(), AdminError> {
        let mut seen = BTreeSet::new();
        for rule in &self.rules {
            rule.validate()?;
            if !seen.insert(rule.id.as_str()) {
                return Err(AdminError::Invalid(format!(
                    "duplicate lifecycle rule id: {}",
                    rule.id
                )));
            }
        }
        Ok(())
    }
}

/// Remote tier backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierType {
    S3,
    Minio,
    Azure,
    Gcs,
}

impl fmt::Display for TierType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TierType::S3 => write!(f, "s3"),
            TierType::Minio => write!(f, "minio"),
            TierType::Azure => write!(f, "azure"),
            TierType::Gcs => write!(f, "gcs"),
        }
    }
}

/// Credentials a tier uses to reach its backend.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCredentials {
    pub access_key: String,
    pub secret_key: String,
}

impl fmt::Debug for TierCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TierCredentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Non-secret tier fields as reported by the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierInfo {
    pub name: String,
    pub tier_type: TierType,
    pub endpoint: String,
    pub bucket: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// Parameters for adding a tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierConfig {
    #[serde(flatten)]
    pub info: TierInfo,
    pub credentials: TierCredentials,
}

impl TierConfig {
    /// Check the tier before it is sent to the cluster.
    pub fn validate(&self) -> Result<(), AdminError> {
        let name = &self.info.name;
        // Tier names are used as storage classes and must be uppercase.
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(AdminError::Invalid(format!(
                "tier name {name:?} must be non-empty uppercase alphanumerics"
            )));
        }
        if !(self.info.endpoint.starts_with("http://") || self.info.endpoint.starts_with("https://"))
        {
            return Err(AdminError::Invalid(format!(
                "tier {name}: endpoint must be an http(s) URL"
            )));
        }
        if self.info.bucket.is_empty() {
            return Err(AdminError::Invalid(format!("tier {name}: bucket cannot be empty")));
        }
        if self.credentials.access_key.is_empty() || self.credentials.secret_key.is_empty() {
            return Err(AdminError::Invalid(format!(
                "tier {name}: credentials cannot be empty"
            )));
        }
        Ok(())
    }
}
