//! Desired-state manifest.
//!
//! A manifest is a TOML file declaring every managed entity once:
//!
//! ```toml
//! [[users]]
//! access_key = "alice"
//! secret_key = "env:ALICE_SECRET"
//! groups = ["dev", "ops"]
//!
//! [[buckets]]
//! name = "logs"
//! [[buckets.lifecycle]]
//! id = "expire"
//! expiration_days = 30
//! ```
//!
//! Secret values of the form `env:NAME` are read from the environment when
//! the manifest is applied, so manifests can be committed.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use objsync_admin::{
    AccountStatus, BucketSpec, IdpConfig, LifecycleConfig, LifecycleRule, TierConfig,
    TierCredentials, TierInfo, TierType,
};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Manifest loading and validation errors.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("invalid manifest TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{kind} {name} is declared more than once")]
    Duplicate { kind: &'static str, name: String },

    #[error("user {user} lists group {group} more than once")]
    DuplicateGroup { user: String, group: String },

    #[error("user {user} lists group {group}, but group {group} declares members without {user}")]
    MembershipConflict { user: String, group: String },

    #[error("{0}")]
    Invalid(String),

    #[error("secret {reference} is not set in the environment")]
    MissingSecret { reference: String },
}

/// A secret, either inline or an `env:NAME` reference.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct SecretValue(String);

impl SecretValue {
    /// Resolve an `env:` reference or return the inline value.
    pub fn resolve(&self) -> Result<String, ManifestError> {
        resolve_secret(&self.0)
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for SecretValue {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.strip_prefix("env:") {
            Some(name) => write!(f, "SecretValue(env:{name})"),
            None => write!(f, "SecretValue(<redacted>)"),
        }
    }
}

fn resolve_secret(raw: &str) -> Result<String, ManifestError> {
    match raw.strip_prefix("env:") {
        Some(name) => std::env::var(name).map_err(|_| ManifestError::MissingSecret {
            reference: raw.to_string(),
        }),
        None => Ok(raw.to_string()),
    }
}

/// A declared user.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserDecl {
    pub access_key: String,
    pub secret_key: SecretValue,
    #[serde(default)]
    pub status: AccountStatus,
    /// Groups the user must belong to, exactly.
    #[serde(default)]
    pub groups: Vec<String>,
}

impl UserDecl {
    pub fn group_set(&self) -> BTreeSet<String> {
        self.groups.iter().cloned().collect()
    }
}

/// A declared group.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupDecl {
    pub name: String,
    #[serde(default)]
    pub status: AccountStatus,
    /// Exact member list. When absent, membership is left to the users that
    /// list this group.
    #[serde(default)]
    pub members: Option<Vec<String>>,
}

impl GroupDecl {
    pub fn member_set(&self) -> Option<BTreeSet<String>> {
        self.members.as_ref().map(|m| m.iter().cloned().collect())
    }
}

/// A declared bucket.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BucketDecl {
    pub name: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub object_locking: bool,
    #[serde(default)]
    pub lifecycle: Vec<LifecycleRule>,
}

impl BucketDecl {
    pub fn spec(&self) -> BucketSpec {
        BucketSpec {
            name: self.name.clone(),
            region: self.region.clone(),
            object_locking: self.object_locking,
        }
    }

    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            rules: self.lifecycle.clone(),
        }
    }
}

/// A declared remote tier.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub tier_type: TierType,
    pub endpoint: String,
    pub bucket: String,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    pub access_key: String,
    pub secret_key: SecretValue,
}

impl TierDecl {
    pub fn info(&self) -> TierInfo {
        TierInfo {
            name: self.name.clone(),
            tier_type: self.tier_type,
            endpoint: self.endpoint.clone(),
            bucket: self.bucket.clone(),
            prefix: self.prefix.clone(),
            region: self.region.clone(),
        }
    }

    /// Build the admin request with resolved credentials.
    pub fn to_config(&self) -> Result<TierConfig, ManifestError> {
        Ok(TierConfig {
            info: self.info(),
            credentials: TierCredentials {
                access_key: self.access_key.clone(),
                secret_key: self.secret_key.resolve()?,
            },
        })
    }
}

/// Copy of an identity provider config with `env:` secrets resolved.
pub fn resolve_idp_secrets(config: &IdpConfig) -> Result<IdpConfig, ManifestError> {
    let mut resolved = config.clone();
    match &mut resolved {
        IdpConfig::OpenId(c) => {
            if let Some(secret) = &c.client_secret {
                c.client_secret = Some(resolve_secret(secret)?);
            }
        }
        IdpConfig::Ldap(c) => {
            if let Some(password) = &c.lookup_bind_password {
                c.lookup_bind_password = Some(resolve_secret(password)?);
            }
        }
    }
    Ok(resolved)
}

/// The full desired state.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub users: Vec<UserDecl>,
    #[serde(default)]
    pub groups: Vec<GroupDecl>,
    #[serde(default)]
    pub buckets: Vec<BucketDecl>,
    #[serde(default)]
    pub tiers: Vec<TierDecl>,
    #[serde(default)]
    pub identity_providers: Vec<IdpConfig>,
}

fn check_unique<'a>(
    kind: &'static str,
    names: impl IntoIterator<Item = &'a str>,
) -> Result<(), ManifestError> {
    let mut seen = BTreeSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ManifestError::Duplicate {
                kind,
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

/// S3 bucket naming rules.
fn validate_bucket_name(name: &str) -> Result<(), ManifestError> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
    let valid_edges = name
        .chars()
        .next()
        .zip(name.chars().last())
        .is_some_and(|(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric());

    if !(3..=63).contains(&name.len()) || !valid_chars || !valid_edges || name.contains("..") {
        return Err(ManifestError::Invalid(format!("invalid bucket name: {name:?}")));
    }
    Ok(())
}

impl Manifest {
    /// Parse and validate a manifest.
    pub fn from_toml_str(contents: &str) -> Result<Self, ManifestError> {
        let manifest: Manifest = toml::from_str(contents)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check uniqueness and cross-resource consistency.
    pub fn validate(&self) -> Result<(), ManifestError> {
        check_unique("user", self.users.iter().map(|u| u.access_key.as_str()))?;
        check_unique("group", self.groups.iter().map(|g| g.name.as_str()))?;
        check_unique("bucket", self.buckets.iter().map(|b| b.name.as_str()))?;
        check_unique("tier", self.tiers.iter().map(|t| t.name.as_str()))?;
        let idp_keys: Vec<String> = self
            .identity_providers
            .iter()
            .map(|c| format!("{}/{}", c.kind(), c.name()))
            .collect();
        check_unique("identity provider", idp_keys.iter().map(String::as_str))?;

        let declared_members: BTreeMap<&str, BTreeSet<String>> = self
            .groups
            .iter()
            .filter_map(|g| g.member_set().map(|m| (g.name.as_str(), m)))
            .collect();

        for user in &self.users {
            if user.access_key.trim().is_empty() {
                return Err(ManifestError::Invalid("user access_key cannot be empty".into()));
            }
            if user.secret_key.is_empty() {
                return Err(ManifestError::Invalid(format!(
                    "user {}: secret_key cannot be empty",
                    user.access_key
                )));
            }

            let mut seen = BTreeSet::new();
            for group in &user.groups {
                if !seen.insert(group.as_str()) {
                    return Err(ManifestError::DuplicateGroup {
                        user: user.access_key.clone(),
                        group: group.clone(),
                    });
                }
                if let Some(members) = declared_members.get(group.as_str()) {
                    if !members.contains(&user.access_key) {
                        return Err(ManifestError::MembershipConflict {
                            user: user.access_key.clone(),
                            group: group.clone(),
                        });
                    }
                }
            }
        }

        for group in &self.groups {
            if group.name.trim().is_empty() {
                return Err(ManifestError::Invalid("group name cannot be empty".into()));
            }
            if let Some(members) = &group.members {
                let mut seen = BTreeSet::new();
                if let Some(dup) = members.iter().find(|m| !seen.insert(m.as_str())) {
                    return Err(ManifestError::Invalid(format!(
                        "group {} lists member {dup} more than once",
                        group.name
                    )));
                }
                // A declared user in the member list must list the group too.
                for member in members {
                    let lists_group = self
                        .users
                        .iter()
                        .find(|u| &u.access_key == member)
                        .map(|u| u.groups.contains(&group.name));
                    if lists_group == Some(false) {
                        return Err(ManifestError::MembershipConflict {
                            user: member.clone(),
                            group: group.name.clone(),
                        });
                    }
                }
            }
        }

        for bucket in &self.buckets {
            validate_bucket_name(&bucket.name)?;
            bucket
                .lifecycle_config()
                .validate()
                .map_err(|e| ManifestError::Invalid(format!("bucket {}: {e}", bucket.name)))?;
        }

        for tier in &self.tiers {
            if tier.secret_key.is_empty() {
                return Err(ManifestError::Invalid(format!(
                    "tier {}: secret_key cannot be empty",
                    tier.name
                )));
            }
            TierConfig {
                info: tier.info(),
                credentials: TierCredentials {
                    access_key: tier.access_key.clone(),
                    secret_key: tier.secret_key.0.clone(),
                },
            }
            .validate()
            .map_err(|e| ManifestError::Invalid(e.to_string()))?;
        }

        for idp in &self.identity_providers {
            idp.validate()
                .map_err(|e| ManifestError::Invalid(e.to_string()))?;
        }

        Ok(())
    }
}

/// Content hash of a manifest, independent of TOML formatting.
pub fn manifest_hash(contents: &str) -> Result<String, ManifestError> {
    let value: toml::Value = toml::from_str(contents)?;
    let canonical = serde_json::to_vec(&value)
        .map_err(|e| ManifestError::Invalid(format!("failed to canonicalize manifest: {e}")))?;

    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}
