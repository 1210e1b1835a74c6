//! The admin API contract.

use async_trait::async_trait;

use crate::error::Result;
use crate::idp::{IdpConfig, IdpConfigInfo, IdpKind};
use crate::types::{
    AccountStatus, BucketSpec, GroupInfo, GroupMembersUpdate, LifecycleConfig, TierConfig,
    TierCredentials, TierInfo, UserInfo,
};

/// Administrative operations on an object-storage cluster.
///
/// Reads of missing resources return [`AdminError::NotFound`](crate::AdminError::NotFound).
/// The cluster is eventually consistent: a resource created by one call may
/// not be visible to the next read.
#[async_trait]
pub trait AdminApi: Send + Sync {
    // Users

    async fn get_user(&self, access_key: &str) -> Result<UserInfo>;

    async fn add_user(&self, access_key: &str, secret_key: &str) -> Result<()>;

    async fn set_user_status(&self, access_key: &str, status: AccountStatus) -> Result<()>;

    async fn remove_user(&self, access_key: &str) -> Result<()>;

    // Groups

    async fn get_group(&self, name: &str) -> Result<GroupInfo>;

    async fn update_group_members(&self, update: &GroupMembersUpdate) -> Result<()>;

    async fn set_group_status(&self, name: &str, status: AccountStatus) -> Result<()>;

    async fn remove_group(&self, name: &str) -> Result<()>;

    // Buckets

    async fn bucket_exists(&self, name: &str) -> Result<bool>;

    async fn make_bucket(&self, spec: &BucketSpec) -> Result<()>;

    async fn remove_bucket(&self, name: &str) -> Result<()>;

    /// Returns `None` when the bucket has no lifecycle configuration.
    async fn get_bucket_lifecycle(&self, bucket: &str) -> Result<Option<LifecycleConfig>>;

    /// An empty rule list removes the lifecycle configuration.
    async fn set_bucket_lifecycle(&self, bucket: &str, config: &LifecycleConfig) -> Result<()>;

    // Tiers

    async fn list_tiers(&self) -> Result<Vec<TierInfo>>;

    async fn add_tier(&self, tier: &TierConfig) -> Result<()>;

    async fn edit_tier_credentials(&self, name: &str, credentials: &TierCredentials)
        -> Result<()>;

    async fn remove_tier(&self, name: &str) -> Result<()>;

    // Identity providers

    async fn get_idp_config(&self, kind: IdpKind, name: &str) -> Result<IdpConfigInfo>;

    /// Returns true if the cluster needs a restart for the change to apply.
    async fn set_idp_config(&self, config: &IdpConfig) -> Result<bool>;

    async fn delete_idp_config(&self, kind: IdpKind, name: &str) -> Result<()>;
}
