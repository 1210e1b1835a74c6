//! Admin API adapters for the reconciliation core.
//!
//! - [`UserGroups`] and [`GroupMembers`]: the two views of the user × group
//!   relationship, as [`RelationshipStore`]s
//! - [`Visibility`]: existence probes for freshly created resources

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use objsync_admin::{AdminApi, AdminError, GroupMembersUpdate};
use objsync_reconcile::{BoxError, CancelSignal, ExistenceProbe, RelationshipStore};

/// The groups a user belongs to. Subject: user, target: group.
pub struct UserGroups {
    admin: Arc<dyn AdminApi>,
}

impl UserGroups {
    pub fn new(admin: Arc<dyn AdminApi>) -> Self {
        Self { admin }
    }
}

#[async_trait]
impl RelationshipStore for UserGroups {
    async fn fetch_current(&self, user: &str) -> Result<BTreeSet<String>, BoxError> {
        Ok(self.admin.get_user(user).await?.member_of)
    }

    async fn add_member(&self, user: &str, group: &str) -> Result<(), BoxError> {
        let update = GroupMembersUpdate::add(group, vec![user.to_string()]);
        Ok(self.admin.update_group_members(&update).await?)
    }

    async fn remove_member(&self, user: &str, group: &str) -> Result<(), BoxError> {
        let update = GroupMembersUpdate::remove(group, vec![user.to_string()]);
        Ok(self.admin.update_group_members(&update).await?)
    }
}

/// The users in a group. Subject: group, target: user.
pub struct GroupMembers {
    admin: Arc<dyn AdminApi>,
}

impl GroupMembers {
    pub fn new(admin: Arc<dyn AdminApi>) -> Self {
        Self { admin }
    }
}

#[async_trait]
impl RelationshipStore for GroupMembers {
    async fn fetch_current(&self, group: &str) -> Result<BTreeSet<String>, BoxError> {
        Ok(self.admin.get_group(group).await?.members)
    }

    async fn add_member(&self, group: &str, user: &str) -> Result<(), BoxError> {
        let update = GroupMembersUpdate::add(group, vec![user.to_string()]);
        Ok(self.admin.update_group_members(&update).await?)
    }

    async fn remove_member(&self, group: &str, user: &str) -> Result<(), BoxError> {
        let update = GroupMembersUpdate::remove(group, vec![user.to_string()]);
        Ok(self.admin.update_group_members(&update).await?)
    }
}

/// What a [`Visibility`] probe looks for.
#[derive(Debug, Clone)]
pub enum ProbeTarget {
    User(String),
    Group(String),
    Bucket(String),
}

impl std::fmt::Display for ProbeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeTarget::User(name) => write!(f, "user {name}"),
            ProbeTarget::Group(name) => write!(f, "group {name}"),
            ProbeTarget::Bucket(name) => write!(f, "bucket {name}"),
        }
    }
}

/// Existence probe backed by admin API reads.
///
/// Not-found maps to "not yet visible"; every other error is a probe failure.
pub struct Visibility {
    admin: Arc<dyn AdminApi>,
    target: ProbeTarget,
}

impl Visibility {
    pub fn new(admin: Arc<dyn AdminApi>, target: ProbeTarget) -> Self {
        Self { admin, target }
    }

    /// Label used in logs and errors.
    pub fn label(&self) -> String {
        self.target.to_string()
    }
}

fn found<T>(result: Result<T, AdminError>) -> Result<bool, BoxError> {
    match result {
        Ok(_) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ExistenceProbe for Visibility {
    async fn check_exists(&self, _cancel: &CancelSignal) -> Result<bool, BoxError> {
        match &self.target {
            ProbeTarget::User(name) => found(self.admin.get_user(name).await),
            ProbeTarget::Group(name) => found(self.admin.get_group(name).await),
            ProbeTarget::Bucket(name) => Ok(self.admin.bucket_exists(name).await?),
        }
    }
}

#[cfg(test)]
mod tests {
    use objsync_admin::MemoryAdmin;
    use objsync_reconcile::MembershipReconciler;

    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_user_groups_reconcile_against_memory_admin() {
        let admin = Arc::new(MemoryAdmin::new());
        admin.seed_user("alice", "password123");
        admin.seed_user("bob", "password123");
        admin.seed_group("legacy", &["alice", "bob"]);

        let reconciler = MembershipReconciler::new(UserGroups::new(admin.clone()));
        let report = reconciler
            .reconcile("alice", &set(&["dev", "ops"]))
            .await
            .unwrap();

        assert_eq!(report.added, vec!["dev", "ops"]);
        assert_eq!(report.removed, vec!["legacy"]);
        let user = admin.get_user("alice").await.unwrap();
        assert_eq!(user.member_of, set(&["dev", "ops"]));
        // bob keeps his membership
        assert_eq!(admin.get_group("legacy").await.unwrap().members, set(&["bob"]));
    }

    #[tokio::test]
    async fn test_group_members_noop_issues_no_updates() {
        let admin = Arc::new(MemoryAdmin::new());
        admin.seed_user("alice", "password123");
        admin.seed_group("ops", &["alice"]);

        let reconciler = MembershipReconciler::new(GroupMembers::new(admin.clone()));
        let report = reconciler.reconcile("ops", &set(&["alice"])).await.unwrap();

        assert!(report.is_noop());
        assert!(admin.calls().is_empty());
    }

    #[tokio::test]
    async fn test_probe_maps_not_found_to_invisible() {
        let admin = Arc::new(MemoryAdmin::with_read_lag(1));
        admin.add_user("alice", "password123").await.unwrap();

        let probe = Visibility::new(admin.clone(), ProbeTarget::User("alice".to_string()));
        let cancel = CancelSignal::never();
        assert!(!probe.check_exists(&cancel).await.unwrap());
        assert!(probe.check_exists(&cancel).await.unwrap());
        assert_eq!(probe.label(), "user alice");
    }

    #[tokio::test]
    async fn test_probe_surfaces_real_errors() {
        let admin = Arc::new(MemoryAdmin::new());
        admin.fail_on("bucket_exists", "logs");

        let probe = Visibility::new(admin, ProbeTarget::Bucket("logs".to_string()));
        assert!(probe.check_exists(&CancelSignal::never()).await.is_err());
    }
}
