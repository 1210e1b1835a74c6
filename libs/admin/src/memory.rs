//! In-memory admin API for tests and dry runs.
//!
//! Simulates the cluster's read-after-write lag: with a read lag of `n`, a
//! newly created user, group or bucket is reported missing by the first `n`
//! reads after its creation.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::api::AdminApi;
use crate::error::{AdminError, Result};
use crate::idp::{IdpConfig, IdpConfigInfo, IdpKind};
use crate::types::{
    AccountStatus, BucketSpec, GroupInfo, GroupMembersUpdate, LifecycleConfig, TierConfig,
    TierCredentials, TierInfo, UserInfo,
};

#[derive(Debug)]
struct Lagged<T> {
    value: T,
    reads_until_visible: u32,
}

impl<T> Lagged<T> {
    fn new(value: T, lag: u32) -> Self {
        Self {
            value,
            reads_until_visible: lag,
        }
    }

    /// Count a read; returns the value once the lag has elapsed.
    fn read(&mut self) -> Option<&T> {
        if self.reads_until_visible > 0 {
            self.reads_until_visible -= 1;
            return None;
        }
        Some(&self.value)
    }
}

#[derive(Debug)]
struct User {
    secret_key: String,
    status: AccountStatus,
}

#[derive(Debug)]
struct Group {
    status: AccountStatus,
    members: BTreeSet<String>,
}

#[derive(Debug)]
struct Bucket {
    spec: BucketSpec,
    lifecycle: Option<LifecycleConfig>,
}

#[derive(Debug, Default)]
struct ClusterState {
    users: BTreeMap<String, Lagged<User>>,
    groups: BTreeMap<String, Lagged<Group>>,
    buckets: BTreeMap<String, Lagged<Bucket>>,
    tiers: BTreeMap<String, TierConfig>,
    idp: BTreeMap<(IdpKind, String), IdpConfig>,
    calls: Vec<String>,
}

/// In-memory object-storage cluster.
#[derive(Debug, Default)]
pub struct MemoryAdmin {
    state: Mutex<ClusterState>,
    read_lag: u32,
    failures: Mutex<HashSet<(String, String)>>,
}

impl MemoryAdmin {
    /// Create an empty cluster where writes are visible immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty cluster where new resources stay hidden for `reads` reads.
    pub fn with_read_lag(reads: u32) -> Self {
        Self {
            read_lag: reads,
            ..Self::default()
        }
    }

    /// Make every future `op` call on `target` fail with a server error.
    ///
    /// `op` is the method name, e.g. `"update_group_members"`. For group
    /// membership updates the target is `"<group>/<member>"`.
    pub fn fail_on(&self, op: &str, target: &str) {
        lock(&self.failures).insert((op.to_string(), target.to_string()));
    }

    /// Stop injecting failures.
    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    /// Mutating calls issued so far, as `"<op> <target>"`.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }

    /// Seed a user that is visible immediately.
    pub fn seed_user(&self, access_key: &str, secret_key: &str) {
        lock(&self.state).users.insert(
            access_key.to_string(),
            Lagged::new(
                User {
                    secret_key: secret_key.to_string(),
                    status: AccountStatus::Enabled,
                },
                0,
            ),
        );
    }

    /// Seed a group with members that is visible immediately.
    pub fn seed_group(&self, name: &str, members: &[&str]) {
        lock(&self.state).groups.insert(
            name.to_string(),
            Lagged::new(
                Group {
                    status: AccountStatus::Enabled,
                    members: members.iter().map(|m| m.to_string()).collect(),
                },
                0,
            ),
        );
    }

    /// Seed a bucket that is visible immediately.
    pub fn seed_bucket(&self, name: &str) {
        lock(&self.state).buckets.insert(
            name.to_string(),
            Lagged::new(
                Bucket {
                    spec: BucketSpec {
                        name: name.to_string(),
                        ..BucketSpec::default()
                    },
                    lifecycle: None,
                },
                0,
            ),
        );
    }

    /// Secret key a user was created with, bypassing read lag.
    pub fn user_secret(&self, access_key: &str) -> Option<String> {
        lock(&self.state)
            .users
            .get(access_key)
            .map(|u| u.value.secret_key.clone())
    }

    /// Credentials a tier currently holds.
    pub fn tier_credentials(&self, name: &str) -> Option<TierCredentials> {
        lock(&self.state)
            .tiers
            .get(name)
            .map(|t| t.credentials.clone())
    }

    fn check_failure(&self, op: &str, target: &str) -> Result<()> {
        if lock(&self.failures).contains(&(op.to_string(), target.to_string())) {
            return Err(AdminError::api(500, "InternalError", format!("injected failure: {op} {target}")));
        }
        Ok(())
    }

    /// Record a mutating call and apply failure injection.
    fn mutate(&self, state: &mut ClusterState, op: &str, target: &str) -> Result<()> {
        state.calls.push(format!("{op} {target}"));
        self.check_failure(op, target)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl AdminApi for MemoryAdmin {
    async fn get_user(&self, access_key: &str) -> Result<UserInfo> {
        self.check_failure("get_user", access_key)?;
        let mut state = lock(&self.state);
        let status = state
            .users
            .get_mut(access_key)
            .and_then(|u| u.read().map(|u| u.status))
            .ok_or_else(|| AdminError::not_found("user", access_key))?;

        let member_of = state
            .groups
            .iter()
            .filter(|(_, g)| g.value.members.contains(access_key))
            .map(|(name, _)| name.clone())
            .collect();

        Ok(UserInfo {
            access_key: access_key.to_string(),
            status,
            member_of,
        })
    }

    async fn add_user(&self, access_key: &str, secret_key: &str) -> Result<()> {
        if access_key.len() < 3 || secret_key.len() < 8 {
            return Err(AdminError::api(
                400,
                "XMinioAdminInvalidArgument",
                "access key must be at least 3 and secret key at least 8 characters",
            ));
        }
        let mut state = lock(&self.state);
        self.mutate(&mut state, "add_user", access_key)?;
        let lag = self.read_lag;
        state
            .users
            .entry(access_key.to_string())
            .and_modify(|u| u.value.secret_key = secret_key.to_string())
            .or_insert_with(|| {
                Lagged::new(
                    User {
                        secret_key: secret_key.to_string(),
                        status: AccountStatus::Enabled,
                    },
                    lag,
                )
            });
        info!(access_key = %access_key, "[MEMORY] User added");
        Ok(())
    }

    async fn set_user_status(&self, access_key: &str, status: AccountStatus) -> Result<()> {
        let mut state = lock(&self.state);
        self.mutate(&mut state, "set_user_status", access_key)?;
        let user = state
            .users
            .get_mut(access_key)
            .ok_or_else(|| AdminError::not_found("user", access_key))?;
        user.value.status = status;
        Ok(())
    }

    async fn remove_user(&self, access_key: &str) -> Result<()> {
        let mut state = lock(&self.state);
        self.mutate(&mut state, "remove_user", access_key)?;
        if state.users.remove(access_key).is_none() {
            return Err(AdminError::not_found("user", access_key));
        }
        for group in state.groups.values_mut() {
            group.value.members.remove(access_key);
        }
        Ok(())
    }

    async fn get_group(&self, name: &str) -> Result<GroupInfo> {
        self.check_failure("get_group", name)?;
        let mut state = lock(&self.state);
        let group = state
            .groups
            .get_mut(name)
            .and_then(Lagged::read)
            .ok_or_else(|| AdminError::not_found("group", name))?;

        Ok(GroupInfo {
            name: name.to_string(),
            status: group.status,
            members: group.members.clone(),
        })
    }

    async fn update_group_members(&self, update: &GroupMembersUpdate) -> Result<()> {
        let mut state = lock(&self.state);
        let op = "update_group_members";
        state.calls.push(format!(
            "{op} {} {}{}",
            update.group,
            if update.is_remove { "-" } else { "+" },
            update.members.join(",")
        ));
        self.check_failure(op, &update.group)?;
        for member in &update.members {
            self.check_failure(op, &format!("{}/{member}", update.group))?;
        }

        if update.is_remove {
            let Some(group) = state.groups.get_mut(&update.group) else {
                return Err(AdminError::not_found("group", &update.group));
            };
            for member in &update.members {
                group.value.members.remove(member);
            }
            if update.members.is_empty() {
                if !group.value.members.is_empty() {
                    return Err(AdminError::api(
                        400,
                        "XMinioAdminGroupNotEmpty",
                        format!("group {} is not empty", update.group),
                    ));
                }
                state.groups.remove(&update.group);
            }
            return Ok(());
        }

        if let Some(missing) = update.members.iter().find(|m| !state.users.contains_key(*m)) {
            return Err(AdminError::not_found("user", missing));
        }
        let lag = self.read_lag;
        let group = state
            .groups
            .entry(update.group.clone())
            .or_insert_with(|| {
                debug!(group = %update.group, "[MEMORY] Group created");
                Lagged::new(
                    Group {
                        status: AccountStatus::Enabled,
                        members: BTreeSet::new(),
                    },
                    lag,
                )
            });
        group.value.members.extend(update.members.iter().cloned());
        Ok(())
    }

    async fn set_group_status(&self, name: &str, status: AccountStatus) -> Result<()> {
        let mut state = lock(&self.state);
        self.mutate(&mut state, "set_group_status", name)?;
        let group = state
            .groups
            .get_mut(name)
            .ok_or_else(|| AdminError::not_found("group", name))?;
        group.value.status = status;
        Ok(())
    }

    async fn remove_group(&self, name: &str) -> Result<()> {
        let mut state = lock(&self.state);
        self.mutate(&mut state, "remove_group", name)?;
        state
            .groups
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| AdminError::not_found("group", name))
    }

    async fn bucket_exists(&self, name: &str) -> Result<bool> {
        self.check_failure("bucket_exists", name)?;
        let mut state = lock(&self.state);
        Ok(state
            .buckets
            .get_mut(name)
            .and_then(Lagged::read)
            .is_some())
    }

    async fn make_bucket(&self, spec: &BucketSpec) -> Result<()> {
        let mut state = lock(&self.state);
        self.mutate(&mut state, "make_bucket", &spec.name)?;
        if state.buckets.contains_key(&spec.name) {
            return Err(AdminError::api(
                409,
                "BucketAlreadyOwnedByYou",
                format!("bucket {} already exists", spec.name),
            ));
        }
        let lag = self.read_lag;
        state.buckets.insert(
            spec.name.clone(),
            Lagged::new(
                Bucket {
                    spec: spec.clone(),
                    lifecycle: None,
                },
                lag,
            ),
        );
        info!(bucket = %spec.name, object_locking = spec.object_locking, "[MEMORY] Bucket created");
        Ok(())
    }

    async fn remove_bucket(&self, name: &str) -> Result<()> {
        let mut state = lock(&self.state);
        self.mutate(&mut state, "remove_bucket", name)?;
        state
            .buckets
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| AdminError::not_found("bucket", name))
    }

    async fn get_bucket_lifecycle(&self, bucket: &str) -> Result<Option<LifecycleConfig>> {
        let state = lock(&self.state);
        let bucket_state = state
            .buckets
            .get(bucket)
            .ok_or_else(|| AdminError::not_found("bucket", bucket))?;
        Ok(bucket_state.value.lifecycle.clone())
    }

    async fn set_bucket_lifecycle(&self, bucket: &str, config: &LifecycleConfig) -> Result<()> {
        config.validate()?;
        let mut state = lock(&self.state);
        self.mutate(&mut state, "set_bucket_lifecycle", bucket)?;
        let bucket_state = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| AdminError::not_found("bucket", bucket))?;
        bucket_state.value.lifecycle = if config.rules.is_empty() {
            None
        } else {
            Some(config.clone())
        };
        debug!(
            bucket = %bucket,
            object_locking = bucket_state.value.spec.object_locking,
            rules = config.rules.len(),
            "[MEMORY] Lifecycle set"
        );
        Ok(())
    }

    async fn list_tiers(&self) -> Result<Vec<TierInfo>> {
        let state = lock(&self.state);
        Ok(state.tiers.values().map(|t| t.info.clone()).collect())
    }

    async fn add_tier(&self, tier: &TierConfig) -> Result<()> {
        tier.validate()?;
        let mut state = lock(&self.state);
        self.mutate(&mut state, "add_tier", &tier.info.name)?;
        if state.tiers.contains_key(&tier.info.name) {
            return Err(AdminError::api(
                409,
                "XMinioAdminTierAlreadyExists",
                format!("tier {} already exists", tier.info.name),
            ));
        }
        state.tiers.insert(tier.info.name.clone(), tier.clone());
        Ok(())
    }

    async fn edit_tier_credentials(
        &self,
        name: &str,
        credentials: &TierCredentials,
    ) -> Result<()> {
        let mut state = lock(&self.state);
        self.mutate(&mut state, "edit_tier_credentials", name)?;
        let tier = state
            .tiers
            .get_mut(name)
            .ok_or_else(|| AdminError::not_found("tier", name))?;
        tier.credentials = credentials.clone();
        Ok(())
    }

    async fn remove_tier(&self, name: &str) -> Result<()> {
        let mut state = lock(&self.state);
        self.mutate(&mut state, "remove_tier", name)?;
        state
            .tiers
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| AdminError::not_found("tier", name))
    }

    async fn get_idp_config(&self, kind: IdpKind, name: &str) -> Result<IdpConfigInfo> {
        let state = lock(&self.state);
        let config = state
            .idp
            .get(&(kind, name.to_string()))
            .ok_or_else(|| AdminError::not_found("identity provider", name))?;
        Ok(IdpConfigInfo {
            kind,
            name: name.to_string(),
            entries: config.public_entries(),
        })
    }

    async fn set_idp_config(&self, config: &IdpConfig) -> Result<bool> {
        config.validate()?;
        let mut state = lock(&self.state);
        let target = format!("{}/{}", config.kind(), config.name());
        self.mutate(&mut state, "set_idp_config", &target)?;
        state
            .idp
            .insert((config.kind(), config.name().to_string()), config.clone());
        Ok(true)
    }

    async fn delete_idp_config(&self, kind: IdpKind, name: &str) -> Result<()> {
        let mut state = lock(&self.state);
        self.mutate(&mut state, "delete_idp_config", &format!("{kind}/{name}"))?;
        state
            .idp
            .remove(&(kind, name.to_string()))
            .map(|_| ())
            .ok_or_else(|| AdminError::not_found("identity provider", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_lag_hides_new_user() {
        let admin = MemoryAdmin::with_read_lag(2);
        admin.add_user("alice", "password123").await.unwrap();

        assert!(admin.get_user("alice").await.unwrap_err().is_not_found());
        assert!(admin.get_user("alice").await.unwrap_err().is_not_found());
        assert_eq!(admin.get_user("alice").await.unwrap().access_key, "alice");
    }

    #[tokio::test]
    async fn test_group_membership_reflected_in_user() {
        let admin = MemoryAdmin::new();
        admin.seed_user("alice", "password123");
        admin
            .update_group_members(&GroupMembersUpdate::add("ops", vec!["alice".to_string()]))
            .await
            .unwrap();

        let user = admin.get_user("alice").await.unwrap();
        assert!(user.member_of.contains("ops"));

        admin
            .update_group_members(&GroupMembersUpdate::remove("ops", vec!["alice".to_string()]))
            .await
            .unwrap();
        assert!(admin.get_user("alice").await.unwrap().member_of.is_empty());
    }

    #[tokio::test]
    async fn test_adding_unknown_user_to_group_fails() {
        let admin = MemoryAdmin::new();
        let err = admin
            .update_group_members(&GroupMembersUpdate::add("ops", vec!["ghost".to_string()]))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_removing_non_empty_group_with_empty_list_fails() {
        let admin = MemoryAdmin::new();
        admin.seed_user("alice", "password123");
        admin.seed_group("ops", &["alice"]);

        let err = admin
            .update_group_members(&GroupMembersUpdate::remove("ops", Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::Api { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let admin = MemoryAdmin::new();
        admin.seed_user("alice", "password123");
        admin.fail_on("update_group_members", "ops/alice");

        let err = admin
            .update_group_members(&GroupMembersUpdate::add("ops", vec!["alice".to_string()]))
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::Api { status: 500, .. }));
        assert_eq!(admin.calls(), vec!["update_group_members ops +alice"]);
    }

    #[tokio::test]
    async fn test_bucket_lifecycle() {
        let admin = MemoryAdmin::new();
        admin.seed_bucket("logs");
        assert!(admin.get_bucket_lifecycle("logs").await.unwrap().is_none());
        assert!(admin.get_bucket_lifecycle("nope").await.unwrap_err().is_not_found());
    }
}
