//! Group lifecycle: create with members, wait, reconcile members, set status.

use std::sync::Arc;

use chrono::Utc;
use objsync_admin::{AccountStatus, GroupMembersUpdate};
use objsync_reconcile::{Delta, MembershipReconciler};
use tracing::{debug, info};

use super::{describe_delta, optional, Action, Applied, ApplyError, Change, HandlerContext, Planned};
use crate::manifest::GroupDecl;
use crate::relations::{GroupMembers, ProbeTarget};
use crate::state::ObservedGroup;

pub struct GroupHandler<'a> {
    ctx: &'a HandlerContext,
}

impl<'a> GroupHandler<'a> {
    pub fn new(ctx: &'a HandlerContext) -> Self {
        Self { ctx }
    }

    pub async fn plan(&self, decl: &GroupDecl) -> Result<Planned, ApplyError> {
        let Some(info) = optional(self.ctx.admin.get_group(&decl.name).await)? else {
            return Ok(Some(Change::Create));
        };

        let mut changes = Vec::new();
        if info.status != decl.status {
            changes.push(format!("status {} -> {}", info.status, decl.status));
        }
        if let Some(members) = decl.member_set() {
            changes.extend(describe_delta("members", &Delta::compute(&members, &info.members)));
        }

        Ok((!changes.is_empty()).then_some(Change::Update(changes)))
    }

    /// Converge one group on its declaration.
    ///
    /// Without a declared member list, membership is left alone and the
    /// current members are recorded as observed.
    pub async fn apply(&self, decl: &GroupDecl) -> Result<Applied<ObservedGroup>, ApplyError> {
        let mut warnings = Vec::new();
        match self.converge(decl, &mut warnings).await {
            Ok((observed, action)) => Ok(Applied {
                observed,
                action,
                warnings,
            }),
            Err(e) => Err(e.with_warnings(warnings)),
        }
    }

    async fn converge(
        &self,
        decl: &GroupDecl,
        warnings: &mut Vec<String>,
    ) -> Result<(ObservedGroup, Action), ApplyError> {
        let admin = &self.ctx.admin;
        let name = decl.name.as_str();
        let desired = decl.member_set();

        let existing = optional(admin.get_group(name).await)?;
        let mut action = match &existing {
            Some(_) => Action::Unchanged,
            None => {
                // Groups are created by adding members; an empty add creates an empty group.
                let members = desired.iter().flatten().cloned().collect();
                admin
                    .update_group_members(&GroupMembersUpdate::add(name, members))
                    .await?;
                info!(group = %name, "Group created");
                warnings.extend(self.ctx.wait_visible(ProbeTarget::Group(name.to_string())).await?);
                Action::Created
            }
        };

        let members = match &desired {
            Some(members) => {
                let report = MembershipReconciler::new(GroupMembers::new(Arc::clone(admin)))
                    .reconcile(name, members)
                    .await?;
                if !report.is_noop() {
                    action = action.or_updated();
                }
                members.clone()
            }
            None => existing
                .as_ref()
                .map(|g| g.members.clone())
                .unwrap_or_default(),
        };

        let current_status = existing.as_ref().map_or(AccountStatus::Enabled, |g| g.status);
        if current_status != decl.status {
            admin.set_group_status(name, decl.status).await?;
            info!(group = %name, status = %decl.status, "Group status set");
            action = action.or_updated();
        }

        debug!(group = %name, action = %action, "Group applied");
        let observed = ObservedGroup {
            name: name.to_string(),
            status: decl.status,
            members,
            manages_members: desired.is_some(),
            applied_at: Utc::now(),
        };
        Ok((observed, action))
    }

    /// Empty and remove a group dropped from the manifest.
    pub async fn delete(&self, observed: &ObservedGroup) -> Result<(), ApplyError> {
        let admin = &self.ctx.admin;
        let Some(info) = optional(admin.get_group(&observed.name).await)? else {
            debug!(group = %observed.name, "Group already gone");
            return Ok(());
        };

        if !info.members.is_empty() {
            let members = info.members.into_iter().collect();
            admin
                .update_group_members(&GroupMembersUpdate::remove(&observed.name, members))
                .await?;
        }
        admin.remove_group(&observed.name).await?;
        info!(group = %observed.name, "Group removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use objsync_admin::{AdminApi, MemoryAdmin};
    use objsync_reconcile::{CancelSignal, RetryPolicy};

    use super::*;

    fn ctx(admin: Arc<MemoryAdmin>) -> HandlerContext {
        HandlerContext::new(admin, RetryPolicy::default(), CancelSignal::never())
    }

    fn decl(members: Option<&[&str]>) -> GroupDecl {
        GroupDecl {
            name: "ops".to_string(),
            status: AccountStatus::Enabled,
            members: members.map(|m| m.iter().map(|s| s.to_string()).collect()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_with_members_waits_for_visibility() {
        let admin = Arc::new(MemoryAdmin::with_read_lag(1));
        admin.seed_user("alice", "password123");
        let ctx = ctx(admin.clone());

        let applied = GroupHandler::new(&ctx)
            .apply(&decl(Some(&["alice"])))
            .await
            .unwrap();

        assert_eq!(applied.action, Action::Created);
        assert!(applied.observed.manages_members);
        // Created with its members; the reconcile after the wait finds nothing to do.
        assert_eq!(admin.calls(), vec!["update_group_members ops +alice"]);
    }

    #[tokio::test]
    async fn test_declared_members_are_exact() {
        let admin = Arc::new(MemoryAdmin::new());
        admin.seed_user("alice", "password123");
        admin.seed_user("bob", "password123");
        admin.seed_group("ops", &["bob"]);
        let ctx = ctx(admin.clone());
        let handler = GroupHandler::new(&ctx);

        assert_eq!(
            handler.plan(&decl(Some(&["alice"]))).await.unwrap(),
            Some(Change::Update(vec![
                "members +alice".to_string(),
                "members -bob".to_string(),
            ]))
        );

        let applied = handler.apply(&decl(Some(&["alice"]))).await.unwrap();
        assert_eq!(applied.action, Action::Updated);
        assert_eq!(
            admin.get_group("ops").await.unwrap().members,
            BTreeSet::from(["alice".to_string()])
        );
    }

    #[tokio::test]
    async fn test_undeclared_members_left_alone() {
        let admin = Arc::new(MemoryAdmin::new());
        admin.seed_user("bob", "password123");
        admin.seed_group("ops", &["bob"]);
        let ctx = ctx(admin.clone());

        let applied = GroupHandler::new(&ctx).apply(&decl(None)).await.unwrap();

        assert_eq!(applied.action, Action::Unchanged);
        assert!(!applied.observed.manages_members);
        assert_eq!(applied.observed.members, BTreeSet::from(["bob".to_string()]));
        assert!(admin.calls().is_empty());
    }

    #[tokio::test]
    async fn test_disable_group() {
        let admin = Arc::new(MemoryAdmin::new());
        admin.seed_group("ops", &[]);
        let ctx = ctx(admin.clone());

        let mut disabled = decl(None);
        disabled.status = AccountStatus::Disabled;
        let applied = GroupHandler::new(&ctx).apply(&disabled).await.unwrap();

        assert_eq!(applied.action, Action::Updated);
        assert_eq!(admin.calls(), vec!["set_group_status ops"]);
    }

    #[tokio::test]
    async fn test_delete_empties_group_first() {
        let admin = Arc::new(MemoryAdmin::new());
        admin.seed_user("alice", "password123");
        admin.seed_group("ops", &["alice"]);
        let ctx = ctx(admin.clone());

        let observed = ObservedGroup {
            name: "ops".to_string(),
            status: AccountStatus::Enabled,
            members: BTreeSet::new(),
            manages_members: false,
            applied_at: Utc::now(),
        };
        GroupHandler::new(&ctx).delete(&observed).await.unwrap();

        assert_eq!(
            admin.calls(),
            vec!["update_group_members ops -alice", "remove_group ops"]
        );
        assert!(admin.get_group("ops").await.unwrap_err().is_not_found());
    }
}
