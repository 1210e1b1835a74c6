//! User lifecycle: create, wait for visibility, set status, reconcile groups.

use std::sync::Arc;

use chrono::Utc;
use objsync_admin::AccountStatus;
use objsync_reconcile::{Delta, MembershipReconciler};
use tracing::{debug, info};

use super::{describe_delta, optional, Action, Applied, ApplyError, Change, HandlerContext, Planned};
use crate::manifest::UserDecl;
use crate::relations::{ProbeTarget, UserGroups};
use crate::state::{secret_hash, ObservedUser};

pub struct UserHandler<'a> {
    ctx: &'a HandlerContext,
}

impl<'a> UserHandler<'a> {
    pub fn new(ctx: &'a HandlerContext) -> Self {
        Self { ctx }
    }

    /// Describe what `apply` would change, without mutating anything.
    pub async fn plan(
        &self,
        decl: &UserDecl,
        prior: Option<&ObservedUser>,
    ) -> Result<Planned, ApplyError> {
        let hash = secret_hash(&decl.secret_key.resolve()?);
        let Some(info) = optional(self.ctx.admin.get_user(&decl.access_key).await)? else {
            return Ok(Some(Change::Create));
        };

        let mut changes = Vec::new();
        if prior.map_or(true, |p| p.secret_hash != hash) {
            changes.push("secret_key".to_string());
        }
        if info.status != decl.status {
            changes.push(format!("status {} -> {}", info.status, decl.status));
        }
        let delta = Delta::compute(&decl.group_set(), &info.member_of);
        changes.extend(describe_delta("groups", &delta));

        Ok((!changes.is_empty()).then_some(Change::Update(changes)))
    }

    /// Converge one user on its declaration.
    pub async fn apply(
        &self,
        decl: &UserDecl,
        prior: Option<&ObservedUser>,
    ) -> Result<Applied<ObservedUser>, ApplyError> {
        let mut warnings = Vec::new();
        match self.converge(decl, prior, &mut warnings).await {
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
        decl: &UserDecl,
        prior: Option<&ObservedUser>,
        warnings: &mut Vec<String>,
    ) -> Result<(ObservedUser, Action), ApplyError> {
        let admin = &self.ctx.admin;
        let access_key = decl.access_key.as_str();
        let secret = decl.secret_key.resolve()?;
        let hash = secret_hash(&secret);

        let existing = optional(admin.get_user(access_key).await)?;
        let mut action = match &existing {
            None => {
                admin.add_user(access_key, &secret).await?;
                info!(access_key = %access_key, "User created");
                warnings.extend(self.ctx.wait_visible(ProbeTarget::User(access_key.to_string())).await?);
                Action::Created
            }
            Some(_) if prior.map_or(true, |p| p.secret_hash != hash) => {
                // Adding an existing user replaces its secret key.
                admin.add_user(access_key, &secret).await?;
                info!(access_key = %access_key, "User secret key rotated");
                Action::Updated
            }
            Some(_) => Action::Unchanged,
        };

        let current_status = existing.as_ref().map_or(AccountStatus::Enabled, |u| u.status);
        if current_status != decl.status {
            admin.set_user_status(access_key, decl.status).await?;
            info!(access_key = %access_key, status = %decl.status, "User status set");
            action = action.or_updated();
        }

        let groups = decl.group_set();
        let report = MembershipReconciler::new(UserGroups::new(Arc::clone(admin)))
            .reconcile(access_key, &groups)
            .await?;
        if !report.is_noop() {
            action = action.or_updated();
        }

        debug!(access_key = %access_key, action = %action, "User applied");
        let observed = ObservedUser {
            access_key: access_key.to_string(),
            status: decl.status,
            groups,
            secret_hash: hash,
            applied_at: Utc::now(),
        };
        Ok((observed, action))
    }

    /// Remove a user dropped from the manifest.
    pub async fn delete(&self, observed: &ObservedUser) -> Result<(), ApplyError> {
        match optional(self.ctx.admin.remove_user(&observed.access_key).await)? {
            Some(()) => info!(access_key = %observed.access_key, "User removed"),
            None => debug!(access_key = %observed.access_key, "User already gone"),
        }
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

    fn decl(groups: &[&str]) -> UserDecl {
        UserDecl {
            access_key: "alice".to_string(),
            secret_key: "password123".into(),
            status: AccountStatus::Enabled,
            groups: groups.iter().map(|g| g.to_string()).collect(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_waits_then_reconciles_groups() {
        let admin = Arc::new(MemoryAdmin::with_read_lag(2));
        let ctx = ctx(admin.clone());

        let applied = UserHandler::new(&ctx)
            .apply(&decl(&["dev"]), None)
            .await
            .unwrap();

        assert_eq!(applied.action, Action::Created);
        assert!(applied.warnings.is_empty());
        assert_eq!(applied.observed.groups, BTreeSet::from(["dev".to_string()]));
        assert_eq!(
            admin.calls(),
            vec!["add_user alice", "update_group_members dev +alice"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_invisible_user_fails_group_read() {
        let admin = Arc::new(MemoryAdmin::with_read_lag(50));
        let ctx = ctx(admin.clone());

        // The wait gives up; the group reconcile then cannot read the user.
        let err = UserHandler::new(&ctx)
            .apply(&decl(&[]), None)
            .await
            .unwrap_err();
        let (err, warnings) = err.into_parts();
        assert!(matches!(err, ApplyError::Reconcile(ref e) if e.is_read_failure()));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("not visible"), "{}", warnings[0]);
    }

    #[tokio::test]
    async fn test_second_apply_is_unchanged() {
        let admin = Arc::new(MemoryAdmin::new());
        let ctx = ctx(admin.clone());
        let handler = UserHandler::new(&ctx);

        let first = handler.apply(&decl(&["dev"]), None).await.unwrap();
        let calls = admin.calls().len();

        let second = handler
            .apply(&decl(&["dev"]), Some(&first.observed))
            .await
            .unwrap();
        assert_eq!(second.action, Action::Unchanged);
        assert_eq!(admin.calls().len(), calls);
        assert!(handler
            .plan(&decl(&["dev"]), Some(&second.observed))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_secret_change_rotates() {
        let admin = Arc::new(MemoryAdmin::new());
        let ctx = ctx(admin.clone());
        let handler = UserHandler::new(&ctx);
        let first = handler.apply(&decl(&[]), None).await.unwrap();

        let mut rotated = decl(&[]);
        rotated.secret_key = "new-password".into();
        let second = handler.apply(&rotated, Some(&first.observed)).await.unwrap();

        assert_eq!(second.action, Action::Updated);
        assert_eq!(admin.user_secret("alice").as_deref(), Some("new-password"));
    }

    #[tokio::test]
    async fn test_status_and_group_changes_planned() {
        let admin = Arc::new(MemoryAdmin::new());
        admin.seed_user("alice", "password123");
        admin.seed_group("legacy", &["alice"]);
        let ctx = ctx(admin.clone());

        let mut wanted = decl(&["dev"]);
        wanted.status = AccountStatus::Disabled;
        let prior = ObservedUser {
            access_key: "alice".to_string(),
            status: AccountStatus::Enabled,
            groups: BTreeSet::new(),
            secret_hash: secret_hash("password123"),
            applied_at: Utc::now(),
        };

        let planned = UserHandler::new(&ctx).plan(&wanted, Some(&prior)).await.unwrap();
        assert_eq!(
            planned,
            Some(Change::Update(vec![
                "status enabled -> disabled".to_string(),
                "groups +dev".to_string(),
                "groups -legacy".to_string(),
            ]))
        );
        assert!(admin.calls().is_empty());

        UserHandler::new(&ctx).apply(&wanted, Some(&prior)).await.unwrap();
        let user = admin.get_user("alice").await.unwrap();
        assert_eq!(user.status, AccountStatus::Disabled);
        assert_eq!(user.member_of, BTreeSet::from(["dev".to_string()]));
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_user() {
        let admin = Arc::new(MemoryAdmin::new());
        let ctx = ctx(admin);
        let observed = ObservedUser {
            access_key: "ghost".to_string(),
            status: AccountStatus::Enabled,
            groups: BTreeSet::new(),
            secret_hash: secret_hash("x"),
            applied_at: Utc::now(),
        };
        UserHandler::new(&ctx).delete(&observed).await.unwrap();
    }
}
