//! Apply and plan runs over a whole manifest.
//!
//! Resources are applied in dependency order: tiers, identity providers,
//! users, groups, buckets. Pruning runs in reverse. A failed resource is
//! recorded and the run continues; cancellation stops the run.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::Utc;
use tracing::{info, warn};

use crate::manifest::Manifest;
use crate::resources::{
    Action, Applied, ApplyError, BucketHandler, Change, GroupHandler, HandlerContext, IdpHandler,
    Planned, TierHandler, UserHandler,
};
use crate::state::{ObservedIdp, ObservedState};

/// Kind of managed entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResourceKind {
    Tier,
    IdentityProvider,
    User,
    Group,
    Bucket,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Tier => write!(f, "tier"),
            ResourceKind::IdentityProvider => write!(f, "identity provider"),
            ResourceKind::User => write!(f, "user"),
            ResourceKind::Group => write!(f, "group"),
            ResourceKind::Bucket => write!(f, "bucket"),
        }
    }
}

/// Result for one resource in an apply run.
#[derive(Debug)]
pub struct ResourceResult {
    pub kind: ResourceKind,
    pub name: String,
    pub outcome: Result<Action, String>,
    pub warnings: Vec<String>,
}

/// Summary of an apply run.
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub results: Vec<ResourceResult>,
    /// The run was interrupted; later resources were not applied.
    pub cancelled: bool,
}

impl ApplyReport {
    pub fn failures(&self) -> impl Iterator<Item = &ResourceResult> {
        self.results.iter().filter(|r| r.outcome.is_err())
    }

    pub fn warnings(&self) -> impl Iterator<Item = (&ResourceResult, &str)> {
        self.results
            .iter()
            .flat_map(|r| r.warnings.iter().map(move |w| (r, w.as_str())))
    }

    /// Number of resources that ended with the given action.
    pub fn count(&self, action: Action) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome.as_ref().ok() == Some(&action))
            .count()
    }

    pub fn is_success(&self) -> bool {
        !self.cancelled && self.failures().next().is_none()
    }

    /// Records one resource. Returns the observed fields on success.
    fn record<T>(
        &mut self,
        kind: ResourceKind,
        name: &str,
        result: Result<Applied<T>, ApplyError>,
    ) -> Option<T> {
        match result {
            Ok(applied) => {
                self.results.push(ResourceResult {
                    kind,
                    name: name.to_string(),
                    outcome: Ok(applied.action),
                    warnings: applied.warnings,
                });
                Some(applied.observed)
            }
            Err(e) => {
                let (e, warnings) = e.into_parts();
                if e.is_cancelled() {
                    warn!(kind = %kind, name = %name, "Apply cancelled");
                    self.cancelled = true;
                } else {
                    warn!(kind = %kind, name = %name, error = %e, "Failed to apply resource");
                }
                self.results.push(ResourceResult {
                    kind,
                    name: name.to_string(),
                    outcome: Err(e.to_string()),
                    warnings,
                });
                None
            }
        }
    }

    fn record_delete(&mut self, kind: ResourceKind, name: &str, result: Result<(), ApplyError>) -> bool {
        let applied = result.map(|()| Applied::new((), Action::Deleted));
        self.record(kind, name, applied).is_some()
    }
}

/// One planned change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChange {
    pub kind: ResourceKind,
    pub name: String,
    pub change: Change,
}

/// Result of a plan run.
#[derive(Debug, Default)]
pub struct Plan {
    pub changes: Vec<PlannedChange>,
    /// Resources whose plan could not be computed.
    pub errors: Vec<(ResourceKind, String, String)>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.errors.is_empty()
    }

    fn record(&mut self, kind: ResourceKind, name: &str, result: Result<Planned, ApplyError>) {
        match result {
            Ok(Some(change)) => self.changes.push(PlannedChange {
                kind,
                name: name.to_string(),
                change,
            }),
            Ok(None) => {}
            Err(e) => self.errors.push((kind, name.to_string(), e.to_string())),
        }
    }

    fn delete(&mut self, kind: ResourceKind, name: &str) {
        self.changes.push(PlannedChange {
            kind,
            name: name.to_string(),
            change: Change::Delete,
        });
    }
}

/// Names in observed state that the manifest no longer declares.
fn stale<V>(observed: &BTreeMap<String, V>, declared: &BTreeSet<String>) -> Vec<String> {
    observed
        .keys()
        .filter(|name| !declared.contains(*name))
        .cloned()
        .collect()
}

struct Declared {
    tiers: BTreeSet<String>,
    idps: BTreeSet<String>,
    users: BTreeSet<String>,
    groups: BTreeSet<String>,
    buckets: BTreeSet<String>,
}

impl Declared {
    fn of(manifest: &Manifest) -> Self {
        Self {
            tiers: manifest.tiers.iter().map(|t| t.name.clone()).collect(),
            idps: manifest
                .identity_providers
                .iter()
                .map(|c| ObservedIdp::key(c.kind(), c.name()))
                .collect(),
            users: manifest.users.iter().map(|u| u.access_key.clone()).collect(),
            groups: manifest.groups.iter().map(|g| g.name.clone()).collect(),
            buckets: manifest.buckets.iter().map(|b| b.name.clone()).collect(),
        }
    }
}

/// Runs the lifecycle handlers over a manifest.
pub struct Applier {
    ctx: HandlerContext,
    prune: bool,
}

impl Applier {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx, prune: true }
    }

    /// Whether entities dropped from the manifest are deleted.
    pub fn with_prune(mut self, prune: bool) -> Self {
        self.prune = prune;
        self
    }

    /// Compute every change an apply would make. Issues reads only.
    pub async fn plan(&self, manifest: &Manifest, state: &ObservedState) -> Plan {
        let mut plan = Plan::default();

        let tiers = TierHandler::new(&self.ctx);
        for decl in &manifest.tiers {
            let result = tiers.plan(decl, state.tiers.get(&decl.name)).await;
            plan.record(ResourceKind::Tier, &decl.name, result);
        }

        let idps = IdpHandler::new(&self.ctx);
        for decl in &manifest.identity_providers {
            let key = ObservedIdp::key(decl.kind(), decl.name());
            let result = idps.plan(decl, state.identity_providers.get(&key)).await;
            plan.record(ResourceKind::IdentityProvider, &key, result);
        }

        let users = UserHandler::new(&self.ctx);
        for decl in &manifest.users {
            let result = users.plan(decl, state.users.get(&decl.access_key)).await;
            plan.record(ResourceKind::User, &decl.access_key, result);
        }

        let groups = GroupHandler::new(&self.ctx);
        for decl in &manifest.groups {
            let result = groups.plan(decl).await;
            plan.record(ResourceKind::Group, &decl.name, result);
        }

        let buckets = BucketHandler::new(&self.ctx);
        for decl in &manifest.buckets {
            let result = buckets.plan(decl, state.buckets.get(&decl.name)).await;
            plan.record(ResourceKind::Bucket, &decl.name, result);
        }

        if self.prune {
            let declared = Declared::of(manifest);
            for name in stale(&state.buckets, &declared.buckets) {
                plan.delete(ResourceKind::Bucket, &name);
            }
            for name in stale(&state.groups, &declared.groups) {
                plan.delete(ResourceKind::Group, &name);
            }
            for name in stale(&state.users, &declared.users) {
                plan.delete(ResourceKind::User, &name);
            }
            for name in stale(&state.identity_providers, &declared.idps) {
                plan.delete(ResourceKind::IdentityProvider, &name);
            }
            for name in stale(&state.tiers, &declared.tiers) {
                plan.delete(ResourceKind::Tier, &name);
            }
        }

        plan
    }

    /// Apply a manifest, updating `state` with every resource that converged.
    pub async fn apply(&self, manifest: &Manifest, state: &mut ObservedState) -> ApplyReport {
        let mut report = ApplyReport::default();
        info!(
            users = manifest.users.len(),
            groups = manifest.groups.len(),
            buckets = manifest.buckets.len(),
            tiers = manifest.tiers.len(),
            identity_providers = manifest.identity_providers.len(),
            "Applying manifest"
        );

        self.apply_declared(manifest, state, &mut report).await;
        if self.prune && !report.cancelled {
            self.prune_stale(manifest, state, &mut report).await;
        }

        state.updated_at = Some(Utc::now());
        info!(
            created = report.count(Action::Created),
            updated = report.count(Action::Updated),
            deleted = report.count(Action::Deleted),
            failed = report.failures().count(),
            cancelled = report.cancelled,
            "Apply finished"
        );
        report
    }

    /// Stop once the run is cancelled.
    fn interrupted(&self, report: &mut ApplyReport) -> bool {
        if self.ctx.cancel.is_cancelled() {
            report.cancelled = true;
        }
        report.cancelled
    }

    async fn apply_declared(
        &self,
        manifest: &Manifest,
        state: &mut ObservedState,
        report: &mut ApplyReport,
    ) {
        let tiers = TierHandler::new(&self.ctx);
        for decl in &manifest.tiers {
            if self.interrupted(report) {
                return;
            }
            let result = tiers.apply(decl, state.tiers.get(&decl.name)).await;
            if let Some(observed) = report.record(ResourceKind::Tier, &decl.name, result) {
                state.tiers.insert(decl.name.clone(), observed);
            }
        }

        let idps = IdpHandler::new(&self.ctx);
        for decl in &manifest.identity_providers {
            if self.interrupted(report) {
                return;
            }
            let key = ObservedIdp::key(decl.kind(), decl.name());
            let result = idps.apply(decl, state.identity_providers.get(&key)).await;
            if let Some(observed) = report.record(ResourceKind::IdentityProvider, &key, result) {
                state.identity_providers.insert(key, observed);
            }
        }

        let users = UserHandler::new(&self.ctx);
        for decl in &manifest.users {
            if self.interrupted(report) {
                return;
            }
            let result = users.apply(decl, state.users.get(&decl.access_key)).await;
            if let Some(observed) = report.record(ResourceKind::User, &decl.access_key, result) {
                state.users.insert(decl.access_key.clone(), observed);
            }
        }

        let groups = GroupHandler::new(&self.ctx);
        for decl in &manifest.groups {
            if self.interrupted(report) {
                return;
            }
            let result = groups.apply(decl).await;
            if let Some(observed) = report.record(ResourceKind::Group, &decl.name, result) {
                state.groups.insert(decl.name.clone(), observed);
            }
        }

        let buckets = BucketHandler::new(&self.ctx);
        for decl in &manifest.buckets {
            if self.interrupted(report) {
                return;
            }
            let result = buckets.apply(decl, state.buckets.get(&decl.name)).await;
            if let Some(observed) = report.record(ResourceKind::Bucket, &decl.name, result) {
                state.buckets.insert(decl.name.clone(), observed);
            }
        }
    }

    async fn prune_stale(
        &self,
        manifest: &Manifest,
        state: &mut ObservedState,
        report: &mut ApplyReport,
    ) {
        let declared = Declared::of(manifest);

        let buckets = BucketHandler::new(&self.ctx);
        for name in stale(&state.buckets, &declared.buckets) {
            if self.interrupted(report) {
                return;
            }
            if let Some(observed) = state.buckets.get(&name) {
                let result = buckets.delete(observed).await;
                if report.record_delete(ResourceKind::Bucket, &name, result) {
                    state.buckets.remove(&name);
                }
            }
        }

        let groups = GroupHandler::new(&self.ctx);
        for name in stale(&state.groups, &declared.groups) {
            if self.interrupted(report) {
                return;
            }
            if let Some(observed) = state.groups.get(&name) {
                let result = groups.delete(observed).await;
                if report.record_delete(ResourceKind::Group, &name, result) {
                    state.groups.remove(&name);
                }
            }
        }

        let users = UserHandler::new(&self.ctx);
        for name in stale(&state.users, &declared.users) {
            if self.interrupted(report) {
                return;
            }
            if let Some(observed) = state.users.get(&name) {
                let result = users.delete(observed).await;
                if report.record_delete(ResourceKind::User, &name, result) {
                    state.users.remove(&name);
                }
            }
        }

        let idps = IdpHandler::new(&self.ctx);
        for key in stale(&state.identity_providers, &declared.idps) {
            if self.interrupted(report) {
                return;
            }
            if let Some(observed) = state.identity_providers.get(&key) {
                let result = idps.delete(observed).await;
                if report.record_delete(ResourceKind::IdentityProvider, &key, result) {
                    state.identity_providers.remove(&key);
                }
            }
        }

        let tiers = TierHandler::new(&self.ctx);
        for name in stale(&state.tiers, &declared.tiers) {
            if self.interrupted(report) {
                return;
            }
            if let Some(observed) = state.tiers.get(&name) {
                let result = tiers.delete(observed).await;
                if report.record_delete(ResourceKind::Tier, &name, result) {
                    state.tiers.remove(&name);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use objsync_admin::MemoryAdmin;
    use objsync_reconcile::{CancelSignal, RetryPolicy};

    use super::*;

    const MANIFEST: &str = r#"
[[users]]
access_key = "alice"
secret_key = "password123"
groups = ["ops"]

[[groups]]
name = "ops"
members = ["alice"]

[[buckets]]
name = "logs"
"#;

    fn applier(admin: Arc<MemoryAdmin>) -> Applier {
        Applier::new(HandlerContext::new(
            admin,
            RetryPolicy::default(),
            CancelSignal::never(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_resource_keeps_visibility_warning() {
        let admin = Arc::new(MemoryAdmin::with_read_lag(50));
        let manifest = Manifest::from_toml_str(
            r#"
[[users]]
access_key = "alice"
secret_key = "password123"
"#,
        )
        .unwrap();
        let mut state = ObservedState::default();

        let report = applier(admin).apply(&manifest, &mut state).await;

        let failed: Vec<_> = report.failures().collect();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].outcome.as_ref().unwrap_err().contains("user not found"));
        assert_eq!(failed[0].warnings.len(), 1);
        assert!(failed[0].warnings[0].contains("user alice"), "{:?}", failed[0].warnings);
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_apply_then_plan_is_empty() {
        let admin = Arc::new(MemoryAdmin::new());
        let applier = applier(admin.clone());
        let manifest = Manifest::from_toml_str(MANIFEST).unwrap();
        let mut state = ObservedState::default();

        let report = applier.apply(&manifest, &mut state).await;
        assert!(report.is_success(), "{report:?}");
        // alice's group list creates ops before the group itself is applied
        assert_eq!(report.count(Action::Created), 2);
        assert_eq!(report.count(Action::Unchanged), 1);
        assert!(state.updated_at.is_some());

        let plan = applier.plan(&manifest, &state).await;
        assert!(plan.is_empty(), "{plan:?}");
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_the_run() {
        let admin = Arc::new(MemoryAdmin::new());
        admin.fail_on("add_user", "alice");
        let applier = applier(admin.clone());
        let manifest = Manifest::from_toml_str(MANIFEST).unwrap();
        let mut state = ObservedState::default();

        let report = applier.apply(&manifest, &mut state).await;

        assert!(!report.is_success());
        let failed: Vec<_> = report.failures().map(|r| r.name.as_str()).collect();
        // ops cannot take alice as a member either
        assert_eq!(failed, vec!["alice", "ops"]);
        assert!(state.buckets.contains_key("logs"));
        assert!(!state.users.contains_key("alice"));
    }

    #[tokio::test]
    async fn test_dropped_resources_are_pruned() {
        let admin = Arc::new(MemoryAdmin::new());
        let applier = applier(admin.clone());
        let mut state = ObservedState::default();
        applier
            .apply(&Manifest::from_toml_str(MANIFEST).unwrap(), &mut state)
            .await;

        let empty = Manifest::default();
        let plan = applier.plan(&empty, &state).await;
        let order: Vec<_> = plan.changes.iter().map(|c| c.kind).collect();
        assert_eq!(
            order,
            vec![ResourceKind::Bucket, ResourceKind::Group, ResourceKind::User]
        );

        let report = applier.apply(&empty, &mut state).await;
        assert!(report.is_success(), "{report:?}");
        assert_eq!(report.count(Action::Deleted), 3);
        assert!(state.users.is_empty() && state.groups.is_empty() && state.buckets.is_empty());
    }

    #[tokio::test]
    async fn test_no_prune_keeps_dropped_resources() {
        let admin = Arc::new(MemoryAdmin::new());
        let applier = applier(admin.clone()).with_prune(false);
        let mut state = ObservedState::default();
        applier
            .apply(&Manifest::from_toml_str(MANIFEST).unwrap(), &mut state)
            .await;
        let calls = admin.calls().len();

        let report = applier.apply(&Manifest::default(), &mut state).await;
        assert!(report.results.is_empty());
        assert_eq!(admin.calls().len(), calls);
        assert_eq!(state.users.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_issues_no_calls() {
        let admin = Arc::new(MemoryAdmin::new());
        let (handle, cancel) = CancelSignal::new();
        handle.cancel();
        let applier = Applier::new(HandlerContext::new(admin.clone(), RetryPolicy::default(), cancel));
        let mut state = ObservedState::default();

        let report = applier
            .apply(&Manifest::from_toml_str(MANIFEST).unwrap(), &mut state)
            .await;

        assert!(report.cancelled);
        assert!(report.results.is_empty());
        assert!(admin.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_wait_stops_the_run() {
        let admin = Arc::new(MemoryAdmin::with_read_lag(3));
        let (handle, cancel) = CancelSignal::new();
        let applier = Applier::new(HandlerContext::new(admin.clone(), RetryPolicy::default(), cancel));
        let mut state = ObservedState::default();

        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            handle.cancel();
        });
        let report = applier
            .apply(&Manifest::from_toml_str(MANIFEST).unwrap(), &mut state)
            .await;

        assert!(report.cancelled);
        assert_eq!(report.results.len(), 1);
        assert!(report.results[0].outcome.is_err());
        // The user was created before its wait was cancelled.
        assert_eq!(admin.calls(), vec!["add_user alice"]);
        assert!(state.users.is_empty());
    }
}
