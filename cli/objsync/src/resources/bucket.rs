//! Bucket lifecycle: create, wait for visibility, apply lifecycle rules.

use std::collections::BTreeMap;

use chrono::Utc;
use objsync_admin::{LifecycleConfig, LifecycleRule};
use tracing::{debug, info};

use super::{optional, Action, Applied, ApplyError, Change, HandlerContext, Planned};
use crate::manifest::BucketDecl;
use crate::relations::ProbeTarget;
use crate::state::ObservedBucket;

pub struct BucketHandler<'a> {
    ctx: &'a HandlerContext,
}

/// Plan lines for a lifecycle change, keyed by rule id.
fn lifecycle_changes(current: &LifecycleConfig, desired: &LifecycleConfig) -> Vec<String> {
    let current: BTreeMap<&str, &LifecycleRule> =
        current.rules.iter().map(|r| (r.id.as_str(), r)).collect();
    let desired: BTreeMap<&str, &LifecycleRule> =
        desired.rules.iter().map(|r| (r.id.as_str(), r)).collect();

    let mut changes = Vec::new();
    for (id, rule) in &desired {
        match current.get(id) {
            None => changes.push(format!("lifecycle +{id}")),
            Some(existing) if existing != rule => changes.push(format!("lifecycle ~{id}")),
            Some(_) => {}
        }
    }
    for id in current.keys().filter(|id| !desired.contains_key(*id)) {
        changes.push(format!("lifecycle -{id}"));
    }
    changes
}

/// Object locking and region are fixed once a bucket exists.
fn check_immutable(decl: &BucketDecl, prior: Option<&ObservedBucket>) -> Result<(), ApplyError> {
    let Some(prior) = prior else {
        return Ok(());
    };
    let resource = format!("bucket {}", decl.name);

    if prior.object_locking != decl.object_locking {
        return Err(ApplyError::Immutable {
            resource,
            field: "object_locking",
            declared: decl.object_locking.to_string(),
            actual: prior.object_locking.to_string(),
        });
    }
    if prior.region != decl.region {
        let show = |r: &Option<String>| r.clone().unwrap_or_else(|| "default".to_string());
        return Err(ApplyError::Immutable {
            resource,
            field: "region",
            declared: show(&decl.region),
            actual: show(&prior.region),
        });
    }
    Ok(())
}

impl<'a> BucketHandler<'a> {
    pub fn new(ctx: &'a HandlerContext) -> Self {
        Self { ctx }
    }

    pub async fn plan(
        &self,
        decl: &BucketDecl,
        prior: Option<&ObservedBucket>,
    ) -> Result<Planned, ApplyError> {
        let admin = &self.ctx.admin;
        if !admin.bucket_exists(&decl.name).await? {
            return Ok(Some(Change::Create));
        }
        check_immutable(decl, prior)?;

        let current = admin.get_bucket_lifecycle(&decl.name).await?.unwrap_or_default();
        let changes = lifecycle_changes(&current, &decl.lifecycle_config());
        Ok((!changes.is_empty()).then_some(Change::Update(changes)))
    }

    /// Converge one bucket on its declaration.
    pub async fn apply(
        &self,
        decl: &BucketDecl,
        prior: Option<&ObservedBucket>,
    ) -> Result<Applied<ObservedBucket>, ApplyError> {
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
        decl: &BucketDecl,
        prior: Option<&ObservedBucket>,
        warnings: &mut Vec<String>,
    ) -> Result<(ObservedBucket, Action), ApplyError> {
        let admin = &self.ctx.admin;
        let name = decl.name.as_str();

        let mut action = if admin.bucket_exists(name).await? {
            check_immutable(decl, prior)?;
            Action::Unchanged
        } else {
            admin.make_bucket(&decl.spec()).await?;
            info!(bucket = %name, object_locking = decl.object_locking, "Bucket created");
            warnings.extend(self.ctx.wait_visible(ProbeTarget::Bucket(name.to_string())).await?);
            Action::Created
        };

        let desired = decl.lifecycle_config();
        let current = admin.get_bucket_lifecycle(name).await?.unwrap_or_default();
        if current != desired {
            admin.set_bucket_lifecycle(name, &desired).await?;
            info!(bucket = %name, rules = desired.rules.len(), "Bucket lifecycle set");
            action = action.or_updated();
        }

        debug!(bucket = %name, action = %action, "Bucket applied");
        let observed = ObservedBucket {
            name: name.to_string(),
            region: decl.region.clone(),
            object_locking: decl.object_locking,
            lifecycle_rules: desired.rules.iter().map(|r| r.id.clone()).collect(),
            applied_at: Utc::now(),
        };
        Ok((observed, action))
    }

    /// Remove a bucket dropped from the manifest. The cluster refuses to
    /// remove a bucket that still holds objects.
    pub async fn delete(&self, observed: &ObservedBucket) -> Result<(), ApplyError> {
        match optional(self.ctx.admin.remove_bucket(&observed.name).await)? {
            Some(()) => info!(bucket = %observed.name, "Bucket removed"),
            None => debug!(bucket = %observed.name, "Bucket already gone"),
        }
        Ok(())
    }
}
