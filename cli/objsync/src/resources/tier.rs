//! Remote tier lifecycle: add if absent, otherwise rotate credentials.

use chrono::Utc;
use objsync_admin::{TierCredentials, TierInfo};
use tracing::{debug, info};

use super::{optional, Action, Applied, ApplyError, Change, HandlerContext, Planned};
use crate::manifest::TierDecl;
use crate::state::{secret_hash, ObservedTier};

pub struct TierHandler<'a> {
    ctx: &'a HandlerContext,
}

fn credentials_hash(credentials: &TierCredentials) -> String {
    secret_hash(&format!("{}:{}", credentials.access_key, credentials.secret_key))
}

/// Only credentials can change on an existing tier.
fn check_immutable(declared: &TierInfo, actual: &TierInfo) -> Result<(), ApplyError> {
    let show = |v: &Option<String>| v.clone().unwrap_or_default();
    let fields = [
        ("type", declared.tier_type.to_string(), actual.tier_type.to_string()),
        ("endpoint", declared.endpoint.clone(), actual.endpoint.clone()),
        ("bucket", declared.bucket.clone(), actual.bucket.clone()),
        ("prefix", show(&declared.prefix), show(&actual.prefix)),
        ("region", show(&declared.region), show(&actual.region)),
    ];

    match fields.into_iter().find(|(_, d, a)| d != a) {
        Some((field, declared_value, actual_value)) => Err(ApplyError::Immutable {
            resource: format!("tier {}", declared.name),
            field,
            declared: declared_value,
            actual: actual_value,
        }),
        None => Ok(()),
    }
}

impl<'a> TierHandler<'a> {
    pub fn new(ctx: &'a HandlerContext) -> Self {
        Self { ctx }
    }

    async fn find(&self, name: &str) -> Result<Option<TierInfo>, ApplyError> {
        let tiers = self.ctx.admin.list_tiers().await?;
        Ok(tiers.into_iter().find(|t| t.name == name))
    }

    pub async fn plan(
        &self,
        decl: &TierDecl,
        prior: Option<&ObservedTier>,
    ) -> Result<Planned, ApplyError> {
        let config = decl.to_config()?;
        let Some(actual) = self.find(&decl.name).await? else {
            return Ok(Some(Change::Create));
        };
        check_immutable(&config.info, &actual)?;

        let hash = credentials_hash(&config.credentials);
        if prior.map_or(true, |p| p.credentials_hash != hash) {
            return Ok(Some(Change::Update(vec!["credentials".to_string()])));
        }
        Ok(None)
    }

    /// Converge one tier on its declaration.
    pub async fn apply(
        &self,
        decl: &TierDecl,
        prior: Option<&ObservedTier>,
    ) -> Result<Applied<ObservedTier>, ApplyError> {
        let admin = &self.ctx.admin;
        let config = decl.to_config()?;
        let hash = credentials_hash(&config.credentials);

        let action = match self.find(&decl.name).await? {
            None => {
                admin.add_tier(&config).await?;
                info!(tier = %decl.name, tier_type = %decl.tier_type, "Tier added");
                Action::Created
            }
            Some(actual) => {
                check_immutable(&config.info, &actual)?;
                if prior.map_or(true, |p| p.credentials_hash != hash) {
                    admin
                        .edit_tier_credentials(&decl.name, &config.credentials)
                        .await?;
                    info!(tier = %decl.name, "Tier credentials rotated");
                    Action::Updated
                } else {
                    Action::Unchanged
                }
            }
        };

        debug!(tier = %decl.name, action = %action, "Tier applied");
        Ok(Applied::new(
            ObservedTier {
                info: config.info,
                credentials_hash: hash,
                applied_at: Utc::now(),
            },
            action,
        ))
    }

    /// Remove a tier dropped from the manifest.
    pub async fn delete(&self, observed: &ObservedTier) -> Result<(), ApplyError> {
        let name = &observed.info.name;
        match optional(self.ctx.admin.remove_tier(name).await)? {
            Some(()) => info!(tier = %name, "Tier removed"),
            None => debug!(tier = %name, "Tier already gone"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use objsync_admin::{MemoryAdmin, TierType};
    use objsync_reconcile::{CancelSignal, RetryPolicy};

    use super::*;

    fn ctx(admin: Arc<MemoryAdmin>) -> HandlerContext {
        HandlerContext::new(admin, RetryPolicy::default(), CancelSignal::never())
    }

    fn decl(secret: &str) -> TierDecl {
        TierDecl {
            name: "WARM".to_string(),
            tier_type: TierType::S3,
            endpoint: "https://s3.amazonaws.com".to_string(),
            bucket: "archive".to_string(),
            prefix: None,
            region: None,
            access_key: "AKIA".to_string(),
            secret_key: secret.into(),
        }
    }

    #[tokio::test]
    async fn test_add_then_unchanged() {
        let admin = Arc::new(MemoryAdmin::new());
        let ctx = ctx(admin.clone());
        let handler = TierHandler::new(&ctx);

        let first = handler.apply(&decl("secret-1"), None).await.unwrap();
        assert_eq!(first.action, Action::Created);

        let second = handler
            .apply(&decl("secret-1"), Some(&first.observed))
            .await
            .unwrap();
        assert_eq!(second.action, Action::Unchanged);
        assert_eq!(admin.calls(), vec!["add_tier WARM"]);
    }

    #[tokio::test]
    async fn test_changed_secret_rotates_credentials() {
        let admin = Arc::new(MemoryAdmin::new());
        let ctx = ctx(admin.clone());
        let handler = TierHandler::new(&ctx);
        let first = handler.apply(&decl("secret-1"), None).await.unwrap();

        assert_eq!(
            handler.plan(&decl("secret-2"), Some(&first.observed)).await.unwrap(),
            Some(Change::Update(vec!["credentials".to_string()]))
        );

        let second = handler
            .apply(&decl("secret-2"), Some(&first.observed))
            .await
            .unwrap();
        assert_eq!(second.action, Action::Updated);
        assert_eq!(admin.tier_credentials("WARM").unwrap().secret_key, "secret-2");
        assert_ne!(second.observed.credentials_hash, first.observed.credentials_hash);
    }

    #[tokio::test]
    async fn test_endpoint_change_rejected() {
        let admin = Arc::new(MemoryAdmin::new());
        let ctx = ctx(admin.clone());
        let handler = TierHandler::new(&ctx);
        let first = handler.apply(&decl("secret-1"), None).await.unwrap();

        let mut moved = decl("secret-1");
        moved.endpoint = "https://storage.example.com".to_string();
        let err = handler.apply(&moved, Some(&first.observed)).await.unwrap_err();

        assert!(matches!(err, ApplyError::Immutable { field: "endpoint", .. }));
        assert_eq!(admin.calls(), vec!["add_tier WARM"]);
    }
}
