//! Identity provider lifecycle: validate, then set the config.

use std::collections::BTreeMap;

use chrono::Utc;
use objsync_admin::IdpConfig;
use tracing::{debug, info, warn};

use super::{optional, Action, Applied, ApplyError, Change, HandlerContext, Planned};
use crate::manifest::resolve_idp_secrets;
use crate::state::{secret_hash, ObservedIdp};

pub struct IdpHandler<'a> {
    ctx: &'a HandlerContext,
}

/// Hash of every secret entry, or `None` if the config carries no secrets.
fn secrets_hash(config: &IdpConfig) -> Option<String> {
    let secrets: Vec<String> = config
        .entries()
        .into_iter()
        .filter(|e| e.secret)
        .map(|e| format!("{}={}", e.key, e.value))
        .collect();
    (!secrets.is_empty()).then(|| secret_hash(&secrets.join("\n")))
}

fn entry_changes(current: &BTreeMap<String, String>, desired: &BTreeMap<String, String>) -> Vec<String> {
    let mut changes = Vec::new();
    for (key, value) in desired {
        match current.get(key) {
            None => changes.push(format!("+{key}")),
            Some(existing) if existing != value => changes.push(format!("~{key}")),
            Some(_) => {}
        }
    }
    for key in current.keys().filter(|k| !desired.contains_key(*k)) {
        changes.push(format!("-{key}"));
    }
    changes
}

impl<'a> IdpHandler<'a> {
    pub fn new(ctx: &'a HandlerContext) -> Self {
        Self { ctx }
    }

    /// Resolve secrets and validate; returns the config to send.
    fn prepare(decl: &IdpConfig) -> Result<IdpConfig, ApplyError> {
        let resolved = resolve_idp_secrets(decl)?;
        resolved.validate()?;
        Ok(resolved)
    }

    async fn changes(
        &self,
        config: &IdpConfig,
        prior: Option<&ObservedIdp>,
    ) -> Result<Option<Vec<String>>, ApplyError> {
        let current = optional(self.ctx.admin.get_idp_config(config.kind(), config.name()).await)?;
        let Some(current) = current else {
            return Ok(None);
        };

        let mut changes = entry_changes(&current.entries, &config.public_entries());
        let hash = secrets_hash(config);
        if hash.is_some() && prior.map(|p| &p.secret_hash) != Some(&hash) {
            changes.push("secrets".to_string());
        }
        Ok(Some(changes))
    }

    pub async fn plan(
        &self,
        decl: &IdpConfig,
        prior: Option<&ObservedIdp>,
    ) -> Result<Planned, ApplyError> {
        let config = Self::prepare(decl)?;
        Ok(match self.changes(&config, prior).await? {
            None => Some(Change::Create),
            Some(changes) if changes.is_empty() => None,
            Some(changes) => Some(Change::Update(changes)),
        })
    }

    /// Converge one identity provider on its declaration.
    pub async fn apply(
        &self,
        decl: &IdpConfig,
        prior: Option<&ObservedIdp>,
    ) -> Result<Applied<ObservedIdp>, ApplyError> {
        let config = Self::prepare(decl)?;
        let label = ObservedIdp::key(config.kind(), config.name());

        let action = match self.changes(&config, prior).await? {
            None => Action::Created,
            Some(changes) if changes.is_empty() => Action::Unchanged,
            Some(changes) => {
                debug!(idp = %label, changes = ?changes, "Identity provider differs");
                Action::Updated
            }
        };

        let mut warnings = Vec::new();
        if action != Action::Unchanged {
            let restart_required = self.ctx.admin.set_idp_config(&config).await?;
            info!(idp = %label, restart_required, "Identity provider configured");
            if restart_required {
                warn!(idp = %label, "Cluster restart required to apply identity provider change");
                warnings.push(format!(
                    "identity provider {label} changed; restart the cluster for it to take effect"
                ));
            }
        }

        Ok(Applied {
            observed: ObservedIdp {
                kind: config.kind(),
                name: config.name().to_string(),
                entries: config.public_entries(),
                secret_hash: secrets_hash(&config),
                applied_at: Utc::now(),
            },
            action,
            warnings,
        })
    }

    /// Remove an identity provider dropped from the manifest.
    pub async fn delete(&self, observed: &ObservedIdp) -> Result<(), ApplyError> {
        let label = ObservedIdp::key(observed.kind, &observed.name);
        match optional(
            self.ctx
                .admin
                .delete_idp_config(observed.kind, &observed.name)
                .await,
        )? {
            Some(()) => info!(idp = %label, "Identity provider removed"),
            None => debug!(idp = %label, "Identity provider already gone"),
        }
        Ok(())
    }
}
