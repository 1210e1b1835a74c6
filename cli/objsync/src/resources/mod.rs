//! Lifecycle handlers for managed entities.
//!
//! Each handler reads declared fields, issues the mutating admin calls,
//! waits for convergence where the cluster is eventually consistent, folds
//! relationship fields through the membership reconciler and returns the
//! observed fields to persist.

mod bucket;
mod group;
mod idp;
mod tier;
mod user;

use std::fmt;
use std::sync::Arc;

use objsync_admin::{AdminApi, AdminError};
use objsync_reconcile::{
    CancelSignal, ConvergenceWaiter, Delta, ReconcileError, RetryPolicy, WaitError,
};
use thiserror::Error;
use tracing::warn;

use crate::manifest::ManifestError;
use crate::relations::{ProbeTarget, Visibility};

pub use bucket::BucketHandler;
pub use group::GroupHandler;
pub use idp::IdpHandler;
pub use tier::TierHandler;
pub use user::UserHandler;

/// Errors from a single resource operation.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error(transparent)]
    Admin(#[from] AdminError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Wait(#[from] WaitError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// The declared value differs from a field the cluster cannot change.
    #[error("{resource}: {field} cannot be changed after creation (declared {declared}, actual {actual})")]
    Immutable {
        resource: String,
        field: &'static str,
        declared: String,
        actual: String,
    },

    /// A step failed after earlier steps raised consistency warnings.
    #[error("{source}")]
    WithWarnings {
        source: Box<ApplyError>,
        warnings: Vec<String>,
    },
}

impl ApplyError {
    /// Returns true if the operation was cancelled; the run must stop.
    pub fn is_cancelled(&self) -> bool {
        match self {
            ApplyError::Wait(e) => e.is_cancelled(),
            ApplyError::WithWarnings { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Attach the warnings raised before this error.
    pub fn with_warnings(self, mut warnings: Vec<String>) -> Self {
        if warnings.is_empty() {
            return self;
        }
        match self {
            ApplyError::WithWarnings {
                source,
                warnings: inner,
            } => {
                warnings.extend(inner);
                ApplyError::WithWarnings { source, warnings }
            }
            other => ApplyError::WithWarnings {
                source: Box::new(other),
                warnings,
            },
        }
    }

    /// Split into the underlying error and its warnings.
    pub fn into_parts(self) -> (ApplyError, Vec<String>) {
        match self {
            ApplyError::WithWarnings { source, warnings } => (*source, warnings),
            other => (other, Vec::new()),
        }
    }
}

/// What an apply did to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Created,
    Updated,
    Unchanged,
    Deleted,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Created => write!(f, "created"),
            Action::Updated => write!(f, "updated"),
            Action::Unchanged => write!(f, "unchanged"),
            Action::Deleted => write!(f, "deleted"),
        }
    }
}

impl Action {
    /// Record a change: an unchanged resource becomes updated.
    pub fn or_updated(self) -> Self {
        match self {
            Action::Unchanged => Action::Updated,
            other => other,
        }
    }
}

/// Result of applying one resource.
#[derive(Debug)]
pub struct Applied<T> {
    pub observed: T,
    pub action: Action,
    /// Consistency warnings, e.g. a resource that never became visible.
    pub warnings: Vec<String>,
}

impl<T> Applied<T> {
    pub fn new(observed: T, action: Action) -> Self {
        Self {
            observed,
            action,
            warnings: Vec::new(),
        }
    }
}

/// One planned change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Create,
    Update(Vec<String>),
    Delete,
}

/// Planned change for one resource. `None` means the resource is converged.
pub type Planned = Option<Change>;

/// Turn a not-found read into `None`.
pub(crate) fn optional<T>(result: Result<T, AdminError>) -> Result<Option<T>, AdminError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Plan lines for a membership delta, e.g. `groups +dev`.
pub(crate) fn describe_delta(field: &str, delta: &Delta) -> Vec<String> {
    let added = delta.to_add.iter().map(|t| format!("{field} +{t}"));
    let removed = delta.to_remove.iter().map(|t| format!("{field} -{t}"));
    added.chain(removed).collect()
}

/// Shared dependencies of every handler.
#[derive(Clone)]
pub struct HandlerContext {
    pub admin: Arc<dyn AdminApi>,
    pub waiter: ConvergenceWaiter,
    pub cancel: CancelSignal,
}

impl HandlerContext {
    pub fn new(admin: Arc<dyn AdminApi>, policy: RetryPolicy, cancel: CancelSignal) -> Self {
        Self {
            admin,
            waiter: ConvergenceWaiter::new(policy),
            cancel,
        }
    }

    /// Wait for a freshly created resource to become readable.
    ///
    /// Returns a warning when the wait exhausts its attempts; the caller
    /// carries on and reports it.
    pub async fn wait_visible(&self, target: ProbeTarget) -> Result<Option<String>, ApplyError> {
        let probe = Visibility::new(Arc::clone(&self.admin), target);
        let label = probe.label();
        let outcome = self
            .waiter
            .wait_until_visible(&self.cancel, &probe, &label)
            .await?;

        if outcome.found {
            return Ok(None);
        }

        warn!(label = %label, attempts = outcome.attempts, "Created resource is not visible yet");
        Ok(Some(format!(
            "{label} was created but is not visible after {} reads; later steps may fail until it propagates",
            outcome.attempts
        )))
    }
}
