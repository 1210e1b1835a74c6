//! Set-difference reconciliation of membership relationships.
//!
//! A subject (a user, a group) belongs to a set of targets (groups, users).
//! The reconciler reads the current set, computes the [`Delta`] against the
//! desired set and applies only that delta.

use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{BoxError, MemberFailure, MemberOp, ReconcileError};

/// Remote store of a membership relationship.
///
/// Errors are opaque: the reconciler only distinguishes success from failure.
#[async_trait]
pub trait RelationshipStore: Send + Sync {
    /// Fetch the authoritative current target set for a subject.
    async fn fetch_current(&self, subject: &str) -> Result<BTreeSet<String>, BoxError>;

    /// Add the subject to a target.
    async fn add_member(&self, subject: &str, target: &str) -> Result<(), BoxError>;

    /// Remove the subject from a target.
    async fn remove_member(&self, subject: &str, target: &str) -> Result<(), BoxError>;
}

#[async_trait]
impl<S: RelationshipStore + ?Sized> RelationshipStore for &S {
    async fn fetch_current(&self, subject: &str) -> Result<BTreeSet<String>, BoxError> {
        (**self).fetch_current(subject).await
    }

    async fn add_member(&self, subject: &str, target: &str) -> Result<(), BoxError> {
        (**self).add_member(subject, target).await
    }

    async fn remove_member(&self, subject: &str, target: &str) -> Result<(), BoxError> {
        (**self).remove_member(subject, target).await
    }
}

/// The add/remove operations needed to turn a current set into a desired set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    /// desired − current
    pub to_add: BTreeSet<String>,

    /// current − desired
    pub to_remove: BTreeSet<String>,
}

impl Delta {
    /// Compute the delta from `current` to `desired`.
    pub fn compute(desired: &BTreeSet<String>, current: &BTreeSet<String>) -> Self {
        Self {
            to_add: desired.difference(current).cloned().collect(),
            to_remove: current.difference(desired).cloned().collect(),
        }
    }

    /// Returns true if no call is needed.
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// Total number of calls this delta issues.
    pub fn len(&self) -> usize {
        self.to_add.len() + self.to_remove.len()
    }

    /// Apply the delta to a set locally.
    pub fn apply_to(&self, current: &BTreeSet<String>) -> BTreeSet<String> {
        current
            .iter()
            .filter(|t| !self.to_remove.contains(*t))
            .chain(self.to_add.iter())
            .cloned()
            .collect()
    }
}

/// Result of a fully successful reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Targets the subject was added to.
    pub added: Vec<String>,

    /// Targets the subject was removed from.
    pub removed: Vec<String>,
}

impl ReconcileReport {
    /// Returns true if nothing was changed.
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Reconciler for one kind of membership relationship.
pub struct MembershipReconciler<S> {
    store: S,
}

impl<S: RelationshipStore> MembershipReconciler<S> {
    /// Create a reconciler over a relationship store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Read the current set and compute the delta without applying it.
    pub async fn plan(
        &self,
        subject: &str,
        desired: &BTreeSet<String>,
    ) -> Result<Delta, ReconcileError> {
        let current = self
            .store
            .fetch_current(subject)
            .await
            .map_err(|source| ReconcileError::Read {
                subject: subject.to_string(),
                source,
            })?;

        Ok(Delta::compute(desired, &current))
    }

    /// Make the subject's memberships equal `desired`.
    ///
    /// A failed read aborts before any mutation. A failed add/remove is
    /// recorded and the remaining calls still run; the error lists every
    /// failed target. Nothing is retried here.
    pub async fn reconcile(
        &self,
        subject: &str,
        desired: &BTreeSet<String>,
    ) -> Result<ReconcileReport, ReconcileError> {
        let delta = self.plan(subject, desired).await?;

        if delta.is_empty() {
            debug!(subject = %subject, "Memberships already converged");
            return Ok(ReconcileReport::default());
        }

        debug!(
            subject = %subject,
            to_add = delta.to_add.len(),
            to_remove = delta.to_remove.len(),
            "Applying membership delta"
        );

        let mut report = ReconcileReport::default();
        let mut failures = Vec::new();

        for target in &delta.to_add {
            match self.store.add_member(subject, target).await {
                Ok(()) => report.added.push(target.clone()),
                Err(source) => {
                    warn!(subject = %subject, target = %target, error = %source, "Failed to add membership");
                    failures.push(MemberFailure {
                        target: target.clone(),
                        op: MemberOp::Add,
                        source,
                    });
                }
            }
        }

        for target in &delta.to_remove {
            match self.store.remove_member(subject, target).await {
                Ok(()) => report.removed.push(target.clone()),
                Err(source) => {
                    warn!(subject = %subject, target = %target, error = %source, "Failed to remove membership");
                    failures.push(MemberFailure {
                        target: target.clone(),
                        op: MemberOp::Remove,
                        source,
                    });
                }
            }
        }

        if !failures.is_empty() {
            let applied = report
                .added
                .into_iter()
                .map(|t| (MemberOp::Add, t))
                .chain(report.removed.into_iter().map(|t| (MemberOp::Remove, t)))
                .collect();
            return Err(ReconcileError::PartialApply {
                subject: subject.to_string(),
                failures,
                applied,
            });
        }

        info!(
            subject = %subject,
            added = report.added.len(),
            removed = report.removed.len(),
            "Memberships reconciled"
        );

        Ok(report)
    }
}
