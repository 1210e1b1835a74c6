//! Error types for reconciliation and convergence waiting.

use std::fmt;

use thiserror::Error;

/// Opaque error returned by collaborators (relationship stores, probes).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Which half of a delta a failed call belonged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberOp {
    Add,
    Remove,
}

impl fmt::Display for MemberOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberOp::Add => write!(f, "add"),
            MemberOp::Remove => write!(f, "remove"),
        }
    }
}

/// A single add/remove call that failed during reconciliation.
#[derive(Debug)]
pub struct MemberFailure {
    /// The target the call was issued for.
    pub target: String,

    /// Whether the call was an add or a remove.
    pub op: MemberOp,

    /// Underlying store error.
    pub source: BoxError,
}

impl fmt::Display for MemberFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.op, self.target, self.source)
    }
}

/// Membership reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Reading the current relationship set failed. No mutation was attempted.
    #[error("failed to read current memberships of {subject}: {source}")]
    Read {
        subject: String,
        #[source]
        source: BoxError,
    },

    /// One or more add/remove calls failed. Successful calls are not rolled back.
    #[error("{} of {} membership changes failed for {subject}: {}", failures.len(), failures.len() + applied.len(), join_failures(failures))]
    PartialApply {
        subject: String,
        /// Every call that failed, in the order it was issued.
        failures: Vec<MemberFailure>,
        /// Targets whose add/remove succeeded.
        applied: Vec<(MemberOp, String)>,
    },
}

impl ReconcileError {
    /// Returns true if the baseline read failed.
    pub fn is_read_failure(&self) -> bool {
        matches!(self, ReconcileError::Read { .. })
    }

    /// Failed calls, empty for read failures.
    pub fn failures(&self) -> &[MemberFailure] {
        match self {
            ReconcileError::Read { .. } => &[],
            ReconcileError::PartialApply { failures, .. } => failures,
        }
    }

    /// Targets of failed calls for the given operation, so a caller can retry
    /// only that subset.
    pub fn failed_targets(&self, op: MemberOp) -> Vec<&str> {
        self.failures()
            .iter()
            .filter(|f| f.op == op)
            .map(|f| f.target.as_str())
            .collect()
    }
}

fn join_failures(failures: &[MemberFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convergence waiting errors.
///
/// Exhaustion is not an error: it is reported as `found = false`.
#[derive(Debug, Error)]
pub enum WaitError {
    /// The existence probe itself failed.
    #[error("probe for {label} failed on attempt {attempt}: {source}")]
    Probe {
        label: String,
        attempt: u32,
        #[source]
        source: BoxError,
    },

    /// The wait was cancelled before completion.
    #[error("wait for {label} cancelled after {attempts} attempts")]
    Cancelled { label: String, attempts: u32 },
}

impl WaitError {
    /// Returns true if the wait was cancelled externally.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WaitError::Cancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_apply_lists_every_failure() {
        let err = ReconcileError::PartialApply {
            subject: "alice".to_string(),
            failures: vec![
                MemberFailure {
                    target: "ops".to_string(),
                    op: MemberOp::Add,
                    source: "boom".into(),
                },
                MemberFailure {
                    target: "legacy".to_string(),
                    op: MemberOp::Remove,
                    source: "denied".into(),
                },
            ],
            applied: vec![(MemberOp::Add, "dev".to_string())],
        };

        let msg = err.to_string();
        assert!(msg.starts_with("2 of 3 membership changes failed for alice"));
        assert!(msg.contains("add ops: boom"));
        assert!(msg.contains("remove legacy: denied"));
        assert_eq!(err.failed_targets(MemberOp::Add), vec!["ops"]);
        assert_eq!(err.failed_targets(MemberOp::Remove), vec!["legacy"]);
        assert!(!err.is_read_failure());
    }

    #[test]
    fn read_failure_has_no_member_failures() {
        let err = ReconcileError::Read {
            subject: "alice".to_string(),
            source: "timeout".into(),
        };
        assert!(err.is_read_failure());
        assert!(err.failures().is_empty());
    }
}
