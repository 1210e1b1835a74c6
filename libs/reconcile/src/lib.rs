//! Reconciliation and convergence primitives.
//!
//! This library holds the two pieces of objsync that converge remote cluster
//! state to declared state:
//!
//! - **Membership reconciliation**: make a remote many-to-many relationship
//!   (a user's groups, a group's members) match a desired set using the
//!   minimal add/remove calls.
//! - **Convergence waiting**: poll for the visibility of a resource after a
//!   mutating call, with exponential backoff and a retry ceiling.
//!
//! # Invariants
//!
//! - The current relationship set is read fresh on every reconciliation
//! - A target present in both desired and current state is never touched
//! - A probe error is never retried as "not yet visible"
//! - Neither component runs calls in parallel; every call is awaited in turn

mod cancel;
mod error;
mod membership;
mod waiter;

pub use cancel::{CancelHandle, CancelSignal};
pub use error::{BoxError, MemberFailure, MemberOp, ReconcileError, WaitError};
pub use membership::{Delta, MembershipReconciler, ReconcileReport, RelationshipStore};
pub use waiter::{
    probe_fn, ConvergenceWaiter, ExistenceProbe, FnProbe, RetryPolicy, RetryPolicyError,
    VisibilityOutcome,
};
