//! objsync - declarative state synchronizer for object-storage clusters.
//!
//! A manifest declares users, groups, buckets, remote tiers and identity
//! providers. `apply` converges the cluster on it:
//!
//! - **Handlers** ([`resources`]): one lifecycle per entity kind, creating,
//!   waiting for read-after-write visibility and reconciling memberships
//! - **Applier** ([`apply`]): runs the handlers in dependency order and
//!   prunes entities dropped from the manifest
//! - **Observed state** ([`state`]): what the last run converged, persisted
//!   as JSON between runs

pub mod apply;
pub mod commands;
pub mod config;
pub mod error;
pub mod manifest;
pub mod output;
pub mod relations;
pub mod resources;
pub mod state;
