//! # objsync-admin
//!
//! Admin API contracts for object-storage clusters.
//!
//! - [`AdminApi`]: the operations objsync needs (users, groups, buckets,
//!   lifecycle rules, tiers, identity providers)
//! - [`HttpAdminClient`]: JSON-over-HTTP implementation
//! - [`MemoryAdmin`]: in-memory cluster with simulated read-after-write lag
//!
//! Identity provider settings are typed ([`IdpConfig`]) and validated before
//! being rendered to the cluster's `key=value` form.

mod api;
mod error;
mod http;
mod idp;
mod memory;
mod types;

pub use api::AdminApi;
pub use error::{AdminError, Result};
pub use http::{AdminConfig, HttpAdminClient};
pub use idp::{IdpConfig, IdpConfigInfo, IdpKind, KvEntry, LdapConfig, OpenIdConfig, DEFAULT_IDP_NAME};
pub use memory::MemoryAdmin;
pub use types::*;
