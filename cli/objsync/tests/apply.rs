//! End-to-end apply runs against the in-memory cluster.

use std::collections::BTreeSet;
use std::sync::Arc;

use objsync::apply::{Applier, ResourceKind};
use objsync::manifest::Manifest;
use objsync::resources::{Action, Change, HandlerContext};
use objsync::state::ObservedState;
use objsync_admin::{AccountStatus, AdminApi, IdpKind, MemoryAdmin};
use objsync_reconcile::{CancelSignal, RetryPolicy};

const MANIFEST: &str = r#"
[[users]]
access_key = "alice"
secret_key = "password123"
groups = ["dev", "ops"]

[[users]]
access_key = "bob"
secret_key = "password456"
status = "disabled"
groups = ["ops"]

[[groups]]
name = "ops"
members = ["alice", "bob"]

[[groups]]
name = "dev"

[[buckets]]
name = "logs"
object_locking = true

[[buckets.lifecycle]]
id = "expire-old"
expiration_days = 30

[[tiers]]
name = "WARM"
type = "s3"
endpoint = "https://s3.amazonaws.com"
bucket = "archive"
access_key = "AKIA"
secret_key = "tier-secret"

[[identity_providers]]
type = "openid"
config_url = "https://id.example.com/.well-known/openid-configuration"
client_id = "objsync"
client_secret = "oidc-secret"
"#;

fn applier(admin: &Arc<MemoryAdmin>) -> Applier {
    Applier::new(HandlerContext::new(
        admin.clone(),
        RetryPolicy::default(),
        CancelSignal::never(),
    ))
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test(start_paused = true)]
async fn test_full_apply_against_lagging_cluster() {
    let admin = Arc::new(MemoryAdmin::with_read_lag(2));
    let manifest = Manifest::from_toml_str(MANIFEST).unwrap();
    let mut state = ObservedState::default();

    let report = applier(&admin).apply(&manifest, &mut state).await;
    assert!(report.is_success(), "{report:?}");

    // Only the identity provider warns: a restart is required.
    let warnings: Vec<_> = report.warnings().map(|(r, _)| r.kind).collect();
    assert_eq!(warnings, vec![ResourceKind::IdentityProvider]);

    let alice = admin.get_user("alice").await.unwrap();
    assert_eq!(alice.member_of, set(&["dev", "ops"]));
    let bob = admin.get_user("bob").await.unwrap();
    assert_eq!(bob.status, AccountStatus::Disabled);
    assert_eq!(admin.get_group("ops").await.unwrap().members, set(&["alice", "bob"]));
    assert!(admin.get_bucket_lifecycle("logs").await.unwrap().is_some());
    assert_eq!(admin.tier_credentials("WARM").unwrap().secret_key, "tier-secret");
    assert_eq!(
        admin.get_idp_config(IdpKind::OpenId, "_").await.unwrap().entries["client_id"],
        "objsync"
    );

    assert_eq!(state.users.len(), 2);
    assert_eq!(state.groups.len(), 2);
    assert!(state.identity_providers.contains_key("openid/_"));
}

#[tokio::test(start_paused = true)]
async fn test_second_apply_from_saved_state_issues_no_calls() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let admin = Arc::new(MemoryAdmin::with_read_lag(1));
    let manifest = Manifest::from_toml_str(MANIFEST).unwrap();

    let mut state = ObservedState::default();
    let first = applier(&admin).apply(&manifest, &mut state).await;
    assert!(first.is_success(), "{first:?}");
    state.save(&path).unwrap();
    let calls = admin.calls();

    let mut reloaded = ObservedState::load(&path).unwrap();
    assert!(applier(&admin).plan(&manifest, &reloaded).await.is_empty());

    let second = applier(&admin).apply(&manifest, &mut reloaded).await;
    assert!(second.is_success(), "{second:?}");
    assert_eq!(second.count(Action::Unchanged), 7);
    assert_eq!(admin.calls(), calls);
}

#[tokio::test]
async fn test_partial_membership_failure_then_recovery() {
    let admin = Arc::new(MemoryAdmin::new());
    admin.fail_on("update_group_members", "dev/alice");
    let manifest = Manifest::from_toml_str(MANIFEST).unwrap();
    let mut state = ObservedState::default();

    let report = applier(&admin).apply(&manifest, &mut state).await;

    let failed: Vec<_> = report.failures().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].name, "alice");
    let error = failed[0].outcome.as_ref().unwrap_err();
    assert!(error.contains("1 of 2"), "{error}");
    assert!(error.contains("dev"), "{error}");
    // The other membership change went through.
    assert!(admin.get_user("alice").await.unwrap().member_of.contains("ops"));
    assert!(!state.users.contains_key("alice"));
    assert!(state.users.contains_key("bob"));

    admin.clear_failures();
    let retry = applier(&admin).apply(&manifest, &mut state).await;
    assert!(retry.is_success(), "{retry:?}");
    assert_eq!(admin.get_user("alice").await.unwrap().member_of, set(&["dev", "ops"]));
}

#[tokio::test]
async fn test_env_secret_rotation() {
    std::env::set_var("OBJSYNC_IT_ROTATED_SECRET", "password-one");
    let manifest = Manifest::from_toml_str(
        r#"
[[users]]
access_key = "carol"
secret_key = "env:OBJSYNC_IT_ROTATED_SECRET"
"#,
    )
    .unwrap();
    let admin = Arc::new(MemoryAdmin::new());
    let mut state = ObservedState::default();

    applier(&admin).apply(&manifest, &mut state).await;
    assert_eq!(admin.user_secret("carol").as_deref(), Some("password-one"));
    assert!(!serde_json::to_string(&state).unwrap().contains("password-one"));

    std::env::set_var("OBJSYNC_IT_ROTATED_SECRET", "password-two");
    let plan = applier(&admin).plan(&manifest, &state).await;
    assert_eq!(plan.changes.len(), 1);
    assert_eq!(plan.changes[0].change, Change::Update(vec!["secret_key".to_string()]));

    let report = applier(&admin).apply(&manifest, &mut state).await;
    assert_eq!(report.count(Action::Updated), 1);
    assert_eq!(admin.user_secret("carol").as_deref(), Some("password-two"));
}

#[tokio::test]
async fn test_dropping_resources_prunes_them() {
    let admin = Arc::new(MemoryAdmin::new());
    let mut state = ObservedState::default();
    applier(&admin)
        .apply(&Manifest::from_toml_str(MANIFEST).unwrap(), &mut state)
        .await;

    let mut smaller = Manifest::from_toml_str(MANIFEST).unwrap();
    smaller.buckets.clear();
    smaller.tiers.clear();
    smaller.identity_providers.clear();

    let report = applier(&admin).apply(&smaller, &mut state).await;
    assert!(report.is_success(), "{report:?}");
    assert_eq!(report.count(Action::Deleted), 3);
    assert!(!admin.bucket_exists("logs").await.unwrap());
    assert!(admin.list_tiers().await.unwrap().is_empty());
    assert!(admin
        .get_idp_config(IdpKind::OpenId, "_")
        .await
        .unwrap_err()
        .is_not_found());
    assert!(state.buckets.is_empty() && state.tiers.is_empty());
}
