//! End-to-end decision scenarios.

use dirgate_core::{AssignmentKey, Effect, PermissionKey, Policy, PolicyName, PrincipalRef, Rule};

use crate::common::{ADMINS_BUNDLE, SCOPED_BUNDLE, TestHarness, dept};

#[tokio::test]
async fn test_role_member_allowed_non_member_denied() {
    let harness = TestHarness::with_bundle(ADMINS_BUNDLE).await;
    let alice = PrincipalRef::user("alice");
    let bob = PrincipalRef::user("bob");
    harness.join(&alice, &PrincipalRef::role("admins")).await;

    assert!(harness.allowed(&alice, "user.delete", None).await);
    assert!(!harness.allowed(&bob, "user.delete", None).await);
    // Declared but never granted.
    assert!(!harness.allowed(&alice, "user.read", None).await);
}

#[tokio::test]
async fn test_added_deny_policy_overrides_allow() {
    let harness = TestHarness::with_bundle(ADMINS_BUNDLE).await;
    let alice = PrincipalRef::user("alice");
    harness.join(&alice, &PrincipalRef::role("admins")).await;
    assert!(harness.allowed(&alice, "user.delete", None).await);

    let admin = harness.engine.admin();
    let restrict = Policy::new(
        PolicyName::new("restrict-delete"),
        Some("Freeze deletions".into()),
        vec![Rule {
            effect: Effect::Deny,
            permissions: [PermissionKey::new("user.delete")].into_iter().collect(),
            attribute_group: None,
            priority: 1,
        }],
        dirgate_core::Origin::Admin,
    )
    .unwrap();
    admin.create_policy("root", restrict).await.unwrap();
    admin
        .create_assignment(
            "root",
            AssignmentKey::new(
                PrincipalRef::role("admins"),
                PolicyName::new("restrict-delete"),
            ),
        )
        .await
        .unwrap();

    let decision = harness
        .engine
        .guard()
        .check(&alice, "user.delete", None)
        .await;
    assert_eq!(decision.effect, Effect::Deny);
}

#[tokio::test]
async fn test_scoped_grant_follows_resource_attributes() {
    let harness = TestHarness::with_bundle(SCOPED_BUNDLE).await;
    let carol = PrincipalRef::user("carol");
    harness.join(&carol, &PrincipalRef::group("eng-admins")).await;

    assert!(harness.allowed(&carol, "user.delete", Some(&dept("eng"))).await);
    assert!(!harness.allowed(&carol, "user.delete", Some(&dept("sales"))).await);
    assert!(!harness.allowed(&carol, "user.delete", None).await);
}

#[tokio::test]
async fn test_nested_group_membership_grants() {
    let harness = TestHarness::with_bundle(SCOPED_BUNDLE).await;
    let dana = PrincipalRef::user("dana");
    let platform = PrincipalRef::group("platform");
    harness.join(&dana, &platform).await;
    harness.join(&platform, &PrincipalRef::group("eng-admins")).await;

    assert!(harness.allowed(&dana, "user.delete", Some(&dept("eng"))).await);
}

#[tokio::test]
async fn test_undeclared_permission_denied() {
    let harness = TestHarness::with_bundle(ADMINS_BUNDLE).await;
    let alice = PrincipalRef::user("alice");
    harness.join(&alice, &PrincipalRef::role("admins")).await;
    assert!(!harness.allowed(&alice, "user.obliterate", None).await);
    assert_eq!(harness.engine.cache().stats().compiles, 0);
}
