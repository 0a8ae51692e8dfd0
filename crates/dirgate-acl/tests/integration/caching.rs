//! Cache behavior seen through the engine.

use dirgate_acl::{AclEngine, StaticMembership};
use dirgate_core::{
    AttributeGroup, AttributeGroupName, AttributeSelector, DefinitionsBundle, Origin, PrincipalRef,
};
use dirgate_redis::MemoryCacheClient;
use dirgate_store::MemoryDefinitionStore;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

use crate::common::{ADMINS_BUNDLE, SCOPED_BUNDLE, SlowMembership, TestHarness, dept};

#[tokio::test(start_paused = true)]
async fn test_concurrent_misses_compile_once() {
    let alice = PrincipalRef::user("alice");
    let membership = Arc::new(SlowMembership::new(
        StaticMembership::from_pairs([(alice.clone(), vec![PrincipalRef::role("admins")])]),
        Duration::from_millis(100),
    ));
    let engine = AclEngine::builder()
        .store(Arc::new(MemoryDefinitionStore::new()))
        .cache_client(Arc::new(MemoryCacheClient::new()))
        .membership(membership.clone())
        .build();
    engine.start().await.unwrap();
    engine
        .registry()
        .sync(&DefinitionsBundle::from_json_str(ADMINS_BUNDLE).unwrap())
        .await
        .unwrap();

    let guard = engine.guard();
    let checks = (0..32).map(|_| guard.check(&alice, "user.delete", None));
    let decisions = join_all(checks).await;

    assert!(decisions.iter().all(|d| d.is_allowed()));
    assert_eq!(membership.calls(), 1);
    assert_eq!(engine.cache().stats().compiles, 1);
}

#[tokio::test]
async fn test_second_check_is_a_hit() {
    let harness = TestHarness::with_bundle(ADMINS_BUNDLE).await;
    let alice = PrincipalRef::user("alice");
    harness.join(&alice, &PrincipalRef::role("admins")).await;

    assert!(harness.allowed(&alice, "user.delete", None).await);
    assert!(harness.allowed(&alice, "user.delete", None).await);
    let stats = harness.engine.cache().stats();
    assert_eq!((stats.hits, stats.compiles), (1, 1));
    assert_eq!(harness.client.len().await, 2, "entry plus sync floor");
}

#[tokio::test]
async fn test_attribute_group_change_reaches_cached_acl() {
    let harness = TestHarness::with_bundle(SCOPED_BUNDLE).await;
    let carol = PrincipalRef::user("carol");
    harness.join(&carol, &PrincipalRef::group("eng-admins")).await;
    assert!(!harness.allowed(&carol, "user.delete", Some(&dept("engineering"))).await);

    harness
        .engine
        .admin()
        .update_attribute_group(
            "root",
            AttributeGroup {
                name: AttributeGroupName::new("dept-eng"),
                selector: AttributeSelector::Pattern(
                    [("dept".to_string(), "eng*".to_string())].into_iter().collect(),
                ),
                origin: Origin::Registry,
            },
        )
        .await
        .unwrap();

    assert!(harness.allowed(&carol, "user.delete", Some(&dept("engineering"))).await);
    assert!(harness.engine.cache().stats().evictions >= 1);
}

#[tokio::test]
async fn test_membership_change_needs_principal_invalidation() {
    let harness = TestHarness::with_bundle(ADMINS_BUNDLE).await;
    let bob = PrincipalRef::user("bob");
    assert!(!harness.allowed(&bob, "user.delete", None).await);

    harness.join(&bob, &PrincipalRef::role("admins")).await;
    // The cached table predates the membership change.
    assert!(!harness.allowed(&bob, "user.delete", None).await);

    assert!(harness.engine.cache().invalidate(&bob).await.unwrap());
    assert!(harness.allowed(&bob, "user.delete", None).await);
}

#[tokio::test]
async fn test_cache_outage_falls_back_to_direct_compile() {
    let harness = TestHarness::with_bundle(ADMINS_BUNDLE).await;
    let alice = PrincipalRef::user("alice");
    harness.join(&alice, &PrincipalRef::role("admins")).await;

    harness.client.fail_requests(true);
    assert!(harness.allowed(&alice, "user.delete", None).await);
    assert!(harness.allowed(&alice, "user.delete", None).await);

    let stats = harness.engine.cache().stats();
    assert_eq!(stats.compiles, 2, "nothing is cached while the cache is down");
    assert!(stats.cache_errors >= 2);
}

#[tokio::test]
async fn test_failed_invalidation_raises_floor() {
    let harness = TestHarness::with_bundle(ADMINS_BUNDLE).await;
    let alice = PrincipalRef::user("alice");
    harness.join(&alice, &PrincipalRef::role("admins")).await;
    assert!(harness.allowed(&alice, "user.delete", None).await);

    let before = harness.engine.cache().generation().floor();
    harness.client.fail_requests(true);
    let rev = harness
        .engine
        .admin()
        .create_permission("root", dirgate_core::PermissionKey::new("user.read_all"), "user")
        .await
        .unwrap();
    let floor = harness.engine.cache().generation().floor();
    assert!(floor > before);
    assert_eq!(floor, rev);

    // Back online: the old entry sits below the floor and is recompiled.
    harness.client.fail_requests(false);
    let compiles = harness.engine.cache().stats().compiles;
    assert!(harness.allowed(&alice, "user.delete", None).await);
    let stats = harness.engine.cache().stats();
    assert_eq!(stats.compiles, compiles + 1);
    assert!(stats.stale >= 1);
}
