//! Bundle synchronization through the engine.

use dirgate_acl::{AclEngine, AclError, ProtectionReason, REGISTRY_ACTOR};
use dirgate_core::{
    AssignmentKey, DefinitionId, DefinitionsBundle, PermissionKey, PolicyName, PrincipalRef,
};
use dirgate_store::{AuditAction, DefinitionStore, MemoryAuditSink};
use std::sync::Arc;

use crate::common::{ADMINS_BUNDLE, ReadFailingStore, TestHarness};

const WITHOUT_READ: &str = r#"{
    "permissions": [
        {"key": "user.delete", "category": "user"}
    ],
    "policies": [
        {
            "name": "admins-policy",
            "rules": [{"effect": "allow", "permissions": ["user.delete"], "priority": 1}]
        }
    ],
    "assignments": [
        {"principal_type": "role", "principal_id": "admins", "policy": "admins-policy", "builtin": true}
    ]
}"#;

const WITHOUT_ASSIGNMENT: &str = r#"{
    "permissions": [
        {"key": "user.delete", "category": "user"},
        {"key": "user.read", "category": "user"}
    ],
    "policies": [
        {
            "name": "admins-policy",
            "rules": [{"effect": "allow", "permissions": ["user.delete"], "priority": 1}]
        }
    ]
}"#;

#[tokio::test]
async fn test_resync_is_idempotent() {
    let harness = TestHarness::new().await;
    let first = harness.sync(ADMINS_BUNDLE).await;
    assert!(first.changed());
    assert_eq!(first.created, 4);
    let audited = harness.audit.len().await;
    assert_eq!(audited, 4);

    let second = harness.sync(ADMINS_BUNDLE).await;
    assert!(!second.changed());
    assert_eq!(second.revision, first.revision);
    assert_eq!(harness.audit.len().await, audited);
    assert_eq!(harness.store.revision().await.unwrap(), first.revision);
}

#[tokio::test]
async fn test_sync_records_registry_actor() {
    let harness = TestHarness::with_bundle(ADMINS_BUNDLE).await;
    let records = harness.audit.records().await;
    assert!(records.iter().all(|r| r.actor == REGISTRY_ACTOR));
    assert!(records.iter().all(|r| r.action == AuditAction::Create));
    assert!(records.iter().all(|r| r.before.is_none() && r.after.is_some()));
}

#[tokio::test]
async fn test_dropped_permission_is_pruned() {
    let harness = TestHarness::with_bundle(ADMINS_BUNDLE).await;
    let alice = PrincipalRef::user("alice");
    harness.join(&alice, &PrincipalRef::role("admins")).await;

    let report = harness.sync(WITHOUT_READ).await;
    assert_eq!(report.pruned, 1);
    assert!(report.retained.is_empty());

    let snapshot = harness.store.snapshot().await.unwrap();
    assert!(
        !snapshot
            .definitions
            .permissions
            .contains_key(&PermissionKey::new("user.read"))
    );
    // Undeclared now, so denied without compiling.
    assert!(!harness.allowed(&alice, "user.read", None).await);
    assert!(harness.allowed(&alice, "user.delete", None).await);
}

#[tokio::test]
async fn test_permission_referenced_by_admin_policy_is_retained() {
    let harness = TestHarness::with_bundle(ADMINS_BUNDLE).await;
    let admin = harness.engine.admin();
    admin
        .create_policy(
            "root",
            dirgate_core::Policy::new(
                PolicyName::new("readers"),
                None,
                vec![dirgate_core::Rule {
                    effect: dirgate_core::Effect::Allow,
                    permissions: [PermissionKey::new("user.read")].into_iter().collect(),
                    attribute_group: None,
                    priority: 1,
                }],
                dirgate_core::Origin::Admin,
            )
            .unwrap(),
        )
        .await
        .unwrap();

    let report = harness.sync(WITHOUT_READ).await;
    assert_eq!(report.pruned, 0);
    assert_eq!(
        report.retained,
        vec![DefinitionId::Permission(PermissionKey::new("user.read"))]
    );
}

#[tokio::test]
async fn test_builtin_assignment_resists_admin_but_not_its_bundle() {
    let harness = TestHarness::with_bundle(ADMINS_BUNDLE).await;
    let alice = PrincipalRef::user("alice");
    harness.join(&alice, &PrincipalRef::role("admins")).await;
    assert!(harness.allowed(&alice, "user.delete", None).await);

    let key = AssignmentKey::new(
        PrincipalRef::role("admins"),
        PolicyName::new("admins-policy"),
    );
    let err = harness
        .engine
        .admin()
        .delete_assignment("root", &key)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        AclError::BuiltinProtection {
            target: DefinitionId::Assignment(key.clone()).to_string(),
            reason: ProtectionReason::Builtin,
        }
    );

    // The bundle withdraws the grant but keeps the policy.
    let report = harness.sync(WITHOUT_ASSIGNMENT).await;
    assert_eq!(report.pruned, 1);
    assert!(report.retained.is_empty());

    let snapshot = harness.store.snapshot().await.unwrap();
    assert!(!snapshot.definitions.assignments.contains_key(&key));
    assert!(
        snapshot
            .definitions
            .policies
            .contains_key(&PolicyName::new("admins-policy"))
    );
    let records = harness.audit.records().await;
    assert!(records.iter().any(|r| r.action == AuditAction::Prune
        && r.target == DefinitionId::Assignment(key.clone())));
    assert!(!harness.allowed(&alice, "user.delete", None).await);
}

#[tokio::test]
async fn test_invalid_bundle_leaves_store_unchanged() {
    let harness = TestHarness::with_bundle(ADMINS_BUNDLE).await;
    let revision = harness.store.revision().await.unwrap();
    let broken = DefinitionsBundle::from_json_str(
        r#"{
            "policies": [
                {"name": "p", "rules": [{"effect": "allow", "permissions": ["user.nuke"], "priority": 1}]}
            ]
        }"#,
    )
    .unwrap();

    let err = harness.engine.registry().sync(&broken).await.unwrap_err();
    assert!(matches!(err, AclError::Definition(_)));
    assert_eq!(harness.store.revision().await.unwrap(), revision);
}

#[tokio::test]
async fn test_audit_outage_does_not_block_sync() {
    let harness = TestHarness::new().await;
    harness.audit.fail_appends(true);
    let report = harness.sync(ADMINS_BUNDLE).await;
    assert!(report.changed());
    assert!(harness.audit.is_empty().await);

    let alice = PrincipalRef::user("alice");
    harness.join(&alice, &PrincipalRef::role("admins")).await;
    assert!(harness.allowed(&alice, "user.delete", None).await);
}

async fn engine_over(store: Arc<ReadFailingStore>, audit: Arc<MemoryAuditSink>) -> AclEngine {
    let engine = AclEngine::builder().store(store).audit(audit).build();
    engine.start().await.unwrap();
    engine
}

#[tokio::test]
async fn test_sync_is_audited_when_reads_fail_after_commit() {
    let store = Arc::new(ReadFailingStore::default());
    let audit = Arc::new(MemoryAuditSink::new());
    let engine = engine_over(store.clone(), audit.clone()).await;

    store.fail_reads_after_commit();
    let report = engine
        .registry()
        .sync(&DefinitionsBundle::from_json_str(ADMINS_BUNDLE).unwrap())
        .await
        .unwrap();
    assert_eq!(report.created, 4);
    assert_eq!(audit.len().await, 4);
    assert_eq!(store.inner.revision().await.unwrap(), report.revision);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_admin_write_is_audited_when_reads_fail_after_commit() {
    let store = Arc::new(ReadFailingStore::default());
    let audit = Arc::new(MemoryAuditSink::new());
    let engine = engine_over(store.clone(), audit.clone()).await;

    store.fail_reads_after_commit();
    engine
        .admin()
        .create_permission("root", PermissionKey::new("user.read"), "user")
        .await
        .unwrap();
    let records = audit.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].action, AuditAction::Create);
    engine.shutdown().await;
}
