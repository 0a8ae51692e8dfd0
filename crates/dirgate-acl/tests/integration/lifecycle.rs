//! Engine start, restart, and shutdown.

use dirgate_acl::{AclEngine, EngineState, StaticMembership};
use dirgate_core::{DefinitionsBundle, PrincipalRef};
use dirgate_redis::MemoryCacheClient;
use dirgate_store::{DefinitionStore, FileDefinitionStore, MemoryDefinitionStore};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use crate::common::ADMINS_BUNDLE;

async fn file_engine(dir: &TempDir, client: Arc<MemoryCacheClient>) -> AclEngine {
    let store = FileDefinitionStore::open(dir.path().join("definitions.json"))
        .await
        .unwrap();
    let alice = PrincipalRef::user("alice");
    AclEngine::builder()
        .store(Arc::new(store))
        .cache_client(client)
        .membership(Arc::new(StaticMembership::from_pairs([(
            alice,
            vec![PrincipalRef::role("admins")],
        )])))
        .build()
}

#[tokio::test]
async fn test_restart_reloads_definitions_and_floor() {
    let dir = TempDir::new().unwrap();
    let client = Arc::new(MemoryCacheClient::new());
    let alice = PrincipalRef::user("alice");

    let first = file_engine(&dir, client.clone()).await;
    first.start().await.unwrap();
    let report = first
        .registry()
        .sync(&DefinitionsBundle::from_json_str(ADMINS_BUNDLE).unwrap())
        .await
        .unwrap();
    assert!(first.guard().check(&alice, "user.delete", None).await.is_allowed());
    first.shutdown().await;
    assert_eq!(first.state(), EngineState::Stopped);

    let second = file_engine(&dir, client).await;
    assert_eq!(second.state(), EngineState::Starting);
    second.start().await.unwrap();
    assert!(second.state().is_ready());
    assert_eq!(second.cache().generation().floor(), report.revision);
    assert!(second.guard().check(&alice, "user.delete", None).await.is_allowed());
    // Served from the entry the first engine wrote.
    assert_eq!(second.cache().stats().compiles, 0);
    second.shutdown().await;
}

#[tokio::test]
async fn test_checks_before_start_deny() {
    let dir = TempDir::new().unwrap();
    let client = Arc::new(MemoryCacheClient::new());
    let alice = PrincipalRef::user("alice");

    let engine = file_engine(&dir, client.clone()).await;
    engine.start().await.unwrap();
    engine
        .registry()
        .sync(&DefinitionsBundle::from_json_str(ADMINS_BUNDLE).unwrap())
        .await
        .unwrap();
    engine.shutdown().await;

    // The catalog is empty until start, so nothing is known yet.
    let cold = file_engine(&dir, client).await;
    assert!(!cold.guard().check(&alice, "user.delete", None).await.is_allowed());
    cold.start().await.unwrap();
    assert!(cold.guard().check(&alice, "user.delete", None).await.is_allowed());
    cold.shutdown().await;
}

#[tokio::test]
async fn test_state_changes_are_broadcast() {
    let engine = AclEngine::builder().build();
    let mut rx = engine.subscribe();
    engine.start().await.unwrap();
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), EngineState::Ready);

    engine.shutdown().await;
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow(), EngineState::Stopped);
}

const WITH_CREATE: &str = r#"{
    "permissions": [
        {"key": "user.create", "category": "user"},
        {"key": "user.delete", "category": "user"},
        {"key": "user.read", "category": "user"}
    ],
    "policies": [
        {
            "name": "admins-policy",
            "rules": [{"effect": "allow", "permissions": ["user.create", "user.delete"], "priority": 1}]
        }
    ],
    "assignments": [
        {"principal_type": "role", "principal_id": "admins", "policy": "admins-policy", "builtin": true}
    ]
}"#;

fn shared_engine(store: Arc<MemoryDefinitionStore>, client: Arc<MemoryCacheClient>) -> AclEngine {
    AclEngine::builder()
        .store(store)
        .cache_client(client)
        .membership(Arc::new(StaticMembership::from_pairs([(
            PrincipalRef::user("alice"),
            vec![PrincipalRef::role("admins")],
        )])))
        .build()
}

#[tokio::test(start_paused = true)]
async fn test_peer_engine_learns_new_permissions() {
    let store = Arc::new(MemoryDefinitionStore::new());
    let client = Arc::new(MemoryCacheClient::new());
    let alice = PrincipalRef::user("alice");

    let writer = shared_engine(store.clone(), client.clone());
    let reader = shared_engine(store.clone(), client.clone());
    writer.start().await.unwrap();
    reader.start().await.unwrap();

    let first = writer
        .registry()
        .sync(&DefinitionsBundle::from_json_str(ADMINS_BUNDLE).unwrap())
        .await
        .unwrap();
    // The reader loaded an empty catalog at start.
    assert!(!reader.guard().check(&alice, "user.delete", None).await.is_allowed());

    let floor = reader.refresh().await.unwrap();
    assert_eq!(floor, first.revision);
    assert!(reader.guard().check(&alice, "user.delete", None).await.is_allowed());

    // The background watcher catches the next sync without an explicit call.
    let second = writer
        .registry()
        .sync(&DefinitionsBundle::from_json_str(WITH_CREATE).unwrap())
        .await
        .unwrap();
    assert!(writer.guard().check(&alice, "user.create", None).await.is_allowed());
    assert!(!reader.guard().check(&alice, "user.create", None).await.is_allowed());

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(reader.cache().generation().floor(), second.revision);
    assert!(reader.guard().check(&alice, "user.create", None).await.is_allowed());
    assert_eq!(store.revision().await.unwrap(), second.revision);

    writer.shutdown().await;
    reader.shutdown().await;
}
