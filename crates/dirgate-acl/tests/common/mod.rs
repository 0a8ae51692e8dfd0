//! Shared harness for dirgate-acl integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use dirgate_acl::{AclConfig, AclEngine, MembershipError, MembershipProvider, StaticMembership};
use dirgate_core::{DefinitionsBundle, Mutation, PrincipalRef, ResourceAttributes};
use dirgate_redis::MemoryCacheClient;
use dirgate_store::{DefinitionStore, MemoryAuditSink, MemoryDefinitionStore, Snapshot};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Bundle for the basic scenario: `admins` may delete users.
pub const ADMINS_BUNDLE: &str = r#"{
    "permissions": [
        {"key": "user.delete", "category": "user"},
        {"key": "user.read", "category": "user"}
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

/// Bundle granting `user.delete` only on engineering resources.
pub const SCOPED_BUNDLE: &str = r#"{
    "permissions": [
        {"key": "user.delete", "category": "user"}
    ],
    "attribute_groups": [
        {"name": "dept-eng", "pattern": {"dept": "eng"}}
    ],
    "policies": [
        {
            "name": "eng-delete",
            "rules": [
                {"effect": "allow", "permissions": ["user.delete"], "attribute_group": "dept-eng", "priority": 1}
            ]
        }
    ],
    "assignments": [
        {"principal_type": "group", "principal_id": "eng-admins", "policy": "eng-delete"}
    ]
}"#;

/// Engine over in-memory parts, with handles kept for inspection.
pub struct TestHarness {
    pub engine: AclEngine,
    pub store: Arc<MemoryDefinitionStore>,
    pub client: Arc<MemoryCacheClient>,
    pub membership: Arc<StaticMembership>,
    pub audit: Arc<MemoryAuditSink>,
}

impl TestHarness {
    /// Builds and starts an engine.
    pub async fn new() -> Self {
        let store = Arc::new(MemoryDefinitionStore::new());
        let client = Arc::new(MemoryCacheClient::new());
        let membership = Arc::new(StaticMembership::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let engine = AclEngine::builder()
            .store(store.clone())
            .cache_client(client.clone())
            .membership(membership.clone())
            .audit(audit.clone())
            .config(AclConfig::default())
            .build();
        engine.start().await.unwrap();
        Self {
            engine,
            store,
            client,
            membership,
            audit,
        }
    }

    /// Builds, starts, and syncs `bundle`.
    pub async fn with_bundle(bundle: &str) -> Self {
        let harness = Self::new().await;
        harness.sync(bundle).await;
        harness
    }

    /// Syncs a JSON bundle, panicking on failure.
    pub async fn sync(&self, bundle: &str) -> dirgate_acl::SyncReport {
        let bundle = DefinitionsBundle::from_json_str(bundle).unwrap();
        self.engine.registry().sync(&bundle).await.unwrap()
    }

    /// Records that `member` belongs to `parent`.
    pub async fn join(&self, member: &PrincipalRef, parent: &PrincipalRef) {
        self.membership.add(member.clone(), parent.clone()).await;
    }

    /// Whether `principal` may exercise `permission`.
    pub async fn allowed(
        &self,
        principal: &PrincipalRef,
        permission: &str,
        resource: Option<&ResourceAttributes>,
    ) -> bool {
        self.engine
            .guard()
            .check(principal, permission, resource)
            .await
            .is_allowed()
    }
}

/// `{dept: value}` resource attributes.
pub fn dept(value: &str) -> ResourceAttributes {
    [("dept".to_string(), value.to_string())].into_iter().collect()
}

/// Membership provider that sleeps before answering and counts calls.
pub struct SlowMembership {
    pub inner: StaticMembership,
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl SlowMembership {
    pub fn new(inner: StaticMembership, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MembershipProvider for SlowMembership {
    async fn closure(
        &self,
        principal: &PrincipalRef,
    ) -> Result<BTreeSet<PrincipalRef>, MembershipError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.inner.closure(principal).await
    }
}

/// Memory store whose reads start failing once a commit lands, when armed.
#[derive(Default)]
pub struct ReadFailingStore {
    pub inner: MemoryDefinitionStore,
    armed: AtomicBool,
    committed: AtomicBool,
}

impl ReadFailingStore {
    /// Makes reads fail after the next commit.
    pub fn fail_reads_after_commit(&self) {
        self.committed.store(false, Ordering::SeqCst);
        self.armed.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> dirgate_store::Result<()> {
        if self.armed.load(Ordering::SeqCst) && self.committed.load(Ordering::SeqCst) {
            Err(dirgate_store::Error::Unavailable("read refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DefinitionStore for ReadFailingStore {
    async fn snapshot(&self) -> dirgate_store::Result<Snapshot> {
        self.check()?;
        self.inner.snapshot().await
    }

    async fn commit(
        &self,
        base_revision: u64,
        mutations: Vec<Mutation>,
    ) -> dirgate_store::Result<u64> {
        let revision = self.inner.commit(base_revision, mutations).await?;
        self.committed.store(true, Ordering::SeqCst);
        Ok(revision)
    }

    async fn revision(&self) -> dirgate_store::Result<u64> {
        self.check()?;
        self.inner.revision().await
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "read-failing"
    }
}
