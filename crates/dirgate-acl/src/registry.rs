//! Declarative bundle synchronization.
//!
//! [`PermissionRegistry::sync`] reconciles the store with a bundle:
//!
//! - entities are matched by natural key and written only when their content
//!   differs, so syncing the same bundle twice is a no-op;
//! - a bundle entity that re-declares an admin-created one adopts it;
//! - registry-owned entities the bundle no longer declares are pruned, unless
//!   something that survives still references them (reported as retained).
//!
//! Builtin assignments come from bundles and are pruned like any other
//! registry-owned assignment. The flag only guards them against admin
//! mutation.
//!
//! The whole plan commits as one batch against the snapshot revision it was
//! planned from. A lost race replans from a fresh snapshot.

use dirgate_core::{
    AclAssignment, AssignmentKey, AttributeGroup, AttributeGroupName, DefinitionId, Definitions,
    DefinitionsBundle, Mutation, Origin, Permission, PermissionKey, Policy, PolicyName,
    ValidatedBundle,
};
use dirgate_store::{AuditAction, AuditRecord, AuditSink, DefinitionStore, append_best_effort};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::cache::AclCache;
use crate::catalog::PermissionCatalog;
use crate::error::Result;

/// Actor recorded on registry audit records.
pub const REGISTRY_ACTOR: &str = "registry";

/// Outcome of a sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Definitions created.
    pub created: usize,
    /// Definitions updated or adopted.
    pub updated: usize,
    /// Registry-owned definitions removed.
    pub pruned: usize,
    /// Registry-owned definitions kept because something still references them.
    pub retained: Vec<DefinitionId>,
    /// Store revision after the sync.
    pub revision: u64,
}

impl SyncReport {
    /// Returns `true` if the sync wrote anything.
    pub fn changed(&self) -> bool {
        self.created + self.updated + self.pruned > 0
    }
}

#[derive(Debug, Default)]
struct SyncPlan {
    mutations: Vec<Mutation>,
    records: Vec<AuditRecord>,
    report: SyncReport,
}

impl SyncPlan {
    fn reconcile<K, V>(
        &mut self,
        current: &BTreeMap<K, V>,
        desired: &BTreeMap<K, V>,
        id: impl Fn(&K) -> DefinitionId,
        put: impl Fn(V) -> Mutation,
    ) where
        K: Ord,
        V: Clone + PartialEq + Serialize,
    {
        for (key, want) in desired {
            match current.get(key) {
                None => {
                    self.report.created += 1;
                    self.records.push(AuditRecord::new(
                        REGISTRY_ACTOR,
                        AuditAction::Create,
                        id(key),
                        None::<&V>,
                        Some(want),
                    ));
                    self.mutations.push(put(want.clone()));
                }
                Some(have) if have != want => {
                    self.report.updated += 1;
                    self.records.push(AuditRecord::new(
                        REGISTRY_ACTOR,
                        AuditAction::Update,
                        id(key),
                        Some(have),
                        Some(want),
                    ));
                    self.mutations.push(put(want.clone()));
                }
                Some(_) => {}
            }
        }
    }

    fn prune<V: Serialize>(&mut self, target: DefinitionId, have: &V, delete: Mutation) {
        self.report.pruned += 1;
        self.records.push(AuditRecord::new(
            REGISTRY_ACTOR,
            AuditAction::Prune,
            target,
            Some(have),
            None::<&V>,
        ));
        self.mutations.push(delete);
    }

    fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

/// Builds the mutations that turn `current` into the state `desired` implies.
fn plan_sync(current: &Definitions, desired: &ValidatedBundle) -> SyncPlan {
    let mut plan = SyncPlan::default();

    plan.reconcile(
        &current.permissions,
        &desired.permissions,
        |k: &PermissionKey| DefinitionId::Permission(k.clone()),
        Mutation::PutPermission,
    );
    plan.reconcile(
        &current.attribute_groups,
        &desired.attribute_groups,
        |k: &AttributeGroupName| DefinitionId::AttributeGroup(k.clone()),
        Mutation::PutAttributeGroup,
    );
    plan.reconcile(
        &current.policies,
        &desired.policies,
        |k: &PolicyName| DefinitionId::Policy(k.clone()),
        Mutation::PutPolicy,
    );
    plan.reconcile(
        &current.assignments,
        &desired.assignments,
        |k: &AssignmentKey| DefinitionId::Assignment(k.clone()),
        Mutation::PutAssignment,
    );

    // Prune top-down so each level sees what survives above it.
    let mut surviving_assignments: Vec<&AclAssignment> =
        desired.assignments.values().collect();
    for (key, assignment) in &current.assignments {
        if desired.assignments.contains_key(key) {
            continue;
        }
        if assignment.origin == Origin::Registry {
            plan.prune(
                DefinitionId::Assignment(key.clone()),
                assignment,
                Mutation::DeleteAssignment(key.clone()),
            );
        } else {
            surviving_assignments.push(assignment);
        }
    }

    let referenced_policies: BTreeSet<&PolicyName> =
        surviving_assignments.iter().map(|a| &a.policy).collect();
    let mut surviving_policies: Vec<&Policy> = desired.policies.values().collect();
    for (name, policy) in &current.policies {
        if desired.policies.contains_key(name) {
            continue;
        }
        if policy.origin != Origin::Registry {
            surviving_policies.push(policy);
        } else if referenced_policies.contains(name) {
            plan.report.retained.push(DefinitionId::Policy(name.clone()));
            surviving_policies.push(policy);
        } else {
            plan.prune(
                DefinitionId::Policy(name.clone()),
                policy,
                Mutation::DeletePolicy(name.clone()),
            );
        }
    }

    let referenced_groups: BTreeSet<&AttributeGroupName> = surviving_policies
        .iter()
        .flat_map(|p| p.attribute_groups())
        .collect();
    let referenced_keys: BTreeSet<&PermissionKey> = surviving_policies
        .iter()
        .flat_map(|p| p.permission_keys())
        .collect();

    prune_unreferenced(
        &mut plan,
        &current.attribute_groups,
        &desired.attribute_groups,
        &referenced_groups,
        |g: &AttributeGroup| g.origin,
        |k: &AttributeGroupName| DefinitionId::AttributeGroup(k.clone()),
        |k: &AttributeGroupName| Mutation::DeleteAttributeGroup(k.clone()),
    );
    prune_unreferenced(
        &mut plan,
        &current.permissions,
        &desired.permissions,
        &referenced_keys,
        |p: &Permission| p.origin,
        |k: &PermissionKey| DefinitionId::Permission(k.clone()),
        |k: &PermissionKey| Mutation::DeletePermission(k.clone()),
    );

    plan
}

fn prune_unreferenced<K, V>(
    plan: &mut SyncPlan,
    current: &BTreeMap<K, V>,
    desired: &BTreeMap<K, V>,
    referenced: &BTreeSet<&K>,
    origin: impl Fn(&V) -> Origin,
    id: impl Fn(&K) -> DefinitionId,
    delete: impl Fn(&K) -> Mutation,
) where
    K: Ord,
    V: Serialize,
{
    for (key, value) in current {
        if desired.contains_key(key) || origin(value) != Origin::Registry {
            continue;
        }
        if referenced.contains(key) {
            plan.report.retained.push(id(key));
        } else {
            plan.prune(id(key), value, delete(key));
        }
    }
}

/// Synchronizes definitions bundles into the store.
#[derive(Clone)]
pub struct PermissionRegistry {
    store: Arc<dyn DefinitionStore>,
    cache: Arc<AclCache>,
    catalog: Arc<PermissionCatalog>,
    audit: Arc<dyn AuditSink>,
    commit_retries: u32,
}

impl std::fmt::Debug for PermissionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionRegistry")
            .field("store", &self.store.backend_name())
            .field("commit_retries", &self.commit_retries)
            .finish_non_exhaustive()
    }
}

impl PermissionRegistry {
    /// Creates a registry.
    pub fn new(
        store: Arc<dyn DefinitionStore>,
        cache: Arc<AclCache>,
        catalog: Arc<PermissionCatalog>,
        audit: Arc<dyn AuditSink>,
        commit_retries: u32,
    ) -> Self {
        Self {
            store,
            cache,
            catalog,
            audit,
            commit_retries,
        }
    }

    /// Validates `bundle` and reconciles the store with it.
    ///
    /// Schema violations, including references the store cannot resolve,
    /// fail with [`AclError::Definition`](crate::AclError::Definition) and
    /// leave the store unchanged.
    pub async fn sync(&self, bundle: &DefinitionsBundle) -> Result<SyncReport> {
        let desired = bundle.validate()?;
        let mut attempt = 0;
        loop {
            let snapshot = self.store.snapshot().await?;
            let plan = plan_sync(&snapshot.definitions, &desired);
            if plan.is_empty() {
                log::info!("Bundle already in sync at revision {}", snapshot.revision);
                return Ok(SyncReport {
                    revision: snapshot.revision,
                    ..plan.report
                });
            }

            let ids: BTreeSet<DefinitionId> = plan
                .mutations
                .iter()
                .flat_map(Mutation::invalidation_ids)
                .collect();

            match self.store.commit(snapshot.revision, plan.mutations).await {
                Ok(revision) => {
                    let report = SyncReport {
                        revision,
                        ..plan.report
                    };
                    self.after_commit(revision, ids, plan.records).await;
                    log::info!(
                        "Synced bundle at revision {revision}: {} created, {} updated, {} pruned, {} retained",
                        report.created,
                        report.updated,
                        report.pruned,
                        report.retained.len()
                    );
                    return Ok(report);
                }
                Err(dirgate_store::Error::Conflict { expected, actual })
                    if attempt < self.commit_retries =>
                {
                    attempt += 1;
                    log::debug!(
                        "Sync lost a race ({expected} vs {actual}); replanning, attempt {attempt}"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Runs once the batch is durable. Nothing here fails the sync: the
    /// change is already committed.
    async fn after_commit(
        &self,
        revision: u64,
        ids: BTreeSet<DefinitionId>,
        records: Vec<AuditRecord>,
    ) {
        append_best_effort(self.audit.as_ref(), records).await;

        self.cache.generation().raise_floor(revision);
        if let Err(e) = self.cache.publish_sync_floor().await {
            log::warn!("Sync floor {revision} not published: {e}");
        }

        if let Err(e) = self.catalog.reload_from(self.store.as_ref()).await {
            log::warn!("Permission catalog not reloaded after revision {revision}: {e}");
        }

        if let Err(e) = self.cache.invalidate_after_commit(revision, ids).await {
            log::warn!("Invalidation after revision {revision} failed: {e}");
        }
    }
}
