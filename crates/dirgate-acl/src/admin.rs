//! Administrator mutation surface.
//!
//! Each operation plans against a snapshot, commits optimistically, and only
//! returns once the affected cache entries have been invalidated. Builtin
//! assignments cannot be changed here, and nothing that is still referenced
//! can be deleted.

use dirgate_core::{
    AclAssignment, AssignmentKey, AttributeGroup, AttributeGroupName, DefinitionId, Definitions,
    Mutation, Origin, Permission, PermissionKey, Policy, PolicyName,
};
use dirgate_store::{AuditAction, AuditRecord, AuditSink, DefinitionStore, append_best_effort};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::cache::AclCache;
use crate::catalog::PermissionCatalog;
use crate::error::{AclError, ProtectionReason, Result};

/// Planned admin change: mutations plus the audit records describing them.
struct Change {
    mutations: Vec<Mutation>,
    records: Vec<AuditRecord>,
}

impl Change {
    fn new() -> Self {
        Self {
            mutations: Vec::new(),
            records: Vec::new(),
        }
    }

    fn record<B: Serialize, A: Serialize>(
        mut self,
        actor: &str,
        action: AuditAction,
        target: DefinitionId,
        before: Option<&B>,
        after: Option<&A>,
        mutation: Mutation,
    ) -> Self {
        self.records
            .push(AuditRecord::new(actor, action, target, before, after));
        self.mutations.push(mutation);
        self
    }
}

/// Create, update, and delete operations for administrators.
#[derive(Clone)]
pub struct AclAdmin {
    store: Arc<dyn DefinitionStore>,
    cache: Arc<AclCache>,
    catalog: Arc<PermissionCatalog>,
    audit: Arc<dyn AuditSink>,
    commit_retries: u32,
}

impl std::fmt::Debug for AclAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AclAdmin")
            .field("store", &self.store.backend_name())
            .field("commit_retries", &self.commit_retries)
            .finish_non_exhaustive()
    }
}

fn in_use_by(names: impl IntoIterator<Item = DefinitionId>) -> Vec<String> {
    names.into_iter().map(|id| id.to_string()).collect()
}

impl AclAdmin {
    /// Creates the admin surface.
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

    /// Plans with `plan` against fresh snapshots until a commit lands, then
    /// audits and invalidates. Returns the committed revision.
    async fn apply<F>(&self, plan: F) -> Result<u64>
    where
        F: Fn(&Definitions) -> Result<Change>,
    {
        let mut attempt = 0;
        loop {
            let snapshot = self.store.snapshot().await?;
            let change = plan(&snapshot.definitions)?;
            if change.mutations.is_empty() {
                return Ok(snapshot.revision);
            }
            let ids: BTreeSet<DefinitionId> = change
                .mutations
                .iter()
                .flat_map(Mutation::invalidation_ids)
                .collect();

            match self.store.commit(snapshot.revision, change.mutations).await {
                Ok(revision) => {
                    append_best_effort(self.audit.as_ref(), change.records).await;
                    if let Err(e) = self.catalog.reload_from(self.store.as_ref()).await {
                        log::warn!("Permission catalog not reloaded after revision {revision}: {e}");
                    }
                    if let Err(e) = self.cache.invalidate_after_commit(revision, ids).await {
                        log::warn!("Invalidation after revision {revision} failed: {e}");
                    }
                    return Ok(revision);
                }
                Err(dirgate_store::Error::Conflict { .. }) if attempt < self.commit_retries => {
                    attempt += 1;
                    log::debug!("Admin commit lost a race; retrying, attempt {attempt}");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    // ------------------------------------------------------------------
    // Permissions
    // ------------------------------------------------------------------

    /// Declares a new permission.
    pub async fn create_permission(
        &self,
        actor: &str,
        key: PermissionKey,
        category: &str,
    ) -> Result<u64> {
        let key = PermissionKey::parse(key.as_str())?;
        self.apply(|defs| {
            if defs.permissions.contains_key(&key) {
                return Err(AclError::AlreadyExists(format!("permission:{key}")));
            }
            let permission = Permission {
                key: key.clone(),
                category: category.to_string(),
                origin: Origin::Admin,
            };
            Ok(Change::new().record(
                actor,
                AuditAction::Create,
                DefinitionId::Permission(key.clone()),
                None::<&Permission>,
                Some(&permission),
                Mutation::PutPermission(permission.clone()),
            ))
        })
        .await
    }

    /// Deletes a permission no policy references.
    pub async fn delete_permission(&self, actor: &str, key: &PermissionKey) -> Result<u64> {
        self.apply(|defs| {
            let target = DefinitionId::Permission(key.clone());
            let Some(existing) = defs.permissions.get(key) else {
                return Err(AclError::NotFound(target.to_string()));
            };
            let users = defs.policies_using_permission(key);
            if !users.is_empty() {
                return Err(AclError::in_use(
                    &target,
                    in_use_by(users.into_iter().map(|p| DefinitionId::Policy(p.clone()))),
                ));
            }
            Ok(Change::new().record(
                actor,
                AuditAction::Delete,
                target,
                Some(existing),
                None::<&Permission>,
                Mutation::DeletePermission(key.clone()),
            ))
        })
        .await
    }

    // ------------------------------------------------------------------
    // Attribute groups
    // ------------------------------------------------------------------

    /// Creates an attribute group.
    pub async fn create_attribute_group(&self, actor: &str, group: AttributeGroup) -> Result<u64> {
        group.selector.validate(&group.name)?;
        let group = AttributeGroup {
            origin: Origin::Admin,
            ..group
        };
        self.apply(|defs| {
            if defs.attribute_groups.contains_key(&group.name) {
                return Err(AclError::AlreadyExists(format!(
                    "attribute_group:{}",
                    group.name
                )));
            }
            Ok(Change::new().record(
                actor,
                AuditAction::Create,
                DefinitionId::AttributeGroup(group.name.clone()),
                None::<&AttributeGroup>,
                Some(&group),
                Mutation::PutAttributeGroup(group.clone()),
            ))
        })
        .await
    }

    /// Replaces an attribute group's selector.
    pub async fn update_attribute_group(&self, actor: &str, group: AttributeGroup) -> Result<u64> {
        group.selector.validate(&group.name)?;
        self.apply(|defs| {
            let target = DefinitionId::AttributeGroup(group.name.clone());
            let Some(existing) = defs.attribute_groups.get(&group.name) else {
                return Err(AclError::NotFound(target.to_string()));
            };
            let next = AttributeGroup {
                origin: existing.origin,
                ..group.clone()
            };
            if &next == existing {
                return Ok(Change::new());
            }
            Ok(Change::new().record(
                actor,
                AuditAction::Update,
                target,
                Some(existing),
                Some(&next),
                Mutation::PutAttributeGroup(next.clone()),
            ))
        })
        .await
    }

    /// Deletes an attribute group no rule references.
    pub async fn delete_attribute_group(
        &self,
        actor: &str,
        name: &AttributeGroupName,
    ) -> Result<u64> {
        self.apply(|defs| {
            let target = DefinitionId::AttributeGroup(name.clone());
            let Some(existing) = defs.attribute_groups.get(name) else {
                return Err(AclError::NotFound(target.to_string()));
            };
            let users = defs.policies_using_group(name);
            if !users.is_empty() {
                return Err(AclError::in_use(
                    &target,
                    in_use_by(users.into_iter().map(|p| DefinitionId::Policy(p.clone()))),
                ));
            }
            Ok(Change::new().record(
                actor,
                AuditAction::Delete,
                target,
                Some(existing),
                None::<&AttributeGroup>,
                Mutation::DeleteAttributeGroup(name.clone()),
            ))
        })
        .await
    }

    // ------------------------------------------------------------------
    // Policies
    // ------------------------------------------------------------------

    /// Creates a policy.
    pub async fn create_policy(&self, actor: &str, policy: Policy) -> Result<u64> {
        let policy = Policy::new(policy.name, policy.description, policy.rules, Origin::Admin)?;
        self.apply(|defs| {
            if defs.policies.contains_key(&policy.name) {
                return Err(AclError::AlreadyExists(format!("policy:{}", policy.name)));
            }
            Ok(Change::new().record(
                actor,
                AuditAction::Create,
                DefinitionId::Policy(policy.name.clone()),
                None::<&Policy>,
                Some(&policy),
                Mutation::PutPolicy(policy.clone()),
            ))
        })
        .await
    }

    /// Replaces a policy's description and rules.
    pub async fn update_policy(&self, actor: &str, policy: Policy) -> Result<u64> {
        let policy = Policy::new(policy.name, policy.description, policy.rules, policy.origin)?;
        self.apply(|defs| {
            let target = DefinitionId::Policy(policy.name.clone());
            let Some(existing) = defs.policies.get(&policy.name) else {
                return Err(AclError::NotFound(target.to_string()));
            };
            let next = Policy {
                origin: existing.origin,
                ..policy.clone()
            };
            if &next == existing {
                return Ok(Change::new());
            }
            Ok(Change::new().record(
                actor,
                AuditAction::Update,
                target,
                Some(existing),
                Some(&next),
                Mutation::PutPolicy(next.clone()),
            ))
        })
        .await
    }

    /// Deletes a policy no assignment references.
    pub async fn delete_policy(&self, actor: &str, name: &PolicyName) -> Result<u64> {
        self.apply(|defs| {
            let target = DefinitionId::Policy(name.clone());
            let Some(existing) = defs.policies.get(name) else {
                return Err(AclError::NotFound(target.to_string()));
            };
            let users = defs.assignments_of_policy(name);
            if !users.is_empty() {
                return Err(AclError::in_use(
                    &target,
                    in_use_by(users.into_iter().map(|a| DefinitionId::Assignment(a.key()))),
                ));
            }
            Ok(Change::new().record(
                actor,
                AuditAction::Delete,
                target,
                Some(existing),
                None::<&Policy>,
                Mutation::DeletePolicy(name.clone()),
            ))
        })
        .await
    }

    // ------------------------------------------------------------------
    // Assignments
    // ------------------------------------------------------------------

    /// Binds a policy to a principal. Admin assignments are never builtin.
    pub async fn create_assignment(&self, actor: &str, key: AssignmentKey) -> Result<u64> {
        let assignment = AclAssignment {
            principal: key.principal.clone(),
            policy: key.policy.clone(),
            builtin: false,
            origin: Origin::Admin,
        };
        self.apply(|defs| {
            if defs.assignments.contains_key(&key) {
                return Err(AclError::AlreadyExists(format!("assignment:{key}")));
            }
            Ok(Change::new().record(
                actor,
                AuditAction::Create,
                DefinitionId::Assignment(key.clone()),
                None::<&AclAssignment>,
                Some(&assignment),
                Mutation::PutAssignment(assignment.clone()),
            ))
        })
        .await
    }

    /// Rebinds an assignment's principal to a different policy.
    pub async fn update_assignment(
        &self,
        actor: &str,
        key: &AssignmentKey,
        policy: PolicyName,
    ) -> Result<u64> {
        self.apply(|defs| {
            let target = DefinitionId::Assignment(key.clone());
            let existing = Self::mutable_assignment(defs, key)?;
            if existing.policy == policy {
                return Ok(Change::new());
            }
            let next = AclAssignment {
                policy: policy.clone(),
                ..existing.clone()
            };
            if defs.assignments.contains_key(&next.key()) {
                return Err(AclError::AlreadyExists(format!("assignment:{}", next.key())));
            }
            Ok(Change::new()
                .record(
                    actor,
                    AuditAction::Delete,
                    target,
                    Some(existing),
                    None::<&AclAssignment>,
                    Mutation::DeleteAssignment(key.clone()),
                )
                .record(
                    actor,
                    AuditAction::Create,
                    DefinitionId::Assignment(next.key()),
                    None::<&AclAssignment>,
                    Some(&next),
                    Mutation::PutAssignment(next.clone()),
                ))
        })
        .await
    }

    /// Removes an assignment.
    pub async fn delete_assignment(&self, actor: &str, key: &AssignmentKey) -> Result<u64> {
        self.apply(|defs| {
            let existing = Self::mutable_assignment(defs, key)?;
            Ok(Change::new().record(
                actor,
                AuditAction::Delete,
                DefinitionId::Assignment(key.clone()),
                Some(existing),
                None::<&AclAssignment>,
                Mutation::DeleteAssignment(key.clone()),
            ))
        })
        .await
    }

    fn mutable_assignment<'a>(
        defs: &'a Definitions,
        key: &AssignmentKey,
    ) -> Result<&'a AclAssignment> {
        let target = DefinitionId::Assignment(key.clone());
        let existing = defs
            .assignments
            .get(key)
            .ok_or_else(|| AclError::NotFound(target.to_string()))?;
        if existing.builtin {
            return Err(AclError::BuiltinProtection {
                target: target.to_string(),
                reason: ProtectionReason::Builtin,
            });
        }
        Ok(existing)
    }
}
