//! The complete definition state and the mutations applied to it.
//!
//! [`Definitions`] is what a definition store holds. Stores apply a batch of
//! [`Mutation`]s to a copy, check [`Definitions::check_integrity`], and only
//! then publish the copy, which makes every commit all-or-nothing.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::DefinitionError;
use crate::ids::{
    AssignmentKey, AttributeGroupName, DefinitionId, PermissionKey, PolicyName, PrincipalRef,
};
use crate::model::{AclAssignment, AttributeGroup, Permission, Policy};

/// A single change to the definition state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Insert or replace a permission.
    PutPermission(Permission),
    /// Remove a permission.
    DeletePermission(PermissionKey),
    /// Insert or replace an attribute group.
    PutAttributeGroup(AttributeGroup),
    /// Remove an attribute group.
    DeleteAttributeGroup(AttributeGroupName),
    /// Insert or replace a policy.
    PutPolicy(Policy),
    /// Remove a policy.
    DeletePolicy(PolicyName),
    /// Insert or replace an assignment.
    PutAssignment(AclAssignment),
    /// Remove an assignment.
    DeleteAssignment(AssignmentKey),
}

impl Mutation {
    /// The definition this mutation touches.
    pub fn target(&self) -> DefinitionId {
        match self {
            Self::PutPermission(p) => DefinitionId::Permission(p.key.clone()),
            Self::DeletePermission(key) => DefinitionId::Permission(key.clone()),
            Self::PutAttributeGroup(g) => DefinitionId::AttributeGroup(g.name.clone()),
            Self::DeleteAttributeGroup(name) => DefinitionId::AttributeGroup(name.clone()),
            Self::PutPolicy(p) => DefinitionId::Policy(p.name.clone()),
            Self::DeletePolicy(name) => DefinitionId::Policy(name.clone()),
            Self::PutAssignment(a) => DefinitionId::Assignment(a.key()),
            Self::DeleteAssignment(key) => DefinitionId::Assignment(key.clone()),
        }
    }

    /// Ids whose cached dependents must be evicted once this mutation commits.
    ///
    /// Assignment changes also name the bound principal, so that principals
    /// whose compiled ACL had no assignments at all are reached.
    pub fn invalidation_ids(&self) -> Vec<DefinitionId> {
        match self {
            Self::PutAssignment(a) => vec![
                DefinitionId::Assignment(a.key()),
                DefinitionId::Principal(a.principal.clone()),
            ],
            Self::DeleteAssignment(key) => vec![
                DefinitionId::Assignment(key.clone()),
                DefinitionId::Principal(key.principal.clone()),
            ],
            other => vec![other.target()],
        }
    }
}

/// The full set of stored definitions, keyed by natural key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "DefinitionsDocument", into = "DefinitionsDocument")]
pub struct Definitions {
    /// Permissions by key.
    pub permissions: BTreeMap<PermissionKey, Permission>,
    /// Attribute groups by name.
    pub attribute_groups: BTreeMap<AttributeGroupName, AttributeGroup>,
    /// Policies by name.
    pub policies: BTreeMap<PolicyName, Policy>,
    /// Assignments by `(principal, policy)`.
    pub assignments: BTreeMap<AssignmentKey, AclAssignment>,
}

impl Definitions {
    /// Creates an empty definition state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one mutation in place. Integrity is not checked here.
    pub fn apply(&mut self, mutation: Mutation) {
        match mutation {
            Mutation::PutPermission(p) => {
                self.permissions.insert(p.key.clone(), p);
            }
            Mutation::DeletePermission(key) => {
                self.permissions.remove(&key);
            }
            Mutation::PutAttributeGroup(g) => {
                self.attribute_groups.insert(g.name.clone(), g);
            }
            Mutation::DeleteAttributeGroup(name) => {
                self.attribute_groups.remove(&name);
            }
            Mutation::PutPolicy(p) => {
                self.policies.insert(p.name.clone(), p);
            }
            Mutation::DeletePolicy(name) => {
                self.policies.remove(&name);
            }
            Mutation::PutAssignment(a) => {
                self.assignments.insert(a.key(), a);
            }
            Mutation::DeleteAssignment(key) => {
                self.assignments.remove(&key);
            }
        }
    }

    /// Applies a batch of mutations to a copy and checks the result.
    pub fn with_mutations<I>(&self, mutations: I) -> Result<Self, DefinitionError>
    where
        I: IntoIterator<Item = Mutation>,
    {
        let mut next = self.clone();
        for mutation in mutations {
            next.apply(mutation);
        }
        next.check_integrity()?;
        Ok(next)
    }

    /// Verifies every cross-reference and per-entity invariant.
    ///
    /// Rules must reference existing permissions and attribute groups,
    /// assignments must reference existing policies, selectors must be
    /// well-formed, and rule priorities unique within each policy.
    pub fn check_integrity(&self) -> Result<(), DefinitionError> {
        for group in self.attribute_groups.values() {
            group.selector.validate(&group.name)?;
        }
        for policy in self.policies.values() {
            policy.validate()?;
            let from = format!("policy '{}'", policy.name);
            for key in policy.permission_keys() {
                if !self.permissions.contains_key(key) {
                    return Err(DefinitionError::dangling(&from, "permission", key.as_str()));
                }
            }
            for group in policy.attribute_groups() {
                if !self.attribute_groups.contains_key(group) {
                    return Err(DefinitionError::dangling(
                        &from,
                        "attribute group",
                        group.as_str(),
                    ));
                }
            }
        }
        for assignment in self.assignments.values() {
            if !self.policies.contains_key(&assignment.policy) {
                return Err(DefinitionError::dangling(
                    format!("assignment '{}'", assignment.key()),
                    "policy",
                    assignment.policy.as_str(),
                ));
            }
        }
        Ok(())
    }

    /// Assignments bound to any of `principals`, in key order.
    pub fn assignments_for<'a>(
        &'a self,
        principals: &'a BTreeSet<PrincipalRef>,
    ) -> impl Iterator<Item = &'a AclAssignment> + 'a {
        self.assignments
            .values()
            .filter(move |a| principals.contains(&a.principal))
    }

    /// Policies with at least one rule on `key`.
    pub fn policies_using_permission(&self, key: &PermissionKey) -> Vec<&PolicyName> {
        self.policies
            .values()
            .filter(|p| p.permission_keys().any(|k| k == key))
            .map(|p| &p.name)
            .collect()
    }

    /// Policies with at least one rule scoped to `group`.
    pub fn policies_using_group(&self, group: &AttributeGroupName) -> Vec<&PolicyName> {
        self.policies
            .values()
            .filter(|p| p.attribute_groups().any(|g| g == group))
            .map(|p| &p.name)
            .collect()
    }

    /// Assignments bound to `policy`.
    pub fn assignments_of_policy(&self, policy: &PolicyName) -> Vec<&AclAssignment> {
        self.assignments
            .values()
            .filter(|a| &a.policy == policy)
            .collect()
    }

    /// The subset needed to compile ACLs for `principals`.
    ///
    /// Contains their assignments, the assigned policies, and the permissions
    /// and attribute groups those policies reference.
    pub fn restricted_to(&self, principals: &BTreeSet<PrincipalRef>) -> Definitions {
        let mut subset = Definitions::new();
        for assignment in self.assignments_for(principals) {
            subset
                .assignments
                .insert(assignment.key(), assignment.clone());
            let Some(policy) = self.policies.get(&assignment.policy) else {
                continue;
            };
            for key in policy.permission_keys() {
                if let Some(p) = self.permissions.get(key) {
                    subset.permissions.insert(key.clone(), p.clone());
                }
            }
            for name in policy.attribute_groups() {
                if let Some(g) = self.attribute_groups.get(name) {
                    subset.attribute_groups.insert(name.clone(), g.clone());
                }
            }
            subset.policies.insert(policy.name.clone(), policy.clone());
        }
        subset
    }

    /// Total number of stored definitions.
    pub fn len(&self) -> usize {
        self.permissions.len()
            + self.attribute_groups.len()
            + self.policies.len()
            + self.assignments.len()
    }

    /// Returns `true` when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Serialized form of [`Definitions`]: plain lists, since JSON object keys
/// must be strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DefinitionsDocument {
    #[serde(default)]
    permissions: Vec<Permission>,
    #[serde(default)]
    attribute_groups: Vec<AttributeGroup>,
    #[serde(default)]
    policies: Vec<Policy>,
    #[serde(default)]
    assignments: Vec<AclAssignment>,
}

impl From<DefinitionsDocument> for Definitions {
    fn from(doc: DefinitionsDocument) -> Self {
        Self {
            permissions: doc
                .permissions
                .into_iter()
                .map(|p| (p.key.clone(), p))
                .collect(),
            attribute_groups: doc
                .attribute_groups
                .into_iter()
                .map(|g| (g.name.clone(), g))
                .collect(),
            policies: doc
                .policies
                .into_iter()
                .map(|p| (p.name.clone(), p))
                .collect(),
            assignments: doc
                .assignments
                .into_iter()
                .map(|a| (a.key(), a))
                .collect(),
        }
    }
}

impl From<Definitions> for DefinitionsDocument {
    fn from(defs: Definitions) -> Self {
        Self {
            permissions: defs.permissions.into_values().collect(),
            attribute_groups: defs.attribute_groups.into_values().collect(),
            policies: defs.policies.into_values().collect(),
            assignments: defs.assignments.into_values().collect(),
        }
    }
}
