//! Compiled per-principal decision tables.
//!
//! A [`CompiledAcl`] is self-contained: it carries the attribute-group
//! selectors its scopes refer to, so evaluating a request needs no store
//! access.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::ids::{AttributeGroupName, DefinitionId, PermissionKey, PrincipalRef};
use crate::model::{AttributeSelector, Effect, ResourceAttributes};

/// Where an allow applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Any resource.
    Unrestricted,
    /// Resources matching at least one of the groups.
    Groups(BTreeSet<AttributeGroupName>),
}

impl Scope {
    /// Widens the scope with another allow's scope.
    pub fn union(self, group: Option<&AttributeGroupName>) -> Scope {
        match (self, group) {
            (Scope::Unrestricted, _) | (_, None) => Scope::Unrestricted,
            (Scope::Groups(mut groups), Some(g)) => {
                groups.insert(g.clone());
                Scope::Groups(groups)
            }
        }
    }
}

/// Resolved outcome for one permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledPermission {
    /// `Deny` when an unscoped deny applies or no allow exists.
    pub effect: Effect,
    /// Union of the allow scopes; `None` when the effect is `Deny`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow: Option<Scope>,
    /// Groups whose resources are denied even when allowed elsewhere.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub deny_scopes: BTreeSet<AttributeGroupName>,
}

/// The answer to a single authorization question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Allow or deny.
    pub effect: Effect,
    /// Attribute group that decided the request, when one did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_scope: Option<AttributeGroupName>,
}

impl Decision {
    /// An unconditional allow.
    pub fn allow() -> Self {
        Self {
            effect: Effect::Allow,
            matched_scope: None,
        }
    }

    /// A deny with no scope attached.
    pub fn deny() -> Self {
        Self {
            effect: Effect::Deny,
            matched_scope: None,
        }
    }

    /// Returns `true` if the request may proceed.
    pub fn is_allowed(&self) -> bool {
        self.effect == Effect::Allow
    }
}

/// Compiled permission table for one principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledAcl {
    /// Subject the table was compiled for.
    pub principal: PrincipalRef,
    /// Store revision the table was compiled from.
    pub generation: u64,
    /// Permission table; absent keys are implicit denies.
    pub entries: BTreeMap<PermissionKey, CompiledPermission>,
    /// Selectors for every group named in `entries`.
    pub attribute_groups: BTreeMap<AttributeGroupName, AttributeSelector>,
    /// Definitions whose change must evict this table.
    pub dependencies: BTreeSet<DefinitionId>,
}

impl CompiledAcl {
    /// Decides whether the principal may exercise `permission` on a resource.
    ///
    /// Scoped denies and scoped allows need resource attributes; without them
    /// the resource cannot be shown to be outside a denied group or inside an
    /// allowed one, so the request is denied.
    pub fn evaluate(
        &self,
        permission: &PermissionKey,
        resource: Option<&ResourceAttributes>,
    ) -> Decision {
        let Some(entry) = self.entries.get(permission) else {
            return Decision::deny();
        };
        if entry.effect == Effect::Deny {
            return Decision::deny();
        }

        if !entry.deny_scopes.is_empty() {
            let Some(attrs) = resource else {
                return Decision::deny();
            };
            if let Some(group) = entry
                .deny_scopes
                .iter()
                .find(|g| self.group_matches(g, attrs))
            {
                return Decision {
                    effect: Effect::Deny,
                    matched_scope: Some(group.clone()),
                };
            }
        }

        match &entry.allow {
            Some(Scope::Unrestricted) => Decision::allow(),
            Some(Scope::Groups(groups)) => {
                let Some(attrs) = resource else {
                    return Decision::deny();
                };
                match groups.iter().find(|g| self.group_matches(g, attrs)) {
                    Some(group) => Decision {
                        effect: Effect::Allow,
                        matched_scope: Some(group.clone()),
                    },
                    None => Decision::deny(),
                }
            }
            None => Decision::deny(),
        }
    }

    /// Depends-on test used by dependency-driven invalidation.
    pub fn depends_on(&self, id: &DefinitionId) -> bool {
        self.dependencies.contains(id)
    }

    /// Permissions with an allow effect, for diagnostics.
    pub fn allowed_permissions(&self) -> impl Iterator<Item = &PermissionKey> {
        self.entries
            .iter()
            .filter(|(_, e)| e.effect == Effect::Allow)
            .map(|(k, _)| k)
    }

    fn group_matches(&self, group: &AttributeGroupName, attrs: &ResourceAttributes) -> bool {
        // An unknown group never matches.
        self.attribute_groups
            .get(group)
            .is_some_and(|selector| selector.matches(attrs))
    }
}
