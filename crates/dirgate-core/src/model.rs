//! Stored definition types: permissions, attribute groups, policies, assignments.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::DefinitionError;
use crate::ids::{AssignmentKey, AttributeGroupName, PermissionKey, PolicyName, PrincipalRef};

/// Attributes of the resource a request acts on, e.g. `{dept: "eng"}`.
pub type ResourceAttributes = BTreeMap<String, String>;

/// Outcome of a rule or decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    /// Grant the permission.
    Allow,
    /// Refuse the permission.
    Deny,
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::Deny => write!(f, "deny"),
        }
    }
}

/// Who owns a definition.
///
/// Registry-owned definitions are reconciled against every bundle sync and
/// pruned when a bundle stops declaring them. Admin-created ones are only
/// changed through the admin surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Created by a bundle sync.
    #[default]
    Registry,
    /// Created through the admin mutation surface.
    Admin,
}

/// A declared permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Immutable key, e.g. `user.delete`.
    pub key: PermissionKey,
    /// Free-form grouping used by admin UIs, e.g. `user`.
    pub category: String,
    /// Owner of the definition.
    #[serde(default)]
    pub origin: Origin,
}

impl Permission {
    /// Creates a registry-owned permission.
    pub fn new<C: Into<String>>(key: PermissionKey, category: C) -> Self {
        Self {
            key,
            category: category.into(),
            origin: Origin::Registry,
        }
    }
}

// ============================================================================
// Attribute groups
// ============================================================================

/// Match a glob-style pattern against a value.
///
/// `*` matches anything, `foo*` matches values starting with `foo`, and any
/// other pattern must match exactly.
pub fn pattern_matches(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        true
    } else if let Some(prefix) = pattern.strip_suffix('*') {
        value.starts_with(prefix)
    } else {
        pattern == value
    }
}

/// How an attribute group decides whether a resource belongs to it.
///
/// Every attribute named by the selector must be present on the resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeSelector {
    /// Attribute name to glob pattern.
    Pattern(BTreeMap<String, String>),
    /// Attribute name to the set of accepted values.
    Members(BTreeMap<String, BTreeSet<String>>),
}

impl AttributeSelector {
    /// Returns `true` when `attrs` satisfies every constraint of the selector.
    pub fn matches(&self, attrs: &ResourceAttributes) -> bool {
        match self {
            Self::Pattern(patterns) => patterns.iter().all(|(name, pattern)| {
                attrs
                    .get(name)
                    .is_some_and(|value| pattern_matches(pattern, value))
            }),
            Self::Members(members) => members.iter().all(|(name, accepted)| {
                attrs.get(name).is_some_and(|value| accepted.contains(value))
            }),
        }
    }

    /// Checks that the selector constrains something.
    pub fn validate(&self, group: &AttributeGroupName) -> Result<(), DefinitionError> {
        let empty = match self {
            Self::Pattern(patterns) => patterns.is_empty(),
            Self::Members(members) => members.is_empty(),
        };
        if empty {
            return Err(DefinitionError::invalid_selector(
                group.as_str(),
                "selector names no attributes",
            ));
        }
        let blank_name = match self {
            Self::Pattern(patterns) => patterns.keys().any(|k| k.trim().is_empty()),
            Self::Members(members) => members.keys().any(|k| k.trim().is_empty()),
        };
        if blank_name {
            return Err(DefinitionError::invalid_selector(
                group.as_str(),
                "attribute names must not be blank",
            ));
        }
        if let Self::Members(members) = self {
            if let Some((name, _)) = members.iter().find(|(_, values)| values.is_empty()) {
                return Err(DefinitionError::invalid_selector(
                    group.as_str(),
                    format!("attribute '{name}' accepts no values"),
                ));
            }
        }
        Ok(())
    }
}

/// Named resource scope that can restrict a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeGroup {
    /// Group name.
    pub name: AttributeGroupName,
    /// Membership test.
    pub selector: AttributeSelector,
    /// Owner of the definition.
    #[serde(default)]
    pub origin: Origin,
}

// ============================================================================
// Policies
// ============================================================================

/// One rule of a policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Allow or deny.
    pub effect: Effect,
    /// Permissions the rule applies to.
    pub permissions: BTreeSet<PermissionKey>,
    /// Optional resource scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_group: Option<AttributeGroupName>,
    /// Unique within the owning policy.
    pub priority: u32,
}

/// Named, priority-ordered set of rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Policy name.
    pub name: PolicyName,
    /// Optional human description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Rules, ordered by ascending priority.
    pub rules: Vec<Rule>,
    /// Owner of the definition.
    #[serde(default)]
    pub origin: Origin,
}

impl Policy {
    /// Builds a policy, ordering rules by priority and enforcing the rule invariants.
    pub fn new(
        name: PolicyName,
        description: Option<String>,
        mut rules: Vec<Rule>,
        origin: Origin,
    ) -> Result<Self, DefinitionError> {
        rules.sort_by_key(|r| r.priority);
        let policy = Self {
            name,
            description,
            rules,
            origin,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Checks that priorities are unique and no rule is empty.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        let mut seen = BTreeSet::new();
        for rule in &self.rules {
            if !seen.insert(rule.priority) {
                return Err(DefinitionError::DuplicatePriority {
                    policy: self.name.to_string(),
                    priority: rule.priority,
                });
            }
            if rule.permissions.is_empty() {
                return Err(DefinitionError::EmptyRule {
                    policy: self.name.to_string(),
                    priority: rule.priority,
                });
            }
        }
        Ok(())
    }

    /// Permissions referenced by any rule.
    pub fn permission_keys(&self) -> impl Iterator<Item = &PermissionKey> {
        self.rules.iter().flat_map(|r| r.permissions.iter())
    }

    /// Attribute groups referenced by any rule.
    pub fn attribute_groups(&self) -> impl Iterator<Item = &AttributeGroupName> {
        self.rules.iter().filter_map(|r| r.attribute_group.as_ref())
    }
}

// ============================================================================
// Assignments
// ============================================================================

/// Binding of a policy to a principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclAssignment {
    /// The bound principal.
    pub principal: PrincipalRef,
    /// The bound policy.
    pub policy: PolicyName,
    /// Bootstrap assignment; rejected by admin update and delete.
    #[serde(default)]
    pub builtin: bool,
    /// Owner of the definition.
    #[serde(default)]
    pub origin: Origin,
}

impl AclAssignment {
    /// Natural key of the assignment.
    pub fn key(&self) -> AssignmentKey {
        AssignmentKey::new(self.principal.clone(), self.policy.clone())
    }
}
