//! Declarative definitions bundle.
//!
//! The bundle is the wire format the registry syncs from. It is parsed with
//! `deny_unknown_fields` and validated into typed definitions before anything
//! is compared against the store.
//!
//! # Example
//!
//! ```rust
//! use dirgate_core::bundle::DefinitionsBundle;
//!
//! let bundle = DefinitionsBundle::from_json_str(r#"{
//!     "permissions": [{"key": "user.delete", "category": "user"}],
//!     "policies": [{
//!         "name": "admins-policy",
//!         "rules": [{"effect": "allow", "permissions": ["user.delete"], "priority": 1}]
//!     }],
//!     "assignments": [{
//!         "principal_type": "role",
//!         "principal_id": "admins",
//!         "policy": "admins-policy"
//!     }]
//! }"#).unwrap();
//!
//! let validated = bundle.validate().unwrap();
//! assert_eq!(validated.policies.len(), 1);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::error::{DefinitionError, Error, Result};
use crate::ids::{
    AssignmentKey, AttributeGroupName, PermissionKey, PolicyName, PrincipalRef, PrincipalType,
};
use crate::model::{
    AclAssignment, AttributeGroup, AttributeSelector, Effect, Origin, Permission, Policy, Rule,
};

/// Bundle format version understood by this crate.
pub const BUNDLE_VERSION: u32 = 1;

/// A definitions bundle as written by service authors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefinitionsBundle {
    /// Format version; defaults to the current one.
    #[serde(default = "default_version")]
    pub version: u32,
    /// Declared permissions.
    #[serde(default)]
    pub permissions: Vec<PermissionDef>,
    /// Declared attribute groups.
    #[serde(default)]
    pub attribute_groups: Vec<AttributeGroupDef>,
    /// Declared policies.
    #[serde(default)]
    pub policies: Vec<PolicyDef>,
    /// Declared assignments.
    #[serde(default)]
    pub assignments: Vec<AssignmentDef>,
}

fn default_version() -> u32 {
    BUNDLE_VERSION
}

/// Permission entry of a bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PermissionDef {
    /// Permission key.
    pub key: String,
    /// Category.
    pub category: String,
}

/// Attribute group entry of a bundle. Exactly one of `pattern` or `members`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttributeGroupDef {
    /// Group name.
    pub name: String,
    /// Attribute name to glob pattern.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<BTreeMap<String, String>>,
    /// Attribute name to accepted values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members: Option<BTreeMap<String, Vec<String>>>,
}

/// Policy entry of a bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyDef {
    /// Policy name.
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Rules in any order.
    pub rules: Vec<RuleDef>,
}

/// Rule entry of a policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDef {
    /// Allow or deny.
    pub effect: Effect,
    /// Permission keys.
    pub permissions: Vec<String>,
    /// Optional attribute group name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_group: Option<String>,
    /// Unique within the policy.
    pub priority: u32,
}

/// Assignment entry of a bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssignmentDef {
    /// Kind of principal.
    pub principal_type: PrincipalType,
    /// Principal identifier.
    pub principal_id: String,
    /// Policy name.
    pub policy: String,
    /// Bootstrap assignment that resists admin deletion.
    #[serde(default)]
    pub builtin: bool,
}

/// A bundle that passed validation, in stored form.
///
/// Every entity carries [`Origin::Registry`]. References to entities outside
/// the bundle are not checked here; the registry resolves them against the
/// store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidatedBundle {
    /// Permissions by key.
    pub permissions: BTreeMap<PermissionKey, Permission>,
    /// Attribute groups by name.
    pub attribute_groups: BTreeMap<AttributeGroupName, AttributeGroup>,
    /// Policies by name.
    pub policies: BTreeMap<PolicyName, Policy>,
    /// Assignments by key.
    pub assignments: BTreeMap<AssignmentKey, AclAssignment>,
}

impl DefinitionsBundle {
    /// Parses a JSON bundle.
    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| Error::parse(format!("invalid JSON bundle: {e}")))
    }

    /// Parses a TOML bundle.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::parse(format!("invalid TOML bundle: {e}")))
    }

    /// Reads a bundle file, choosing the format from the extension
    /// (`.toml` is TOML, anything else JSON).
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::parse(format!("cannot read {}: {e}", path.display())))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&content),
            _ => Self::from_json_str(&content),
        }
    }

    /// Validates names, duplicates, priorities, and selectors.
    pub fn validate(&self) -> std::result::Result<ValidatedBundle, DefinitionError> {
        if self.version != BUNDLE_VERSION {
            return Err(DefinitionError::InvalidName {
                kind: "bundle version",
                name: self.version.to_string(),
            });
        }

        let mut out = ValidatedBundle::default();

        for def in &self.permissions {
            let key = PermissionKey::parse(def.key.trim())?;
            let permission = Permission::new(key.clone(), def.category.trim());
            if out.permissions.insert(key.clone(), permission).is_some() {
                return Err(DefinitionError::duplicate("permission", key.as_str()));
            }
        }

        for def in &self.attribute_groups {
            let group = def.to_group()?;
            let name = group.name.clone();
            if out.attribute_groups.insert(name.clone(), group).is_some() {
                return Err(DefinitionError::duplicate("attribute group", name.as_str()));
            }
        }

        for def in &self.policies {
            let policy = def.to_policy()?;
            let name = policy.name.clone();
            if out.policies.insert(name.clone(), policy).is_some() {
                return Err(DefinitionError::duplicate("policy", name.as_str()));
            }
        }

        for def in &self.assignments {
            let assignment = def.to_assignment()?;
            let key = assignment.key();
            if out.assignments.insert(key.clone(), assignment).is_some() {
                return Err(DefinitionError::duplicate("assignment", key.to_string()));
            }
        }

        Ok(out)
    }
}

impl AttributeGroupDef {
    fn to_group(&self) -> std::result::Result<AttributeGroup, DefinitionError> {
        let name = AttributeGroupName::parse(self.name.trim())?;
        let selector = match (&self.pattern, &self.members) {
            (Some(pattern), None) => AttributeSelector::Pattern(pattern.clone()),
            (None, Some(members)) => AttributeSelector::Members(
                members
                    .iter()
                    .map(|(attr, values)| (attr.clone(), values.iter().cloned().collect()))
                    .collect(),
            ),
            (Some(_), Some(_)) => {
                return Err(DefinitionError::invalid_selector(
                    name.as_str(),
                    "declare either pattern or members, not both",
                ));
            }
            (None, None) => {
                return Err(DefinitionError::invalid_selector(
                    name.as_str(),
                    "declare pattern or members",
                ));
            }
        };
        selector.validate(&name)?;
        Ok(AttributeGroup {
            name,
            selector,
            origin: Origin::Registry,
        })
    }
}

impl PolicyDef {
    fn to_policy(&self) -> std::result::Result<Policy, DefinitionError> {
        let name = PolicyName::parse(self.name.trim())?;
        let mut rules = Vec::with_capacity(self.rules.len());
        for def in &self.rules {
            let permissions = def
                .permissions
                .iter()
                .map(|k| PermissionKey::parse(k.trim()))
                .collect::<std::result::Result<BTreeSet<_>, _>>()?;
            let attribute_group = def
                .attribute_group
                .as_deref()
                .map(|g| AttributeGroupName::parse(g.trim()))
                .transpose()?;
            rules.push(Rule {
                effect: def.effect,
                permissions,
                attribute_group,
                priority: def.priority,
            });
        }
        let description = self
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        Policy::new(name, description, rules, Origin::Registry)
    }
}

impl AssignmentDef {
    fn to_assignment(&self) -> std::result::Result<AclAssignment, DefinitionError> {
        let id = self.principal_id.trim();
        if id.is_empty() || id.chars().any(char::is_whitespace) {
            return Err(DefinitionError::InvalidName {
                kind: "principal",
                name: self.principal_id.clone(),
            });
        }
        Ok(AclAssignment {
            principal: PrincipalRef::new(self.principal_type, id),
            policy: PolicyName::parse(self.policy.trim())?,
            builtin: self.builtin,
            origin: Origin::Registry,
        })
    }
}
