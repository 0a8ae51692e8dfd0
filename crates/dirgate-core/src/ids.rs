//! Identifier types for definitions and principals.
//!
//! Permission keys, policy names, and attribute-group names are natural keys:
//! the registry matches bundle entries against stored rows by these values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DefinitionError;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal, $valid:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates the identifier without validation.
            pub fn new<S: Into<String>>(value: S) -> Self {
                Self(value.into())
            }

            /// Creates the identifier, rejecting malformed values.
            pub fn parse<S: Into<String>>(value: S) -> Result<Self, DefinitionError> {
                let value = value.into();
                if $valid(&value) {
                    Ok(Self(value))
                } else {
                    Err(DefinitionError::InvalidName {
                        kind: $kind,
                        name: value,
                    })
                }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Key of a permission, e.g. `user.delete`.
    PermissionKey,
    "permission",
    is_valid_permission_key
);

string_id!(
    /// Name of a policy.
    PolicyName,
    "policy",
    is_valid_name
);

string_id!(
    /// Name of an attribute group.
    AttributeGroupName,
    "attribute group",
    is_valid_name
);

/// Permission keys are lowercase dotted paths: `user.delete`, `dhcp.lease_write`.
fn is_valid_permission_key(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with('.')
        && !s.ends_with('.')
        && !s.contains("..")
        && s.chars().all(|c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-')
        })
}

fn is_valid_name(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

// ============================================================================
// Principals
// ============================================================================

/// Kind of principal an assignment can bind to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalType {
    /// A directory user.
    User,
    /// A directory group.
    Group,
    /// A role.
    Role,
}

impl PrincipalType {
    /// Lowercase name used in keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Group => "group",
            Self::Role => "role",
        }
    }
}

impl fmt::Display for PrincipalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrincipalType {
    type Err = DefinitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "group" => Ok(Self::Group),
            "role" => Ok(Self::Role),
            other => Err(DefinitionError::InvalidName {
                kind: "principal type",
                name: other.to_string(),
            }),
        }
    }
}

/// Reference to a user, group, or role.
///
/// Serialized as `type:id` (for example `role:admins`), which is also the
/// form used for cache keys. Parsing a bare id yields a user.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PrincipalRef {
    /// Principal kind.
    pub principal_type: PrincipalType,
    /// Directory identifier of the principal.
    pub principal_id: String,
}

impl PrincipalRef {
    /// Creates a principal reference.
    pub fn new<S: Into<String>>(principal_type: PrincipalType, principal_id: S) -> Self {
        Self {
            principal_type,
            principal_id: principal_id.into(),
        }
    }

    /// A user principal.
    pub fn user<S: Into<String>>(id: S) -> Self {
        Self::new(PrincipalType::User, id)
    }

    /// A group principal.
    pub fn group<S: Into<String>>(id: S) -> Self {
        Self::new(PrincipalType::Group, id)
    }

    /// A role principal.
    pub fn role<S: Into<String>>(id: S) -> Self {
        Self::new(PrincipalType::Role, id)
    }
}

impl fmt::Display for PrincipalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.principal_type, self.principal_id)
    }
}

impl FromStr for PrincipalRef {
    type Err = DefinitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (principal_type, id) = match s.split_once(':') {
            Some((kind, id)) => (kind.parse()?, id),
            None => (PrincipalType::User, s),
        };
        if id.is_empty() || id.chars().any(char::is_whitespace) {
            return Err(DefinitionError::InvalidName {
                kind: "principal",
                name: s.to_string(),
            });
        }
        Ok(Self::new(principal_type, id))
    }
}

impl TryFrom<String> for PrincipalRef {
    type Error = DefinitionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PrincipalRef> for String {
    fn from(p: PrincipalRef) -> Self {
        p.to_string()
    }
}

/// Natural key of an assignment: one policy bound to one principal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssignmentKey {
    /// The bound principal.
    pub principal: PrincipalRef,
    /// The bound policy.
    pub policy: PolicyName,
}

impl AssignmentKey {
    /// Creates an assignment key.
    pub fn new(principal: PrincipalRef, policy: PolicyName) -> Self {
        Self { principal, policy }
    }
}

impl fmt::Display for AssignmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.principal, self.policy)
    }
}

// ============================================================================
// DefinitionId
// ============================================================================

/// Identifier of anything a compiled ACL can depend on.
///
/// Invalidation is keyed on these: a mutation of the identified definition
/// evicts every cached ACL whose dependency set contains it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionId {
    /// A permission.
    Permission(PermissionKey),
    /// An attribute group.
    AttributeGroup(AttributeGroupName),
    /// A policy.
    Policy(PolicyName),
    /// An assignment.
    Assignment(AssignmentKey),
    /// The set of assignments bound to a principal.
    Principal(PrincipalRef),
}

impl DefinitionId {
    /// Entity kind, for logs and audit records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Permission(_) => "permission",
            Self::AttributeGroup(_) => "attribute_group",
            Self::Policy(_) => "policy",
            Self::Assignment(_) => "assignment",
            Self::Principal(_) => "principal",
        }
    }
}

impl fmt::Display for DefinitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Permission(key) => write!(f, "permission:{key}"),
            Self::AttributeGroup(name) => write!(f, "attribute_group:{name}"),
            Self::Policy(name) => write!(f, "policy:{name}"),
            Self::Assignment(key) => write!(f, "assignment:{key}"),
            Self::Principal(p) => write!(f, "principal:{p}"),
        }
    }
}
