//! Error types for dirgate-acl.
//!
//! Every variant resolves to a deny at the guard; the variants only differ in
//! what gets logged and whether a caller may retry.

use dirgate_core::DefinitionError;
use dirgate_redis::CacheError;
use std::fmt;
use thiserror::Error;

use crate::membership::MembershipError;

/// Result type alias for dirgate-acl operations
pub type Result<T> = std::result::Result<T, AclError>;

/// Why a protected mutation was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtectionReason {
    /// The assignment is a bootstrap assignment.
    Builtin,
    /// Other definitions still reference the target.
    InUse {
        /// The referencing definitions, e.g. `policy:admins-policy`
        by: Vec<String>,
    },
}

impl fmt::Display for ProtectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin => f.write_str("builtin assignments cannot be changed"),
            Self::InUse { by } => write!(f, "still referenced by {}", by.join(", ")),
        }
    }
}

/// Errors that can occur in dirgate-acl
///
/// Cloneable so single-flight followers can share the leader's failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AclError {
    /// A bundle or mutation violates the definition schema.
    #[error("Definition error: {0}")]
    Definition(#[from] DefinitionError),

    /// A check named a permission nobody declared.
    #[error("Unknown permission: {key}")]
    UnknownPermission {
        /// The undeclared key
        key: String,
    },

    /// Membership resolution or the definition read failed during a compile.
    #[error("Compile error: {message}")]
    Compile {
        /// Underlying failure
        message: String,
        /// Whether retrying may succeed
        retryable: bool,
    },

    /// The external cache could not be reached.
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// A builtin assignment or an in-use definition was targeted.
    #[error("Protected definition {target}: {reason}")]
    BuiltinProtection {
        /// The definition the mutation targeted
        target: String,
        /// Why it was refused
        reason: ProtectionReason,
    },

    /// The mutation target does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A create targeted an existing definition.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The definition store failed.
    #[error("Store error: {0}")]
    Store(dirgate_store::Error),

    /// An operation exceeded its deadline.
    #[error("Timed out after {millis}ms")]
    Timeout {
        /// The deadline that elapsed
        millis: u64,
    },

    /// The guard decided deny.
    #[error("Permission denied: {principal} may not {permission}")]
    PermissionDenied {
        /// The requesting principal
        principal: String,
        /// The permission that was checked
        permission: String,
    },
}

impl AclError {
    /// Creates a compile error.
    pub fn compile(message: impl Into<String>, retryable: bool) -> Self {
        Self::Compile {
            message: message.into(),
            retryable,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(after: std::time::Duration) -> Self {
        Self::Timeout {
            millis: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Creates an in-use protection error.
    pub fn in_use(target: impl fmt::Display, by: Vec<String>) -> Self {
        Self::BuiltinProtection {
            target: target.to_string(),
            reason: ProtectionReason::InUse { by },
        }
    }

    /// Returns whether retrying the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Compile { retryable, .. } => *retryable,
            Self::CacheUnavailable(_) | Self::Timeout { .. } => true,
            Self::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<dirgate_store::Error> for AclError {
    fn from(err: dirgate_store::Error) -> Self {
        match err {
            dirgate_store::Error::Integrity(e) => Self::Definition(e),
            other => Self::Store(other),
        }
    }
}

impl From<CacheError> for AclError {
    fn from(err: CacheError) -> Self {
        Self::CacheUnavailable(err.to_string())
    }
}

impl From<MembershipError> for AclError {
    fn from(err: MembershipError) -> Self {
        Self::compile(err.to_string(), true)
    }
}
