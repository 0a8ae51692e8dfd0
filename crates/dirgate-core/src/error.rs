//! Error types for dirgate-core.

use thiserror::Error;

/// Result type alias for dirgate-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in dirgate-core
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A definition or bundle violates the schema.
    #[error("Definition error: {0}")]
    Definition(#[from] DefinitionError),

    /// A bundle document could not be parsed.
    #[error("Parse error: {message}")]
    Parse {
        /// Parser message, including the format that was attempted
        message: String,
    },
}

impl Error {
    /// Creates a new parse error.
    pub fn parse<S: Into<String>>(message: S) -> Self {
        Error::Parse {
            message: message.into(),
        }
    }
}

/// Schema violations in a definitions bundle or in the definition state.
///
/// A sync that produces any of these aborts before touching the store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DefinitionError {
    /// Two entities of the same kind share a natural key.
    #[error("duplicate {kind} '{key}'")]
    DuplicateKey {
        /// Entity kind ("permission", "policy", ...)
        kind: &'static str,
        /// The repeated key
        key: String,
    },

    /// Two rules in one policy share a priority.
    #[error("policy '{policy}' has more than one rule with priority {priority}")]
    DuplicatePriority {
        /// Policy name
        policy: String,
        /// The repeated priority
        priority: u32,
    },

    /// A reference points at an entity that does not exist.
    #[error("{from} references unknown {kind} '{name}'")]
    DanglingReference {
        /// The referring entity, e.g. `policy 'admins-policy'`
        from: String,
        /// Kind of the missing entity
        kind: &'static str,
        /// Name of the missing entity
        name: String,
    },

    /// An attribute group selector is malformed.
    #[error("attribute group '{group}' is invalid: {reason}")]
    InvalidSelector {
        /// Attribute group name
        group: String,
        /// What is wrong with it
        reason: String,
    },

    /// A key or name is empty or contains forbidden characters.
    #[error("invalid {kind} name '{name}'")]
    InvalidName {
        /// Entity kind
        kind: &'static str,
        /// The offending name
        name: String,
    },

    /// A rule grants or denies nothing.
    #[error("policy '{policy}' rule with priority {priority} lists no permissions")]
    EmptyRule {
        /// Policy name
        policy: String,
        /// Rule priority
        priority: u32,
    },
}

impl DefinitionError {
    /// Creates a duplicate-key error.
    pub fn duplicate<K: Into<String>>(kind: &'static str, key: K) -> Self {
        DefinitionError::DuplicateKey {
            kind,
            key: key.into(),
        }
    }

    /// Creates a dangling-reference error.
    pub fn dangling<F, N>(from: F, kind: &'static str, name: N) -> Self
    where
        F: Into<String>,
        N: Into<String>,
    {
        DefinitionError::DanglingReference {
            from: from.into(),
            kind,
            name: name.into(),
        }
    }

    /// Creates an invalid-selector error.
    pub fn invalid_selector<G, R>(group: G, reason: R) -> Self
    where
        G: Into<String>,
        R: Into<String>,
    {
        DefinitionError::InvalidSelector {
            group: group.into(),
            reason: reason.into(),
        }
    }
}
