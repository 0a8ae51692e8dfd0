//! Error types for dirgate-store.

use dirgate_core::DefinitionError;
use thiserror::Error;

/// Result type alias for dirgate-store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in dirgate-store
///
/// Payloads are plain strings so errors can be cloned and shared between
/// callers awaiting the same operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Another writer committed since the caller's snapshot.
    #[error("Revision conflict: expected {expected}, store is at {actual}")]
    Conflict {
        /// Revision the caller based its changes on
        expected: u64,
        /// Current store revision
        actual: u64,
    },

    /// The committed state would violate a definition invariant.
    #[error("Integrity error: {0}")]
    Integrity(#[from] DefinitionError),

    /// Reading or writing the backing file failed.
    #[error("I/O error on {path}: {message}")]
    Io {
        /// File involved
        path: String,
        /// Underlying error message
        message: String,
    },

    /// The persisted document could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The backend cannot be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl Error {
    /// Creates an I/O error for a path.
    pub fn io_with_path(err: std::io::Error, path: &std::path::Path) -> Self {
        Error::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    /// Returns whether retrying the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Conflict { .. } => true,
            Error::Io { .. } => true,
            Error::Unavailable(_) => true,
            Error::Integrity(_) => false,
            Error::Serialization(_) => false,
        }
    }
}
