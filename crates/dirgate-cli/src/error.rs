//! Error types for dirgate-cli

use std::path::Path;
use thiserror::Error;

/// Result type alias for dirgate-cli operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in dirgate-cli
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Bundle parse failure.
    #[error(transparent)]
    Core(#[from] dirgate_core::Error),

    /// Schema violation.
    #[error(transparent)]
    Definition(#[from] dirgate_core::DefinitionError),

    /// Store failure.
    #[error(transparent)]
    Store(#[from] dirgate_store::Error),

    /// Cache connection failure.
    #[error(transparent)]
    Cache(#[from] dirgate_redis::CacheError),

    /// Engine, registry, or guard failure.
    #[error(transparent)]
    Acl(#[from] dirgate_acl::AclError),

    /// Bad or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Bad command-line argument.
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// Filesystem failure.
    #[error("I/O error at {path}: {message}")]
    Io {
        /// Path involved
        path: String,
        /// Underlying error
        message: String,
    },
}

impl Error {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Wraps an I/O error with the path it concerns.
    pub fn io_with_path(err: std::io::Error, path: &Path) -> Self {
        Self::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}
