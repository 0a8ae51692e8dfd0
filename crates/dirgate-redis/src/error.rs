//! Error types for dirgate-redis.

use thiserror::Error;

/// Result type alias for cache client operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors returned by a cache client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CacheError {
    /// The cache could not be reached or refused the command.
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    /// The cache URL or client settings are invalid.
    #[error("Cache configuration error: {0}")]
    Config(String),
}

impl CacheError {
    /// Creates an unavailable error from any displayable cause.
    pub fn unavailable(cause: impl std::fmt::Display) -> Self {
        Self::Unavailable(cause.to_string())
    }

    /// Returns whether retrying the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        Self::Unavailable(err.to_string())
    }
}
