//! # dirgate-redis
//!
//! Key-value cache handle used by the ACL cache.
//!
//! The [`CacheClient`] trait is the whole contract: byte values under string
//! keys with an optional TTL, multi-key delete, prefix scans, and an atomic
//! counter maximum. A client is
//! built once at startup and passed to whatever needs it; there is no global
//! connection.
//!
//! - [`RedisCacheClient`]: production backend over a Redis `ConnectionManager`
//! - [`MemoryCacheClient`]: in-process backend for tests and single-node use

#![warn(missing_docs)]
#![warn(clippy::all)]
#![forbid(unsafe_code)]

pub mod error;
pub mod memory;
pub mod redis_client;

use async_trait::async_trait;
use std::time::Duration;

pub use error::{CacheError, Result};
pub use memory::MemoryCacheClient;
pub use redis_client::RedisCacheClient;

/// Handle to an external key-value cache.
#[async_trait]
pub trait CacheClient: Send + Sync {
    /// Reads a value; `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Writes a value, expiring it after `ttl` when given.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;

    /// Deletes keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64>;

    /// Lists every live key starting with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Atomically stores `max(current, value)` under `key` and returns the
    /// stored number. A missing or non-numeric value counts as absent.
    async fn set_max(&self, key: &str, value: u64) -> Result<u64>;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;
}
