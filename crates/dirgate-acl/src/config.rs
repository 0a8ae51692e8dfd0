//! Tunables for the cache, guard, and engine.
//!
//! All sections deserialize with defaults, so a config file only needs the
//! values it changes.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// ACL cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Prefix of every key the cache writes.
    pub key_prefix: String,
    /// TTL backstop for compiled entries, in seconds.
    pub ttl_secs: u64,
    /// Deadline for each cache round-trip, in milliseconds.
    pub op_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: "dirgate:acl:".to_string(),
            ttl_secs: 3600,
            op_timeout_ms: 250,
        }
    }
}

impl CacheConfig {
    /// Entry TTL.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Per-call cache deadline.
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

/// Guard settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Deadline for one check, in milliseconds; an expired check denies.
    pub check_timeout_ms: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            check_timeout_ms: 2000,
        }
    }
}

impl GuardConfig {
    /// Per-check deadline.
    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }
}

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How often the published sync floor is re-read, in milliseconds.
    pub floor_refresh_ms: u64,
    /// Retries of a registry or admin commit that lost an optimistic race.
    pub commit_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            floor_refresh_ms: 5000,
            commit_retries: 3,
        }
    }
}

impl EngineConfig {
    /// Floor refresh period.
    pub fn floor_refresh(&self) -> Duration {
        Duration::from_millis(self.floor_refresh_ms.max(1))
    }
}

/// Every ACL setting, grouped by component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AclConfig {
    /// Cache section.
    pub cache: CacheConfig,
    /// Guard section.
    pub guard: GuardConfig,
    /// Engine section.
    pub engine: EngineConfig,
}
