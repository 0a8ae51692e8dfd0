//! # dirgate-acl
//!
//! Compiles permission definitions into per-principal ACLs, caches them in a
//! shared key-value cache, and answers per-request checks against them.
//!
//! # Modules
//!
//! - [`compiler`]: Merges a principal's policies into a [`CompiledAcl`](dirgate_core::CompiledAcl)
//! - [`cache`]: Generation-stamped cache with single-flight compiles
//! - [`generation`]: Sync floor and invalidation log
//! - [`guard`]: Fail-closed request checks
//! - [`registry`]: Bundle synchronization
//! - [`admin`]: Admin mutations with protection rules
//! - [`engine`]: Wiring and lifecycle
//!
//! A check flows guard → cache → (on miss) membership closure → store →
//! compiler, and every failure on that path resolves to deny.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![forbid(unsafe_code)]

pub mod admin;
pub mod cache;
pub mod catalog;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod error;
pub mod generation;
pub mod guard;
pub mod membership;
pub mod registry;
pub mod singleflight;

pub use admin::AclAdmin;
pub use cache::{AclCache, CacheStats, InvalidationReport};
pub use catalog::PermissionCatalog;
pub use compiler::AclCompiler;
pub use config::{AclConfig, CacheConfig, EngineConfig, GuardConfig};
pub use engine::{AclEngine, AclEngineBuilder, EngineState};
pub use error::{AclError, ProtectionReason, Result};
pub use generation::Generation;
pub use guard::AclGuard;
pub use membership::{MembershipError, MembershipProvider, StaticMembership};
pub use registry::{PermissionRegistry, REGISTRY_ACTOR, SyncReport};
pub use singleflight::SingleFlight;
