//! dirgate Core: definition types, bundle schema, and compiled ACLs.
//!
//! This crate has no internal dirgate dependencies (dependency level 0).
//!
//! # Modules
//!
//! - [`error`]: Error types and Result alias
//! - [`ids`]: Natural keys, principals, and definition ids
//! - [`model`]: Permissions, attribute groups, policies, assignments
//! - [`definitions`]: The full definition state and its mutations
//! - [`bundle`]: The declarative bundle the registry syncs from
//! - [`compiled`]: Compiled per-principal tables and decisions

pub mod bundle;
pub mod compiled;
pub mod definitions;
pub mod error;
pub mod ids;
pub mod model;

// Re-export key types at crate root for convenience
pub use bundle::{DefinitionsBundle, ValidatedBundle};
pub use compiled::{CompiledAcl, CompiledPermission, Decision, Scope};
pub use definitions::{Definitions, Mutation};
pub use error::{DefinitionError, Error, Result};
pub use ids::{
    AssignmentKey, AttributeGroupName, DefinitionId, PermissionKey, PolicyName, PrincipalRef,
    PrincipalType,
};
pub use model::{
    AclAssignment, AttributeGroup, AttributeSelector, Effect, Origin, Permission, Policy,
    ResourceAttributes, Rule,
};
