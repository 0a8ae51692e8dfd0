//! # dirgate-store
//!
//! Canonical storage of permissions, attribute groups, policies, and
//! assignments, plus the audit sinks that receive change records.
//!
//! Every store exposes the same optimistic model: read a [`Snapshot`], build
//! a batch of [`Mutation`]s, and [`DefinitionStore::commit`] them against the
//! snapshot's revision. A commit either applies the whole batch or nothing.
//! The revision is monotonic and doubles as the generation stamp of compiled
//! ACLs.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![forbid(unsafe_code)]

pub mod audit;
pub mod error;
pub mod file;
pub mod memory;

use async_trait::async_trait;
use dirgate_core::{Definitions, Mutation, PrincipalRef};
use std::collections::BTreeSet;
use std::sync::Arc;

pub use audit::{
    AuditAction, AuditError, AuditRecord, AuditSink, LogAuditSink, MemoryAuditSink,
    append_best_effort,
};
pub use error::{Error, Result};
pub use file::FileDefinitionStore;
pub use memory::MemoryDefinitionStore;

/// Definitions as of one store revision.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Revision the definitions were read at.
    pub revision: u64,
    /// The definitions; shared, never mutated in place.
    pub definitions: Arc<Definitions>,
}

/// Durable, multi-writer storage of definitions.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Reads the full definition state.
    async fn snapshot(&self) -> Result<Snapshot>;

    /// Reads the definitions needed to compile ACLs for `principals`.
    ///
    /// Backends with indexed storage override this to avoid a full read.
    async fn load_for(&self, principals: &BTreeSet<PrincipalRef>) -> Result<Snapshot> {
        let snapshot = self.snapshot().await?;
        Ok(Snapshot {
            revision: snapshot.revision,
            definitions: Arc::new(snapshot.definitions.restricted_to(principals)),
        })
    }

    /// Applies `mutations` atomically if the store is still at `base_revision`.
    ///
    /// Returns the new revision. An empty batch returns the current revision
    /// without advancing it.
    async fn commit(&self, base_revision: u64, mutations: Vec<Mutation>) -> Result<u64>;

    /// Current revision.
    async fn revision(&self) -> Result<u64>;

    /// Whether committed state survives a restart.
    fn is_durable(&self) -> bool;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;
}

/// Shared commit logic: check the base revision, apply, verify integrity.
pub(crate) fn prepare_commit(
    current_revision: u64,
    current: &Definitions,
    base_revision: u64,
    mutations: Vec<Mutation>,
) -> Result<(u64, Definitions)> {
    if base_revision != current_revision {
        return Err(Error::Conflict {
            expected: base_revision,
            actual: current_revision,
        });
    }
    let next = current.with_mutations(mutations)?;
    Ok((current_revision + 1, next))
}
