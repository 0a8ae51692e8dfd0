//! Membership-closure providers.
//!
//! The compiler consumes a flat closure and never walks memberships itself.
//! Resolving nested groups (and any cycles among them) is the provider's job.

use async_trait::async_trait;
use dirgate_core::PrincipalRef;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use tokio::sync::RwLock;

/// Failure to resolve a membership closure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MembershipError {
    /// The directory could not be queried.
    #[error("Membership provider unavailable: {0}")]
    Unavailable(String),
}

/// Source of transitive group and role memberships.
#[async_trait]
pub trait MembershipProvider: Send + Sync {
    /// Every group and role `principal` belongs to, directly or transitively.
    ///
    /// The subject itself need not be included.
    async fn closure(
        &self,
        principal: &PrincipalRef,
    ) -> std::result::Result<BTreeSet<PrincipalRef>, MembershipError>;
}

/// Provider over an in-memory membership table.
///
/// Stores direct memberships and expands them breadth-first, skipping
/// principals already visited so cyclic tables terminate.
#[derive(Debug, Default)]
pub struct StaticMembership {
    direct: RwLock<HashMap<PrincipalRef, BTreeSet<PrincipalRef>>>,
}

impl StaticMembership {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from `(member, parents)` pairs.
    pub fn from_pairs<I, P>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (PrincipalRef, P)>,
        P: IntoIterator<Item = PrincipalRef>,
    {
        let direct = pairs
            .into_iter()
            .map(|(member, parents)| (member, parents.into_iter().collect()))
            .collect();
        Self {
            direct: RwLock::new(direct),
        }
    }

    /// Adds `member` to `parent`.
    pub async fn add(&self, member: PrincipalRef, parent: PrincipalRef) {
        self.direct
            .write()
            .await
            .entry(member)
            .or_default()
            .insert(parent);
    }

    /// Removes `member` from `parent`.
    pub async fn remove(&self, member: &PrincipalRef, parent: &PrincipalRef) {
        if let Some(parents) = self.direct.write().await.get_mut(member) {
            parents.remove(parent);
        }
    }
}

#[async_trait]
impl MembershipProvider for StaticMembership {
    async fn closure(
        &self,
        principal: &PrincipalRef,
    ) -> std::result::Result<BTreeSet<PrincipalRef>, MembershipError> {
        let direct = self.direct.read().await;
        let mut closure = BTreeSet::new();
        let mut pending = vec![principal];
        while let Some(current) = pending.pop() {
            for parent in direct.get(current).into_iter().flatten() {
                if parent != principal && closure.insert(parent.clone()) {
                    pending.push(parent);
                }
            }
        }
        Ok(closure)
    }
}
