//! Sync floor and invalidation log.
//!
//! Two pieces of state decide whether a compiled table may be served or
//! written back:
//!
//! - the **sync floor**: entries whose generation is below it are stale.
//!   Registry syncs raise it, and so does any invalidation that could not
//!   reach the cache.
//! - the **invalidation log**: a bounded window of `(revision, ids)` pairs,
//!   used to tell whether a compile that started at some revision has since
//!   been overtaken by a change to one of its dependencies.

use dirgate_core::DefinitionId;
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Default number of invalidations remembered.
pub const DEFAULT_LOG_CAPACITY: usize = 1024;

#[derive(Debug)]
struct InvalidationLog {
    capacity: usize,
    entries: VecDeque<(u64, BTreeSet<DefinitionId>)>,
    /// Highest revision dropped from the window; questions about older
    /// revisions can no longer be answered precisely.
    horizon: u64,
}

impl InvalidationLog {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
            horizon: 0,
        }
    }

    fn record(&mut self, revision: u64, ids: BTreeSet<DefinitionId>) {
        self.entries.push_back((revision, ids));
        while self.entries.len() > self.capacity {
            if let Some((dropped, _)) = self.entries.pop_front() {
                self.horizon = self.horizon.max(dropped);
            }
        }
    }

    fn touched_since(&self, revision: u64, dependencies: &BTreeSet<DefinitionId>) -> bool {
        if revision < self.horizon {
            return true;
        }
        self.entries
            .iter()
            .filter(|(rev, _)| *rev > revision)
            .any(|(_, ids)| !ids.is_disjoint(dependencies))
    }
}

/// Process-local generation state shared by the cache, registry, and admin.
#[derive(Debug)]
pub struct Generation {
    floor: AtomicU64,
    log: Mutex<InvalidationLog>,
}

impl Default for Generation {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl Generation {
    /// Creates state with the default log window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates state remembering at most `capacity` invalidations.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            floor: AtomicU64::new(0),
            log: Mutex::new(InvalidationLog::new(capacity.max(1))),
        }
    }

    /// Current sync floor.
    pub fn floor(&self) -> u64 {
        self.floor.load(Ordering::Acquire)
    }

    /// Raises the floor to `revision`; never lowers it. Returns the new floor.
    pub fn raise_floor(&self, revision: u64) -> u64 {
        let previous = self.floor.fetch_max(revision, Ordering::AcqRel);
        if revision > previous {
            log::debug!("Sync floor raised {previous} -> {revision}");
        }
        previous.max(revision)
    }

    /// Returns `true` if a table compiled at `generation` is stale.
    pub fn is_stale(&self, generation: u64) -> bool {
        generation < self.floor()
    }

    /// Remembers that `ids` changed at `revision`.
    pub fn record_invalidation(&self, revision: u64, ids: BTreeSet<DefinitionId>) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(revision, ids);
    }

    /// Whether any of `dependencies` changed after `revision`.
    ///
    /// Answers `true` when `revision` has fallen out of the log window.
    pub fn touched_since(&self, revision: u64, dependencies: &BTreeSet<DefinitionId>) -> bool {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .touched_since(revision, dependencies)
    }
}
