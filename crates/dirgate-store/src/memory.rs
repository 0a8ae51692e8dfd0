//! In-memory definition store.
//!
//! Holds the current definitions behind a `tokio::sync::RwLock`. Not durable:
//! all state is lost on restart. Used for tests, local development, and as
//! the in-process layer of [`FileDefinitionStore`](crate::FileDefinitionStore).

use async_trait::async_trait;
use dirgate_core::{Definitions, Mutation};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::{DefinitionStore, Result, Snapshot, prepare_commit};

#[derive(Debug)]
struct State {
    revision: u64,
    definitions: Arc<Definitions>,
}

/// Non-durable definition store.
#[derive(Debug)]
pub struct MemoryDefinitionStore {
    state: RwLock<State>,
}

impl MemoryDefinitionStore {
    /// Creates an empty store at revision 0.
    pub fn new() -> Self {
        Self::with_definitions(0, Definitions::new())
    }

    /// Creates a store preloaded with `definitions` at `revision`.
    pub fn with_definitions(revision: u64, definitions: Definitions) -> Self {
        Self {
            state: RwLock::new(State {
                revision,
                definitions: Arc::new(definitions),
            }),
        }
    }

    /// Runs a commit, calling `persist` with the next state before publishing it.
    ///
    /// If `persist` fails the in-memory state is left untouched.
    pub(crate) async fn commit_with<F, Fut>(
        &self,
        base_revision: u64,
        mutations: Vec<Mutation>,
        persist: F,
    ) -> Result<u64>
    where
        F: FnOnce(u64, Definitions) -> Fut,
        Fut: std::future::Future<Output = Result<Definitions>>,
    {
        let mut state = self.state.write().await;
        if mutations.is_empty() {
            return Ok(state.revision);
        }
        let (revision, next) =
            prepare_commit(state.revision, &state.definitions, base_revision, mutations)?;
        let next = persist(revision, next).await?;
        state.revision = revision;
        state.definitions = Arc::new(next);
        log::debug!("Definition store committed revision {revision}");
        Ok(revision)
    }
}

impl Default for MemoryDefinitionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DefinitionStore for MemoryDefinitionStore {
    async fn snapshot(&self) -> Result<Snapshot> {
        let state = self.state.read().await;
        Ok(Snapshot {
            revision: state.revision,
            definitions: Arc::clone(&state.definitions),
        })
    }

    async fn commit(&self, base_revision: u64, mutations: Vec<Mutation>) -> Result<u64> {
        self.commit_with(base_revision, mutations, |_, next| async move { Ok(next) })
            .await
    }

    async fn revision(&self) -> Result<u64> {
        Ok(self.state.read().await.revision)
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
