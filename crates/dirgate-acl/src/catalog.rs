//! In-memory set of declared permission keys.
//!
//! The guard consults this before touching the cache, so an undeclared key
//! is denied without any I/O. The catalog remembers the store revision it was
//! loaded from; [`PermissionCatalog::reload_from`] catches up with writes made
//! by other engines sharing the store.

use dirgate_core::Definitions;
use dirgate_store::DefinitionStore;
use std::collections::BTreeSet;
use std::sync::{PoisonError, RwLock};

use crate::error::Result;

#[derive(Debug, Default)]
struct Loaded {
    revision: u64,
    keys: BTreeSet<String>,
}

/// Known permission keys.
#[derive(Debug, Default)]
pub struct PermissionCatalog {
    loaded: RwLock<Loaded>,
}

impl PermissionCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the catalog with the permissions in `definitions`, read at
    /// store `revision`. Returns `false` if the catalog already holds a newer
    /// revision.
    pub fn refresh(&self, revision: u64, definitions: &Definitions) -> bool {
        let keys: BTreeSet<String> = definitions
            .permissions
            .keys()
            .map(|k| k.as_str().to_string())
            .collect();
        let count = keys.len();
        let mut loaded = self.loaded.write().unwrap_or_else(PoisonError::into_inner);
        if revision < loaded.revision {
            return false;
        }
        *loaded = Loaded { revision, keys };
        log::debug!("Permission catalog refreshed: {count} keys at revision {revision}");
        true
    }

    /// Reloads from `store` if it has moved past the loaded revision.
    /// Returns whether anything was reloaded.
    pub async fn reload_from(&self, store: &dyn DefinitionStore) -> Result<bool> {
        if store.revision().await? <= self.revision() {
            return Ok(false);
        }
        let snapshot = store.snapshot().await?;
        Ok(self.refresh(snapshot.revision, &snapshot.definitions))
    }

    /// Store revision the catalog was loaded from.
    pub fn revision(&self) -> u64 {
        self.loaded
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .revision
    }

    /// Returns `true` if `key` is declared.
    pub fn contains(&self, key: &str) -> bool {
        self.loaded
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys
            .contains(key)
    }

    /// Number of declared keys.
    pub fn len(&self) -> usize {
        self.loaded
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys
            .len()
    }

    /// Returns `true` if nothing is declared.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
