//! File-backed definition store.
//!
//! State lives in a single JSON document `{revision, definitions}`. Commits
//! write the next document to a sibling temp file and rename it over the
//! original, and only publish the new state in memory once the rename has
//! succeeded.

use async_trait::async_trait;
use dirgate_core::{Definitions, Mutation, PrincipalRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::memory::MemoryDefinitionStore;
use crate::{DefinitionStore, Error, Result, Snapshot};

#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    revision: u64,
    definitions: Definitions,
}

/// Durable definition store persisted to a JSON file.
#[derive(Debug)]
pub struct FileDefinitionStore {
    path: PathBuf,
    inner: MemoryDefinitionStore,
}

impl FileDefinitionStore {
    /// Opens the store at `path`, starting empty if the file does not exist.
    ///
    /// A document that fails the integrity check is rejected rather than
    /// loaded.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let inner = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let doc: StoreDocument = serde_json::from_slice(&bytes)
                    .map_err(|e| Error::Serialization(format!("{}: {e}", path.display())))?;
                doc.definitions.check_integrity()?;
                log::info!(
                    "Loaded {} definitions at revision {} from {}",
                    doc.definitions.len(),
                    doc.revision,
                    path.display()
                );
                MemoryDefinitionStore::with_definitions(doc.revision, doc.definitions)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No definition file at {}, starting empty", path.display());
                MemoryDefinitionStore::new()
            }
            Err(e) => return Err(Error::io_with_path(e, &path)),
        };
        Ok(Self { path, inner })
    }

    /// Path of the backing document.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn persist(path: &Path, revision: u64, definitions: Definitions) -> Result<Definitions> {
    let doc = StoreDocument {
        revision,
        definitions,
    };
    let bytes =
        serde_json::to_vec_pretty(&doc).map_err(|e| Error::Serialization(e.to_string()))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io_with_path(e, parent))?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &bytes)
        .await
        .map_err(|e| Error::io_with_path(e, &tmp))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(Error::io_with_path(e, path));
    }
    Ok(doc.definitions)
}

#[async_trait]
impl DefinitionStore for FileDefinitionStore {
    async fn snapshot(&self) -> Result<Snapshot> {
        self.inner.snapshot().await
    }

    async fn load_for(&self, principals: &BTreeSet<PrincipalRef>) -> Result<Snapshot> {
        self.inner.load_for(principals).await
    }

    async fn commit(&self, base_revision: u64, mutations: Vec<Mutation>) -> Result<u64> {
        let path = self.path.clone();
        self.inner
            .commit_with(base_revision, mutations, |revision, next| async move {
                persist(&path, revision, next).await
            })
            .await
    }

    async fn revision(&self) -> Result<u64> {
        self.inner.revision().await
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}
