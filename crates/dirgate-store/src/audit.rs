//! Audit records and the sinks that consume them.
//!
//! Registry syncs and admin mutations emit one [`AuditRecord`] per changed
//! definition. Delivery is best-effort: [`append_best_effort`] logs a failed
//! append and lets the mutation that produced it succeed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dirgate_core::DefinitionId;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Kind of change an audit record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    /// A definition was created.
    Create,
    /// A definition's content changed.
    Update,
    /// A definition was deleted through the admin surface.
    Delete,
    /// A registry-owned definition was removed by a sync.
    Prune,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Prune => "prune",
        };
        f.write_str(s)
    }
}

/// One append-only change record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Unique record id.
    pub id: Uuid,
    /// Who made the change, e.g. `registry` or an admin principal.
    pub actor: String,
    /// What happened.
    pub action: AuditAction,
    /// The definition changed.
    pub target: DefinitionId,
    /// Content before the change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<serde_json::Value>,
    /// Content after the change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<serde_json::Value>,
    /// When the change was committed.
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    /// Creates a record stamped now with a fresh id.
    ///
    /// `before` and `after` are serialized to JSON; a value that cannot be
    /// serialized is recorded as absent.
    pub fn new<B, A>(
        actor: impl Into<String>,
        action: AuditAction,
        target: DefinitionId,
        before: Option<&B>,
        after: Option<&A>,
    ) -> Self
    where
        B: Serialize,
        A: Serialize,
    {
        Self {
            id: Uuid::new_v4(),
            actor: actor.into(),
            action,
            target,
            before: before.and_then(|v| serde_json::to_value(v).ok()),
            after: after.and_then(|v| serde_json::to_value(v).ok()),
            timestamp: Utc::now(),
        }
    }
}

/// Failure to deliver an audit record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuditError {
    /// The sink could not accept the record.
    #[error("Audit sink unavailable: {0}")]
    Unavailable(String),
}

/// Consumer of audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Appends one record.
    async fn append(&self, record: AuditRecord) -> std::result::Result<(), AuditError>;
}

/// Appends every record, logging failures instead of returning them.
///
/// Returns the number of records the sink accepted.
pub async fn append_best_effort(sink: &dyn AuditSink, records: Vec<AuditRecord>) -> usize {
    let mut accepted = 0;
    for record in records {
        let id = record.id;
        let target = record.target.to_string();
        match sink.append(record).await {
            Ok(()) => accepted += 1,
            Err(e) => log::warn!("Dropped audit record {id} for {target}: {e}"),
        }
    }
    accepted
}

/// Keeps records in memory; used by tests and the CLI.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
    failing: AtomicBool,
}

impl MemoryAuditSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent appends fail (or succeed again).
    pub fn fail_appends(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Copies out every accepted record.
    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().await.clone()
    }

    /// Number of accepted records.
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    /// Returns `true` if no record has been accepted.
    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, record: AuditRecord) -> std::result::Result<(), AuditError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuditError::Unavailable("memory sink set to fail".into()));
        }
        self.records.lock().await.push(record);
        Ok(())
    }
}

/// Writes each record as one JSON log line at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn append(&self, record: AuditRecord) -> std::result::Result<(), AuditError> {
        let line = serde_json::to_string(&record)
            .map_err(|e| AuditError::Unavailable(e.to_string()))?;
        log::info!(target: "dirgate::audit", "{line}");
        Ok(())
    }
}
