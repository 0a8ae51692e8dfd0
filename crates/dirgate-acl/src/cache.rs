//! Compiled-ACL cache.
//!
//! Entries live in the external cache under `{prefix}entry:{principal}` as
//! JSON-encoded [`CompiledAcl`]s, each carrying its generation and dependency
//! set. There is no separate reverse index: dependency invalidation scans the
//! entries that are still cached and evicts those naming a changed id.
//!
//! Entry lifecycle, per principal:
//!
//! ```text
//! absent --miss--> compiling --ok--> cached --floor/invalidation--> stale/evicted --> absent
//! ```
//!
//! Any state re-enters `compiling` on the next access after eviction. When
//! the cache is unreachable, lookups fall through to a direct compile and
//! nothing is written back.

use dirgate_core::{CompiledAcl, DefinitionId, PrincipalRef};
use dirgate_redis::{CacheClient, CacheError};
use dirgate_store::DefinitionStore;
use serde::Serialize;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::compiler::AclCompiler;
use crate::config::CacheConfig;
use crate::error::{AclError, Result};
use crate::generation::Generation;
use crate::membership::MembershipProvider;
use crate::singleflight::SingleFlight;

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    stale: AtomicU64,
    compiles: AtomicU64,
    write_backs_skipped: AtomicU64,
    cache_errors: AtomicU64,
    evictions: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups served from a fresh entry.
    pub hits: u64,
    /// Lookups that had to compile (including stale and degraded ones).
    pub misses: u64,
    /// Entries found below the sync floor.
    pub stale: u64,
    /// Compiles actually run.
    pub compiles: u64,
    /// Compiles not written back because a dependency changed meanwhile.
    pub write_backs_skipped: u64,
    /// Failed or timed-out cache round-trips.
    pub cache_errors: u64,
    /// Entries removed by invalidation.
    pub evictions: u64,
}

/// Outcome of a dependency invalidation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InvalidationReport {
    /// Cached entries examined.
    pub scanned: usize,
    /// Entries evicted.
    pub evicted: u64,
    /// The cache was unreachable and the sync floor was raised instead.
    pub floor_raised: bool,
}

enum Lookup {
    Hit(Arc<CompiledAcl>),
    Miss,
    Unavailable,
}

/// Per-principal cache of compiled tables.
pub struct AclCache {
    client: Arc<dyn CacheClient>,
    store: Arc<dyn DefinitionStore>,
    compiler: AclCompiler,
    generation: Arc<Generation>,
    flights: SingleFlight<PrincipalRef, Result<Arc<CompiledAcl>>>,
    config: CacheConfig,
    counters: Counters,
}

impl std::fmt::Debug for AclCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AclCache")
            .field("client", &self.client.backend_name())
            .field("store", &self.store.backend_name())
            .field("floor", &self.generation.floor())
            .field("config", &self.config)
            .finish()
    }
}

impl AclCache {
    /// Creates a cache with its own generation state.
    pub fn new(
        client: Arc<dyn CacheClient>,
        store: Arc<dyn DefinitionStore>,
        config: CacheConfig,
    ) -> Self {
        Self::with_generation(client, store, config, Arc::new(Generation::new()))
    }

    /// Creates a cache sharing `generation` with other components.
    pub fn with_generation(
        client: Arc<dyn CacheClient>,
        store: Arc<dyn DefinitionStore>,
        config: CacheConfig,
        generation: Arc<Generation>,
    ) -> Self {
        Self {
            client,
            store,
            compiler: AclCompiler::new(),
            generation,
            flights: SingleFlight::new(),
            config,
            counters: Counters::default(),
        }
    }

    /// Shared generation state.
    pub fn generation(&self) -> &Arc<Generation> {
        &self.generation
    }

    /// Definition store compiles read from.
    pub fn store(&self) -> &Arc<dyn DefinitionStore> {
        &self.store
    }

    /// Cache key of a principal's entry.
    pub fn entry_key(&self, principal: &PrincipalRef) -> String {
        format!("{}entry:{principal}", self.config.key_prefix)
    }

    fn entry_prefix(&self) -> String {
        format!("{}entry:", self.config.key_prefix)
    }

    fn floor_key(&self) -> String {
        format!("{}sync-floor", self.config.key_prefix)
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            stale: c.stale.load(Ordering::Relaxed),
            compiles: c.compiles.load(Ordering::Relaxed),
            write_backs_skipped: c.write_backs_skipped.load(Ordering::Relaxed),
            cache_errors: c.cache_errors.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
        }
    }

    /// Returns the cached table for `principal`, compiling it on a miss.
    pub async fn get_or_compile(
        &self,
        principal: &PrincipalRef,
        closure: BTreeSet<PrincipalRef>,
    ) -> Result<Arc<CompiledAcl>> {
        self.get_or_compile_with(principal, async move { Ok(closure) })
            .await
    }

    /// Like [`get_or_compile`](Self::get_or_compile), resolving the closure
    /// through `membership` only if a compile actually runs.
    pub async fn resolve(
        &self,
        principal: &PrincipalRef,
        membership: &dyn MembershipProvider,
    ) -> Result<Arc<CompiledAcl>> {
        self.get_or_compile_with(principal, async move {
            membership.closure(principal).await.map_err(AclError::from)
        })
        .await
    }

    /// Lookup, then single-flight compile with a lazily loaded closure.
    pub async fn get_or_compile_with<L>(
        &self,
        principal: &PrincipalRef,
        closure: L,
    ) -> Result<Arc<CompiledAcl>>
    where
        L: Future<Output = Result<BTreeSet<PrincipalRef>>>,
    {
        let key = self.entry_key(principal);
        let write_back = match self.lookup(&key).await {
            Lookup::Hit(acl) => {
                bump(&self.counters.hits);
                return Ok(acl);
            }
            Lookup::Miss => true,
            Lookup::Unavailable => false,
        };
        bump(&self.counters.misses);
        self.flights
            .run(principal.clone(), || {
                self.compile_and_store(principal, &key, closure, write_back)
            })
            .await
    }

    async fn lookup(&self, key: &str) -> Lookup {
        let bytes = match self.call(self.client.get(key)).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Lookup::Miss,
            Err(e) => {
                bump(&self.counters.cache_errors);
                log::warn!("ACL cache read failed, compiling directly: {e}");
                return Lookup::Unavailable;
            }
        };
        match serde_json::from_slice::<CompiledAcl>(&bytes) {
            Ok(acl) if self.generation.is_stale(acl.generation) => {
                bump(&self.counters.stale);
                log::debug!(
                    "Cached ACL {key} at generation {} is below floor {}",
                    acl.generation,
                    self.generation.floor()
                );
                Lookup::Miss
            }
            Ok(acl) => Lookup::Hit(Arc::new(acl)),
            Err(e) => {
                log::warn!("Evicting unreadable ACL cache entry {key}: {e}");
                if let Err(e) = self.call(self.client.delete(&[key.to_string()])).await {
                    bump(&self.counters.cache_errors);
                    log::debug!("Could not evict {key}: {e}");
                }
                Lookup::Miss
            }
        }
    }

    async fn compile_and_store<L>(
        &self,
        principal: &PrincipalRef,
        key: &str,
        closure: L,
        write_back: bool,
    ) -> Result<Arc<CompiledAcl>>
    where
        L: Future<Output = Result<BTreeSet<PrincipalRef>>>,
    {
        let closure = closure.await?;
        let mut principals = closure.clone();
        principals.insert(principal.clone());

        let snapshot = self.store.load_for(&principals).await.map_err(|e| {
            AclError::compile(format!("definition read failed: {e}"), e.is_retryable())
        })?;
        let acl = Arc::new(self.compiler.compile(
            principal,
            &closure,
            &snapshot.definitions,
            snapshot.revision,
        ));
        bump(&self.counters.compiles);
        log::debug!(
            "Compiled ACL for {principal} at generation {}: {} permissions",
            acl.generation,
            acl.entries.len()
        );

        if write_back {
            self.write_back(key, &acl).await;
        }
        Ok(acl)
    }

    async fn write_back(&self, key: &str, acl: &CompiledAcl) {
        if self.overtaken(acl) {
            bump(&self.counters.write_backs_skipped);
            log::debug!("Not caching {key}: a dependency changed during compile");
            return;
        }
        let bytes = match serde_json::to_vec(acl) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Could not encode compiled ACL {key}: {e}");
                return;
            }
        };
        if let Err(e) = self
            .call(self.client.set(key, &bytes, Some(self.config.ttl())))
            .await
        {
            bump(&self.counters.cache_errors);
            log::warn!("ACL cache write failed for {key}: {e}");
            return;
        }
        // An invalidation may have scanned between the check and the write.
        if self.overtaken(acl) {
            bump(&self.counters.write_backs_skipped);
            if let Err(e) = self.call(self.client.delete(&[key.to_string()])).await {
                bump(&self.counters.cache_errors);
                log::warn!("Could not withdraw overtaken entry {key}: {e}");
            }
        }
    }

    fn overtaken(&self, acl: &CompiledAcl) -> bool {
        self.generation.is_stale(acl.generation)
            || self
                .generation
                .touched_since(acl.generation, &acl.dependencies)
    }

    /// Evicts one principal's entry. Returns whether an entry existed.
    pub async fn invalidate(&self, principal: &PrincipalRef) -> Result<bool> {
        self.flights.forget(principal);
        let key = self.entry_key(principal);
        match self.call(self.client.delete(&[key])).await {
            Ok(n) => Ok(n > 0),
            Err(e) => {
                bump(&self.counters.cache_errors);
                Err(e.into())
            }
        }
    }

    /// Evicts every entry depending on `id`, stamped at the current store
    /// revision.
    pub async fn invalidate_by_dependency(&self, id: &DefinitionId) -> Result<InvalidationReport> {
        let revision = self.store.revision().await?;
        self.invalidate_after_commit(revision, [id.clone()].into_iter().collect())
            .await
    }

    /// Evicts every entry depending on any of `ids`, which changed at
    /// `revision`.
    ///
    /// If the cache cannot be reached the sync floor is raised to `revision`
    /// instead, so older entries become misses everywhere the floor is seen.
    pub async fn invalidate_after_commit(
        &self,
        revision: u64,
        ids: BTreeSet<DefinitionId>,
    ) -> Result<InvalidationReport> {
        if ids.is_empty() {
            return Ok(InvalidationReport::default());
        }
        self.generation.record_invalidation(revision, ids.clone());
        self.flights.forget_all();

        match self.evict_matching(&ids).await {
            Ok(report) => {
                self.counters
                    .evictions
                    .fetch_add(report.evicted, Ordering::Relaxed);
                log::debug!(
                    "Invalidated {} of {} cached ACLs for {} changed definitions",
                    report.evicted,
                    report.scanned,
                    ids.len()
                );
                Ok(report)
            }
            Err(e) => {
                bump(&self.counters.cache_errors);
                log::warn!("Dependency invalidation failed ({e}); raising sync floor to {revision}");
                self.generation.raise_floor(revision);
                if let Err(e) = self.publish_sync_floor().await {
                    log::debug!("Sync floor not published: {e}");
                }
                Ok(InvalidationReport {
                    floor_raised: true,
                    ..InvalidationReport::default()
                })
            }
        }
    }

    async fn evict_matching(
        &self,
        ids: &BTreeSet<DefinitionId>,
    ) -> std::result::Result<InvalidationReport, CacheError> {
        let keys = self
            .call(self.client.scan_prefix(&self.entry_prefix()))
            .await?;
        let mut doomed = Vec::new();
        for key in &keys {
            let Some(bytes) = self.call(self.client.get(key)).await? else {
                continue;
            };
            match serde_json::from_slice::<CompiledAcl>(&bytes) {
                Ok(acl) if acl.dependencies.is_disjoint(ids) => {}
                Ok(_) => doomed.push(key.clone()),
                Err(e) => {
                    log::warn!("Evicting unreadable ACL cache entry {key}: {e}");
                    doomed.push(key.clone());
                }
            }
        }
        let evicted = if doomed.is_empty() {
            0
        } else {
            self.call(self.client.delete(&doomed)).await?
        };
        Ok(InvalidationReport {
            scanned: keys.len(),
            evicted,
            floor_raised: false,
        })
    }

    /// Reads the floor other nodes published and raises the local one to it.
    pub async fn refresh_sync_floor(&self) -> Result<u64> {
        let published = self.call(self.client.get(&self.floor_key())).await?;
        if let Some(bytes) = published {
            match std::str::from_utf8(&bytes)
                .ok()
                .and_then(|s| s.trim().parse::<u64>().ok())
            {
                Some(floor) => {
                    self.generation.raise_floor(floor);
                }
                None => log::warn!("Ignoring malformed sync floor in cache"),
            }
        }
        Ok(self.generation.floor())
    }

    /// Publishes the local floor, never lowering a higher published one,
    /// and raises the local floor to whatever ends up published.
    pub async fn publish_sync_floor(&self) -> Result<u64> {
        let local = self.generation.floor();
        let published = self
            .call(self.client.set_max(&self.floor_key(), local))
            .await?;
        self.generation.raise_floor(published);
        Ok(self.generation.floor())
    }

    async fn call<T, F>(&self, op: F) -> std::result::Result<T, CacheError>
    where
        F: Future<Output = dirgate_redis::Result<T>>,
    {
        let deadline = self.config.op_timeout();
        match tokio::time::timeout(deadline, op).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::unavailable(format!(
                "{} cache call timed out after {deadline:?}",
                self.client.backend_name()
            ))),
        }
    }
}
