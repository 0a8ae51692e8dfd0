//! Engine wiring and lifecycle.
//!
//! [`AclEngine`] owns the shared pieces (store, cache, catalog, membership,
//! audit) and hands out the guard, registry, and admin surfaces built on them.
//! It has an explicit lifecycle: [`start`](AclEngine::start) loads the
//! permission catalog and sync floor and spawns the floor watcher;
//! [`shutdown`](AclEngine::shutdown) stops it. The watcher runs
//! [`refresh`](AclEngine::refresh) on every tick, which picks up floors and
//! permissions published by other engines sharing the store and cache.
//!
//! ```rust
//! use dirgate_acl::{AclEngine, EngineState};
//!
//! # async fn run() -> dirgate_acl::Result<()> {
//! let engine = AclEngine::builder().build();
//! engine.start().await?;
//! assert!(engine.state().is_available());
//! engine.shutdown().await;
//! assert_eq!(engine.state(), EngineState::Stopped);
//! # Ok(())
//! # }
//! ```

use dirgate_redis::{CacheClient, MemoryCacheClient};
use dirgate_store::{AuditSink, DefinitionStore, LogAuditSink, MemoryDefinitionStore};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::admin::AclAdmin;
use crate::cache::AclCache;
use crate::catalog::PermissionCatalog;
use crate::config::AclConfig;
use crate::error::Result;
use crate::guard::AclGuard;
use crate::membership::{MembershipProvider, StaticMembership};
use crate::registry::PermissionRegistry;

// ============================================================================
// EngineState
// ============================================================================

/// Lifecycle state of an engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineState {
    /// Built but not started, or started and not yet loaded.
    Starting,
    /// Catalog and sync floor loaded.
    Ready,
    /// Serving, but the shared cache cannot be reached.
    Degraded(String),
    /// Shut down.
    Stopped,
}

impl EngineState {
    /// Returns `true` if fully ready.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Returns `true` if checks can be served (Ready or Degraded).
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Ready | Self::Degraded(_))
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Ready => write!(f, "ready"),
            Self::Degraded(reason) => write!(f, "degraded: {reason}"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

fn set_state(tx: &watch::Sender<EngineState>, state: EngineState) {
    if *tx.borrow() != state {
        log::info!("ACL engine -> {state}");
        tx.send_replace(state);
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`AclEngine`].
///
/// Unset parts default to in-memory implementations, with audit records
/// going to the log.
#[derive(Default)]
pub struct AclEngineBuilder {
    store: Option<Arc<dyn DefinitionStore>>,
    cache_client: Option<Arc<dyn CacheClient>>,
    membership: Option<Arc<dyn MembershipProvider>>,
    audit: Option<Arc<dyn AuditSink>>,
    config: AclConfig,
}

impl AclEngineBuilder {
    /// Sets the definition store.
    pub fn store(mut self, store: Arc<dyn DefinitionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the shared cache client.
    pub fn cache_client(mut self, client: Arc<dyn CacheClient>) -> Self {
        self.cache_client = Some(client);
        self
    }

    /// Sets the membership provider.
    pub fn membership(mut self, membership: Arc<dyn MembershipProvider>) -> Self {
        self.membership = Some(membership);
        self
    }

    /// Sets the audit sink.
    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Sets the configuration.
    pub fn config(mut self, config: AclConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the engine in the `Starting` state.
    pub fn build(self) -> AclEngine {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryDefinitionStore::new()));
        let client = self
            .cache_client
            .unwrap_or_else(|| Arc::new(MemoryCacheClient::new()));
        let membership = self
            .membership
            .unwrap_or_else(|| Arc::new(StaticMembership::new()));
        let audit = self.audit.unwrap_or_else(|| Arc::new(LogAuditSink));

        let cache = Arc::new(AclCache::new(
            client,
            Arc::clone(&store),
            self.config.cache.clone(),
        ));
        let catalog = Arc::new(PermissionCatalog::new());
        let (state, _rx) = watch::channel(EngineState::Starting);
        let (shutdown, _) = watch::channel(false);

        AclEngine {
            store,
            cache,
            catalog,
            membership,
            audit,
            config: self.config,
            state: Arc::new(state),
            shutdown,
            watcher: Mutex::new(None),
        }
    }
}

// ============================================================================
// AclEngine
// ============================================================================

/// The assembled authorization engine.
pub struct AclEngine {
    store: Arc<dyn DefinitionStore>,
    cache: Arc<AclCache>,
    catalog: Arc<PermissionCatalog>,
    membership: Arc<dyn MembershipProvider>,
    audit: Arc<dyn AuditSink>,
    config: AclConfig,
    state: Arc<watch::Sender<EngineState>>,
    shutdown: watch::Sender<bool>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for AclEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AclEngine")
            .field("store", &self.store.backend_name())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl AclEngine {
    /// Starts building an engine.
    pub fn builder() -> AclEngineBuilder {
        AclEngineBuilder::default()
    }

    /// Loads the permission catalog and sync floor, then starts the floor
    /// watcher.
    ///
    /// A store failure is returned. An unreachable cache only degrades the
    /// engine, since checks fall back to direct compiles.
    pub async fn start(&self) -> Result<()> {
        set_state(&self.state, EngineState::Starting);
        let snapshot = self.store.snapshot().await?;
        self.catalog.refresh(snapshot.revision, &snapshot.definitions);

        match self.cache.refresh_sync_floor().await {
            Ok(floor) => {
                log::info!(
                    "ACL engine loaded {} permissions at revision {}, sync floor {floor}",
                    self.catalog.len(),
                    snapshot.revision
                );
                set_state(&self.state, EngineState::Ready);
            }
            Err(e) => set_state(&self.state, EngineState::Degraded(e.to_string())),
        }

        self.shutdown.send_replace(false);
        let handle = self.spawn_floor_watcher();
        let previous = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        Ok(())
    }

    /// Catches up with other engines: raises the local sync floor to the
    /// published one and reloads the permission catalog if the store has
    /// moved past it. Returns the floor.
    ///
    /// An unreachable cache degrades the engine; a store failure leaves the
    /// current catalog in place and is returned.
    pub async fn refresh(&self) -> Result<u64> {
        refresh_shared(&self.cache, self.store.as_ref(), &self.catalog, &self.state).await
    }

    fn spawn_floor_watcher(&self) -> JoinHandle<()> {
        let cache = Arc::clone(&self.cache);
        let store = Arc::clone(&self.store);
        let catalog = Arc::clone(&self.catalog);
        let state = Arc::clone(&self.state);
        let mut shutdown = self.shutdown.subscribe();
        let period = self.config.engine.floor_refresh();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = refresh_shared(&cache, store.as_ref(), &catalog, &state).await {
                            log::debug!("Engine refresh failed: {e}");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Stops the floor watcher and moves to `Stopped`.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let handle = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            log::warn!("Floor watcher ended abnormally: {e}");
        }
        set_state(&self.state, EngineState::Stopped);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.state.borrow().clone()
    }

    /// Subscribes to lifecycle changes.
    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    /// Request guard.
    pub fn guard(&self) -> AclGuard {
        AclGuard::new(
            Arc::clone(&self.cache),
            Arc::clone(&self.membership),
            Arc::clone(&self.catalog),
            self.config.guard.check_timeout(),
        )
    }

    /// Bundle synchronizer.
    pub fn registry(&self) -> PermissionRegistry {
        PermissionRegistry::new(
            Arc::clone(&self.store),
            Arc::clone(&self.cache),
            Arc::clone(&self.catalog),
            Arc::clone(&self.audit),
            self.config.engine.commit_retries,
        )
    }

    /// Admin mutation surface.
    pub fn admin(&self) -> AclAdmin {
        AclAdmin::new(
            Arc::clone(&self.store),
            Arc::clone(&self.cache),
            Arc::clone(&self.catalog),
            Arc::clone(&self.audit),
            self.config.engine.commit_retries,
        )
    }

    /// The compiled-ACL cache.
    pub fn cache(&self) -> &Arc<AclCache> {
        &self.cache
    }

    /// The definition store.
    pub fn store(&self) -> &Arc<dyn DefinitionStore> {
        &self.store
    }

    /// The membership provider.
    pub fn membership(&self) -> &Arc<dyn MembershipProvider> {
        &self.membership
    }
}

async fn refresh_shared(
    cache: &AclCache,
    store: &dyn DefinitionStore,
    catalog: &PermissionCatalog,
    state: &watch::Sender<EngineState>,
) -> Result<u64> {
    let floor = match cache.refresh_sync_floor().await {
        Ok(floor) => {
            set_state(state, EngineState::Ready);
            floor
        }
        Err(e) => {
            log::debug!("Sync floor refresh failed: {e}");
            set_state(state, EngineState::Degraded(e.to_string()));
            cache.generation().floor()
        }
    };
    if catalog.reload_from(store).await? {
        log::info!(
            "Permission catalog reloaded at revision {}: {} keys",
            catalog.revision(),
            catalog.len()
        );
    }
    Ok(floor)
}

impl Drop for AclEngine {
    fn drop(&mut self) {
        if let Some(handle) = self
            .watcher
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}
