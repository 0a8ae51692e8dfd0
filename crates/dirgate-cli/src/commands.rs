//! Command implementations.
//!
//! Each command opens the configured store and cache, runs against a started
//! engine, and shuts it down again. Memberships are not looked up anywhere:
//! `--member` flags supply the principal's groups and roles directly, so a
//! principal's shared cache entry is evicted before it is resolved.

use dirgate_acl::{AclEngine, MembershipProvider, StaticMembership, SyncReport};
use dirgate_core::{
    CompiledAcl, Decision, DefinitionsBundle, PrincipalRef, ResourceAttributes, ValidatedBundle,
};
use dirgate_redis::{CacheClient, MemoryCacheClient, RedisCacheClient};
use dirgate_store::{FileDefinitionStore, LogAuditSink};
use std::path::Path;
use std::sync::Arc;

use crate::config::DirgateConfig;
use crate::error::{Error, Result};

/// Parses `type:id`; a bare id is a user.
pub fn parse_principal(s: &str) -> Result<PrincipalRef> {
    Ok(s.parse::<PrincipalRef>()?)
}

/// Parses `key=value` pairs into resource attributes.
pub fn parse_attrs(pairs: &[String]) -> Result<ResourceAttributes> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
            _ => Err(Error::Argument(format!(
                "attribute '{pair}' is not of the form key=value"
            ))),
        })
        .collect()
}

fn membership_for(principal: &PrincipalRef, members: &[String]) -> Result<StaticMembership> {
    let parents = members
        .iter()
        .map(|m| parse_principal(m))
        .collect::<Result<Vec<_>>>()?;
    Ok(StaticMembership::from_pairs([(principal.clone(), parents)]))
}

/// Connects the configured cache.
pub async fn connect_cache(config: &DirgateConfig) -> Result<Arc<dyn CacheClient>> {
    Ok(match &config.cache.redis_url {
        Some(url) => Arc::new(RedisCacheClient::connect(url).await?),
        None => {
            log::debug!("No redis_url configured; using an in-process cache");
            Arc::new(MemoryCacheClient::new())
        }
    })
}

/// Opens the configured store and cache and starts an engine over them.
pub async fn open_engine(
    config: &DirgateConfig,
    membership: Arc<dyn MembershipProvider>,
) -> Result<AclEngine> {
    let client = connect_cache(config).await?;
    open_engine_with(config, membership, client).await
}

async fn open_engine_with(
    config: &DirgateConfig,
    membership: Arc<dyn MembershipProvider>,
    client: Arc<dyn CacheClient>,
) -> Result<AclEngine> {
    let store_path = config.store_path();
    log::debug!("Opening definition store {}", store_path.display());
    let store = FileDefinitionStore::open(store_path).await?;

    let engine = AclEngine::builder()
        .store(Arc::new(store))
        .cache_client(client)
        .membership(membership)
        .audit(Arc::new(LogAuditSink))
        .config(config.acl_config())
        .build();
    engine.start().await?;
    Ok(engine)
}

/// Parses and validates a bundle file.
pub fn cmd_validate(bundle: &Path) -> Result<ValidatedBundle> {
    let parsed = DefinitionsBundle::from_path(bundle)?;
    Ok(parsed.validate()?)
}

/// Syncs a bundle file into the configured store.
pub async fn cmd_sync(config: &DirgateConfig, bundle: &Path) -> Result<SyncReport> {
    let parsed = DefinitionsBundle::from_path(bundle)?;
    let engine = open_engine(config, Arc::new(StaticMembership::new())).await?;
    let result = engine.registry().sync(&parsed).await;
    engine.shutdown().await;
    Ok(result?)
}

/// Drops whatever an earlier invocation cached for `principal` under a
/// different `--member` set.
async fn evict_previous(engine: &AclEngine, principal: &PrincipalRef) {
    if let Err(e) = engine.cache().invalidate(principal).await {
        log::warn!("Could not evict cached ACL for {principal}: {e}");
    }
}

/// Decides one request.
pub async fn cmd_check(
    config: &DirgateConfig,
    principal: &str,
    members: &[String],
    permission: &str,
    attrs: &[String],
) -> Result<Decision> {
    let client = connect_cache(config).await?;
    check_with(config, client, principal, members, permission, attrs).await
}

async fn check_with(
    config: &DirgateConfig,
    client: Arc<dyn CacheClient>,
    principal: &str,
    members: &[String],
    permission: &str,
    attrs: &[String],
) -> Result<Decision> {
    let principal = parse_principal(principal)?;
    let membership = membership_for(&principal, members)?;
    let attrs = parse_attrs(attrs)?;
    let resource = (!attrs.is_empty()).then_some(&attrs);

    let engine = open_engine_with(config, Arc::new(membership), client).await?;
    evict_previous(&engine, &principal).await;
    let decision = engine.guard().check(&principal, permission, resource).await;
    engine.shutdown().await;
    Ok(decision)
}

/// Compiles (or fetches) a principal's ACL.
pub async fn cmd_show(
    config: &DirgateConfig,
    principal: &str,
    members: &[String],
) -> Result<CompiledAcl> {
    let client = connect_cache(config).await?;
    show_with(config, client, principal, members).await
}

async fn show_with(
    config: &DirgateConfig,
    client: Arc<dyn CacheClient>,
    principal: &str,
    members: &[String],
) -> Result<CompiledAcl> {
    let principal = parse_principal(principal)?;
    let membership = membership_for(&principal, members)?;
    let engine = open_engine_with(config, Arc::new(membership), client).await?;
    evict_previous(&engine, &principal).await;
    let result = engine
        .cache()
        .resolve(&principal, engine.membership().as_ref())
        .await;
    engine.shutdown().await;
    Ok(result?.as_ref().clone())
}
