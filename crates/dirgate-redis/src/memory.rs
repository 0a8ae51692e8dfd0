//! In-process cache client.
//!
//! Expiry uses `tokio::time::Instant`, so tests running with paused time can
//! advance past a TTL deterministically.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::{CacheClient, CacheError, Result};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Cache client backed by a `HashMap`.
#[derive(Debug, Default)]
pub struct MemoryCacheClient {
    entries: Mutex<HashMap<String, Entry>>,
    failing: AtomicBool,
}

impl MemoryCacheClient {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent request fail with [`CacheError::Unavailable`].
    pub fn fail_requests(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    /// Returns `true` when no live entry exists.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(CacheError::unavailable("memory cache set to fail"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheClient for MemoryCacheClient {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.check()?;
        let entry = Entry {
            value: value.to_vec(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.lock().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        self.check()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let mut removed = 0;
        for key in keys {
            if entries.remove(key).is_some_and(|e| e.is_live(now)) {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.check()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, e| e.is_live(now));
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn set_max(&self, key: &str, value: u64) -> Result<u64> {
        self.check()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let current = entries
            .get(key)
            .filter(|e| e.is_live(now))
            .and_then(|e| std::str::from_utf8(&e.value).ok()?.trim().parse::<u64>().ok());
        match current {
            Some(current) if current >= value => Ok(current),
            _ => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: value.to_string().into_bytes(),
                        expires_at: None,
                    },
                );
                Ok(value)
            }
        }
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
