//! Per-key single-flight execution.
//!
//! The first caller for a key becomes the leader and runs the work; callers
//! arriving while it runs subscribe to the leader's `watch` channel and get a
//! clone of its result. If the leader is dropped before finishing, its entry
//! is removed and the channel closes, and one of the waiting followers takes
//! over as the new leader.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

struct Flight<V> {
    id: u64,
    rx: watch::Receiver<Option<V>>,
}

/// Deduplicates concurrent work per key.
pub struct SingleFlight<K, V> {
    flights: Mutex<HashMap<K, Flight<V>>>,
    next_id: AtomicU64,
}

impl<K, V> std::fmt::Debug for SingleFlight<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.lock().len())
            .finish()
    }
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

/// Removes the leader's entry when the leader finishes or is dropped.
struct LeaderGuard<'a, K: Hash + Eq, V> {
    owner: &'a SingleFlight<K, V>,
    key: K,
    id: u64,
}

impl<K: Hash + Eq, V> Drop for LeaderGuard<'_, K, V> {
    fn drop(&mut self) {
        let mut flights = self.owner.lock();
        if flights.get(&self.key).is_some_and(|f| f.id == self.id) {
            flights.remove(&self.key);
        }
    }
}

impl<K, V> SingleFlight<K, V> {
    fn lock(&self) -> MutexGuard<'_, HashMap<K, Flight<V>>> {
        self.flights.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Creates an empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `work` for `key` unless a run is already in flight, in which case
    /// waits for and returns that run's result.
    pub async fn run<F, Fut>(&self, key: K, work: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let (tx, id) = loop {
            let rx = {
                let mut flights = self.lock();
                match flights.get(&key) {
                    Some(flight) => flight.rx.clone(),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                        flights.insert(key.clone(), Flight { id, rx });
                        break (tx, id);
                    }
                }
            };
            if let Some(value) = Self::follow(rx).await {
                return value;
            }
        };

        let _guard = LeaderGuard {
            owner: self,
            key,
            id,
        };
        let value = work().await;
        tx.send_replace(Some(value.clone()));
        value
    }

    /// Waits for a leader's result; `None` if the leader went away.
    async fn follow(mut rx: watch::Receiver<Option<V>>) -> Option<V> {
        loop {
            if let Some(value) = rx.borrow_and_update().clone() {
                return Some(value);
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    }

    /// Detaches the in-flight run for `key`, if any.
    ///
    /// Callers already waiting still get its result; later callers start a
    /// fresh run.
    pub fn forget(&self, key: &K) {
        self.lock().remove(key);
    }

    /// Detaches every in-flight run.
    pub fn forget_all(&self) {
        self.lock().clear();
    }

    /// Number of runs currently in flight.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }
}
