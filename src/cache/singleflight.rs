//! In-flight request coalescing keyed by [`CacheKey`].
//!
//! The first caller for a key becomes the leader and runs the work; callers
//! arriving while it runs wait on a `watch` channel and receive a clone of
//! the leader's result. If the leader is cancelled before finishing, its
//! waiters retry and one of them takes over.

use std::collections::HashMap;
use std::future::Future;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::trace;

use super::key::CacheKey;

/// Outcome of [`SingleFlight::run`].
#[derive(Debug, Clone)]
pub struct Flight<T> {
    pub value: T,
    /// `true` when this caller ran the work itself.
    pub leader: bool,
}

/// Map of keys currently being computed.
pub struct SingleFlight<T> {
    flights: Mutex<HashMap<CacheKey, watch::Receiver<Option<T>>>>,
}

enum Role<'a, T> {
    Leader(LeaderGuard<'a, T>),
    Follower(watch::Receiver<Option<T>>),
}

/// Unregisters the flight if the leader drops without completing.
struct LeaderGuard<'a, T> {
    owner: &'a SingleFlight<T>,
    key: CacheKey,
    tx: watch::Sender<Option<T>>,
    done: bool,
}

impl<T> LeaderGuard<'_, T> {
    fn complete(mut self, value: T) {
        self.owner.flights.lock().remove(&self.key);
        self.done = true;
        // Nobody waiting is fine.
        let _ = self.tx.send(Some(value));
    }
}

impl<T> Drop for LeaderGuard<'_, T> {
    fn drop(&mut self) {
        if !self.done {
            trace!(key = %self.key.short(), "Flight leader dropped before completion");
            self.owner.flights.lock().remove(&self.key);
        }
    }
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
        }
    }

    /// Number of keys currently being computed.
    pub fn in_flight(&self) -> usize {
        self.flights.lock().len()
    }

    /// Run `work` for `key` unless another caller is already running it, in
    /// which case wait for and share that caller's result.
    pub async fn run<F, Fut>(&self, key: &CacheKey, work: F) -> Flight<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = loop {
            match self.join(key) {
                Role::Leader(guard) => break guard,
                Role::Follower(mut rx) => {
                    let waited = rx.wait_for(Option::is_some).await.map(|v| v.clone());
                    if let Ok(Some(value)) = waited {
                        return Flight {
                            value,
                            leader: false,
                        };
                    }
                    // Leader vanished without a result; try again.
                }
            }
        };
        let value = work().await;
        guard.complete(value.clone());
        Flight {
            value,
            leader: true,
        }
    }

    fn join(&self, key: &CacheKey) -> Role<'_, T> {
        let mut flights = self.flights.lock();
        if let Some(rx) = flights.get(key) {
            return Role::Follower(rx.clone());
        }
        let (tx, rx) = watch::channel(None);
        flights.insert(key.clone(), rx);
        Role::Leader(LeaderGuard {
            owner: self,
            key: key.clone(),
            tx,
            done: false,
        })
    }
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
