//! Single-flight action dispatcher.
//!
//! Each user action runs on its own tokio task. A second request for an
//! action that is still running is dropped, and the total number of running
//! actions is bounded by a semaphore.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Spawns actions, at most one in flight per name.
#[derive(Clone)]
pub struct ActionDispatcher {
    in_flight: Arc<Mutex<HashSet<String>>>,
    permits: Arc<Semaphore>,
}

impl ActionDispatcher {
    /// Dispatcher allowing `max_in_flight` concurrent actions.
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    /// Whether an action with this name is currently running or queued.
    pub fn is_in_flight(&self, name: &str) -> bool {
        self.in_flight.lock().contains(name)
    }

    /// Spawn `task` under `name`.
    ///
    /// Returns `false` without spawning when `name` is already in flight.
    pub fn dispatch<F>(&self, name: &str, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !self.in_flight.lock().insert(name.to_string()) {
            tracing::debug!(action = name, "action already in flight, skipped");
            return false;
        }

        let guard = InFlight {
            name: name.to_string(),
            in_flight: self.in_flight.clone(),
        };
        let permits = self.permits.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            task.await;
        });
        true
    }
}

struct InFlight {
    name: String,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.name);
    }
}
