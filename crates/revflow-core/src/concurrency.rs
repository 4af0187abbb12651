use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

use crate::error::{CoreError, CoreResult};

/// Tracks which keys currently have work in flight and enforces a cap on
/// how many may run at once.
pub struct InFlightTracker<K: Eq + Hash + Clone + Send> {
    in_flight: Arc<Mutex<HashSet<K>>>,
    max_concurrent: usize,
}

impl<K: Eq + Hash + Clone + Send> InFlightTracker<K> {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            max_concurrent,
        }
    }

    pub async fn active_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    /// Attempts to reserve a slot for `key`. Returns `false` if the cap is
    /// reached or the key is already in flight.
    pub async fn try_acquire(&self, key: K) -> bool {
        let mut set = self.in_flight.lock().await;
        if set.len() >= self.max_concurrent || set.contains(&key) {
            return false;
        }
        set.insert(key);
        true
    }

    pub async fn release(&self, key: &K) {
        let mut set = self.in_flight.lock().await;
        set.remove(key);
    }
}

impl<K: Eq + Hash + Clone + Send> Clone for InFlightTracker<K> {
    fn clone(&self) -> Self {
        Self {
            in_flight: self.in_flight.clone(),
            max_concurrent: self.max_concurrent,
        }
    }
}

/// Caps how much work runs at once. Unlike `InFlightTracker::try_acquire`,
/// `acquire` waits for a slot instead of rejecting, so callers queuing work
/// behind it get backpressure rather than errors.
#[derive(Clone)]
pub struct WorkLimiter {
    permits: Arc<Semaphore>,
}

impl WorkLimiter {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub async fn acquire(&self) -> CoreResult<OwnedSemaphorePermit> {
        Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| CoreError::state_conflict("work limiter closed"))
    }
}
