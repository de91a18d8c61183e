use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::handle::MessageHandle;

/// Bounded map of in-flight message handles.
///
/// A handle is present here iff its message has been received and neither
/// acked nor nacked. Admission is a soft limit: `add_new` waits while the map
/// is at capacity, but an admitted batch may push occupancy over the limit by
/// up to one receive batch, which keeps the fetch loop able to make progress.
pub(crate) struct InFlightTracker {
    handles: Mutex<HashMap<String, Arc<MessageHandle>>>,
    limit: usize,
    timeout: Duration,
    freed: Notify,
}

impl InFlightTracker {
    pub fn new(limit: usize, timeout: Duration) -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
            limit,
            timeout,
            freed: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<MessageHandle>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a batch of handles, waiting while the tracker is at capacity.
    /// The capacity check is against the pre-insertion size, so the whole
    /// batch is admitted at once. Returns without inserting if `stop` fires
    /// during the wait.
    pub async fn add_new(&self, stop: &CancellationToken, batch: Vec<Arc<MessageHandle>>) {
        loop {
            let freed = self.freed.notified();
            if self.lock().len() < self.limit {
                break;
            }
            tokio::select! {
                _ = freed => {}
                _ = stop.cancelled() => return,
            }
        }

        let mut handles = self.lock();
        for handle in batch {
            handles.insert(handle.id.clone(), handle);
        }
    }

    /// Remove one handle and wake a single admission waiter.
    pub fn remove(&self, id: &str) {
        self.lock().remove(id);
        self.freed.notify_one();
    }

    /// Drop every handle and wake all admission waiters.
    pub fn clear(&self) {
        self.lock().clear();
        self.freed.notify_waiters();
    }

    pub fn size(&self) -> usize {
        self.lock().len()
    }

    /// Collect the handles whose remaining lease is under half the message
    /// timeout, eagerly bumping each returned deadline to `now + timeout`.
    /// The bump happens before the corresponding extension RPC, so a failed
    /// RPC leaves the tracker optimistic about the lease; the half-timeout
    /// threshold absorbs that.
    pub fn pull_to_refresh(&self) -> Vec<Arc<MessageHandle>> {
        let handles = self.lock();
        let now = Instant::now();
        let mut due = Vec::new();
        for handle in handles.values() {
            let Some(deadline) = handle.deadline.load() else {
                continue;
            };
            if deadline.duration_since(now) >= self.timeout / 2 {
                continue;
            }
            handle.deadline.store(now + self.timeout);
            due.push(Arc::clone(handle));
        }
        due
    }
}
