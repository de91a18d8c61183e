use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use tokio::time::Instant;

/// Process-wide origin for encoding instants as atomic integers. Captured on
/// first use, so every instant stored afterwards is at or after it.
fn origin() -> Instant {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    *ORIGIN.get_or_init(Instant::now)
}

const DELETED: i64 = -1;

/// Visibility deadline of an in-flight message, readable without taking the
/// tracker lock. Encoded as whole milliseconds since the process origin;
/// `-1` marks a handle that has been acked or nacked and must no longer be
/// touched on the wire.
///
/// Reading the sentinel without a lock closes the race where a refresh pass
/// has already captured a handle that an ack has just dequeued.
#[derive(Debug)]
pub(crate) struct DeadlineCell(AtomicI64);

impl DeadlineCell {
    pub fn new(deadline: Instant) -> Self {
        Self(AtomicI64::new(encode(deadline)))
    }

    /// The current deadline, or `None` once the handle has been resolved.
    pub fn load(&self) -> Option<Instant> {
        match self.0.load(Ordering::Acquire) {
            DELETED => None,
            millis => Some(origin() + Duration::from_millis(millis as u64)),
        }
    }

    pub fn store(&self, deadline: Instant) {
        self.0.store(encode(deadline), Ordering::Release);
    }

    pub fn set_deleted(&self) {
        self.0.store(DELETED, Ordering::Release);
    }

    pub fn is_deleted(&self) -> bool {
        self.0.load(Ordering::Acquire) == DELETED
    }
}

fn encode(deadline: Instant) -> i64 {
    deadline.duration_since(origin()).as_millis() as i64
}

/// Identity and receipt token of one in-flight message, shared between the
/// tracker, the ack loop, and any pending flush slice that captured it.
#[derive(Debug)]
pub(crate) struct MessageHandle {
    pub id: String,
    pub receipt_handle: String,
    pub deadline: DeadlineCell,
}

impl MessageHandle {
    pub fn new(id: String, receipt_handle: String, deadline: Instant) -> Self {
        Self {
            id,
            receipt_handle,
            deadline: DeadlineCell::new(deadline),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn deadline_round_trips() {
        let deadline = Instant::now() + Duration::from_secs(30);
        let cell = DeadlineCell::new(deadline);
        assert_eq!(cell.load(), Some(deadline));
        assert!(!cell.is_deleted());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_store_replaces_value() {
        let cell = DeadlineCell::new(Instant::now());
        let later = Instant::now() + Duration::from_secs(60);
        cell.store(later);
        assert_eq!(cell.load(), Some(later));
    }

    #[tokio::test(start_paused = true)]
    async fn deleted_sentinel_wins() {
        let cell = DeadlineCell::new(Instant::now() + Duration::from_secs(30));
        cell.set_deleted();
        assert!(cell.is_deleted());
        assert_eq!(cell.load(), None);
    }
}
