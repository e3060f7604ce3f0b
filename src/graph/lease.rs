//! The connection a session holds, shared with its transaction and cursors.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::error::DriverError;
use crate::pool::PooledConnection;
use crate::protocol::Connection;

/// A pooled connection checked out by one session.
///
/// The session, its open transaction and every cursor they produced hold
/// the lease. Once the session releases the connection the slot is empty
/// and every later use fails with a client error.
pub(crate) struct Lease {
    connection: Mutex<Option<PooledConnection>>,
    pub(crate) streams: StreamTracker,
}

impl Lease {
    pub(crate) fn new(connection: PooledConnection) -> Arc<Self> {
        Arc::new(Self {
            connection: Mutex::new(Some(connection)),
            streams: StreamTracker::default(),
        })
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, Option<PooledConnection>> {
        self.connection.lock().await
    }

    /// Empties the slot, handing the connection back to the caller.
    pub(crate) async fn release(&self) -> Option<PooledConnection> {
        self.streams.supersede();
        self.connection.lock().await.take()
    }

    /// Like [`release`](Self::release) but never waits; for use in `Drop`.
    pub(crate) fn try_release(&self) -> Option<PooledConnection> {
        self.streams.supersede();
        self.connection.try_lock().ok().and_then(|mut slot| slot.take())
    }
}

/// The connection in a locked lease slot.
pub(crate) fn attached(slot: &mut Option<PooledConnection>) -> Result<&mut Connection, DriverError> {
    slot.as_deref_mut().ok_or_else(|| {
        DriverError::Client("the session is closed and its connection was released".to_string())
    })
}

/// What has become of a result stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamStatus {
    /// Still the stream the connection is serving.
    Live,
    /// Aborted by a reset.
    Interrupted,
    /// A later statement ran, or the owning transaction or session ended.
    Superseded,
}

/// Tracks which result stream of a lease is current.
///
/// Every statement gets a fresh id. A cursor compares its id against the
/// live one without taking the connection lock. Id 0 means no stream.
#[derive(Debug, Default)]
pub(crate) struct StreamTracker {
    next: AtomicU64,
    live: AtomicU64,
    interrupted: AtomicU64,
}

impl StreamTracker {
    /// Registers a new live stream, superseding the previous one.
    pub(crate) fn open(&self) -> u64 {
        let id = self.next.fetch_add(1, Ordering::AcqRel) + 1;
        self.live.store(id, Ordering::Release);
        id
    }

    /// No stream is live any more.
    pub(crate) fn supersede(&self) {
        self.live.store(0, Ordering::Release);
    }

    /// The live stream was aborted by a reset.
    pub(crate) fn interrupt(&self) {
        let live = self.live.swap(0, Ordering::AcqRel);
        if live != 0 {
            self.interrupted.store(live, Ordering::Release);
        }
    }

    pub(crate) fn status(&self, id: u64) -> StreamStatus {
        if self.live.load(Ordering::Acquire) == id {
            StreamStatus::Live
        } else if self.interrupted.load(Ordering::Acquire) == id {
            StreamStatus::Interrupted
        } else {
            StreamStatus::Superseded
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_supersedes_previous() {
        let tracker = StreamTracker::default();
        let first = tracker.open();
        let second = tracker.open();

        assert_eq!(tracker.status(first), StreamStatus::Superseded);
        assert_eq!(tracker.status(second), StreamStatus::Live);
    }

    #[test]
    fn test_interrupt_marks_live_stream() {
        let tracker = StreamTracker::default();
        let id = tracker.open();
        tracker.interrupt();

        assert_eq!(tracker.status(id), StreamStatus::Interrupted);
        let next = tracker.open();
        assert_eq!(tracker.status(id), StreamStatus::Interrupted);
        assert_eq!(tracker.status(next), StreamStatus::Live);
    }

    #[test]
    fn test_supersede_without_stream() {
        let tracker = StreamTracker::default();
        tracker.supersede();
        tracker.interrupt();
        assert_eq!(tracker.status(1), StreamStatus::Superseded);
    }
}
