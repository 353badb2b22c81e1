//! What callbacks can see and do while the loop dispatches to them.

use crate::peer::{Peer, PeerId};
use crate::reactor::poller::Backend;
use crate::reactor::table::PeerTable;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Requests loop termination, from a callback or from another thread.
///
/// The loop only looks at the flag between readiness batches: every event
/// already reported for the current tick is delivered first. With an
/// infinite timeout the request takes effect on the next wake-up.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Counters kept by the driver.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopStats {
    /// Connections that got a table slot
    pub accepted: u64,
    /// Connections closed on arrival because the loop was at capacity
    pub refused: u64,
    /// Peers closed by the loop
    pub closed: u64,
    /// Completed backend waits
    pub ticks: u64,
}

/// Read-only view of the loop handed to every callback.
pub struct LoopContext<'a> {
    table: &'a PeerTable,
    stop: &'a StopHandle,
    backend: Backend,
    stats: LoopStats,
}

impl<'a> LoopContext<'a> {
    pub(crate) fn new(
        table: &'a PeerTable,
        stop: &'a StopHandle,
        backend: Backend,
        stats: LoopStats,
    ) -> Self {
        Self {
            table,
            stop,
            backend,
            stats,
        }
    }

    /// Asks the loop to exit once the current batch is delivered.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.is_stopped()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Looks a live peer up by id. Ids of closed peers resolve to `None`.
    pub fn peer(&self, id: PeerId) -> Option<&'a Peer> {
        self.table.get(id)
    }

    /// Every live peer, listeners included.
    pub fn peers(&self) -> impl Iterator<Item = &'a Peer> + 'a {
        self.table.iter()
    }

    pub fn peer_count(&self) -> usize {
        self.table.len()
    }

    /// Total number of table slots.
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }
}
