//! Page store statistics tracking.

use std::cell::Cell;
use std::fmt;

/// Counters maintained by the [`DiskManager`](crate::storage::DiskManager).
///
/// The store is single-threaded, so plain [`Cell`]s are enough to bump
/// counters through `&self` on the read path.
///
/// # Example
/// ```
/// use bplusdb::StoreStats;
///
/// let stats = StoreStats::new();
/// stats.nodes_read.set(stats.nodes_read.get() + 1);
/// assert_eq!(stats.snapshot().nodes_read, 1);
/// ```
#[derive(Debug)]
pub struct StoreStats {
    /// Nodes decoded from the mapping.
    pub nodes_read: Cell<u64>,

    /// Nodes encoded and flushed to a page.
    pub nodes_written: Cell<u64>,

    /// Pages handed out by the free-page queue.
    pub pages_allocated: Cell<u64>,

    /// Pages returned to the free-page queue.
    pub pages_freed: Cell<u64>,

    /// Times the store file was extended.
    pub file_growths: Cell<u64>,
}

impl StoreStats {
    /// Create a new stats tracker with all counters at zero.
    pub fn new() -> Self {
        Self {
            nodes_read: Cell::new(0),
            nodes_written: Cell::new(0),
            pages_allocated: Cell::new(0),
            pages_freed: Cell::new(0),
            file_growths: Cell::new(0),
        }
    }

    #[inline]
    pub(crate) fn bump(counter: &Cell<u64>) {
        counter.set(counter.get() + 1);
    }

    /// Copy the counters out for display/logging.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            nodes_read: self.nodes_read.get(),
            nodes_written: self.nodes_written.get(),
            pages_allocated: self.pages_allocated.get(),
            pages_freed: self.pages_freed.get(),
            file_growths: self.file_growths.get(),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.nodes_read.set(0);
        self.nodes_written.set(0);
        self.pages_allocated.set(0);
        self.pages_freed.set(0);
        self.file_growths.set(0);
    }
}

impl Default for StoreStats {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time snapshot of page store statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub nodes_read: u64,
    pub nodes_written: u64,
    pub pages_allocated: u64,
    pub pages_freed: u64,
    pub file_growths: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Stats {{ reads: {}, writes: {}, allocated: {}, freed: {}, growths: {} }}",
            self.nodes_read,
            self.nodes_written,
            self.pages_allocated,
            self.pages_freed,
            self.file_growths
        )
    }
}
