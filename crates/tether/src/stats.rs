//! Lifecycle Statistics
//!
//! Per-thread counters for single-threaded blocks. Blocks and handles of the
//! baseline types never leave the thread that created them, so a thread-local
//! view is exact; the [`crate::sync`] variant is not counted here.

use std::cell::Cell;

use crate::config;

/// Snapshot of the counters for the current thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TetherStats {
    pub blocks_created: u64,
    pub blocks_freed: u64,
    pub invalidations: u64,
    pub handles_acquired: u64,
    pub handles_released: u64,
    pub downcasts_rejected: u64,
}

impl TetherStats {
    /// Blocks allocated and not yet freed
    pub fn live_blocks(&self) -> u64 {
        self.blocks_created.saturating_sub(self.blocks_freed)
    }

    /// Handles holding a block reference right now
    pub fn live_handles(&self) -> u64 {
        self.handles_acquired.saturating_sub(self.handles_released)
    }
}

thread_local! {
    static COUNTERS: Cell<TetherStats> = Cell::new(TetherStats::default());
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Counter {
    BlockCreated,
    BlockFreed,
    Invalidated,
    HandleAcquired,
    HandleReleased,
    DowncastRejected,
}

pub(crate) fn record(counter: Counter) {
    if !config::flags().stats {
        return;
    }
    COUNTERS.with(|cell| {
        let mut stats = cell.get();
        match counter {
            Counter::BlockCreated => stats.blocks_created += 1,
            Counter::BlockFreed => stats.blocks_freed += 1,
            Counter::Invalidated => stats.invalidations += 1,
            Counter::HandleAcquired => stats.handles_acquired += 1,
            Counter::HandleReleased => stats.handles_released += 1,
            Counter::DowncastRejected => stats.downcasts_rejected += 1,
        }
        cell.set(stats);
    });
}

/// Counters accumulated on this thread
pub fn snapshot() -> TetherStats {
    COUNTERS.with(Cell::get)
}

/// Reset this thread's counters
pub fn reset() {
    COUNTERS.with(|cell| cell.set(TetherStats::default()));
}
