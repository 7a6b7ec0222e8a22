//! Most recent machine status
//!
//! Written only by the line reader, read by any caller. Each update replaces
//! the snapshot wholesale and bumps a sequence number so pollers can tell a
//! fresh frame from one received before they asked.

use autopolish_core::MachineStatus;
use parking_lot::RwLock;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct CacheState {
    sequence: u64,
    status: Option<MachineStatus>,
}

/// Single-writer, multi-reader status snapshot
#[derive(Debug, Default)]
pub struct StatusCache {
    state: RwLock<CacheState>,
    updated: Notify,
}

impl StatusCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot
    pub fn update(&self, status: MachineStatus) {
        {
            let mut state = self.state.write();
            state.sequence += 1;
            state.status = Some(status);
        }
        self.updated.notify_waiters();
    }

    /// Copy of the latest snapshot, if any frame has been received
    pub fn latest(&self) -> Option<MachineStatus> {
        self.state.read().status.clone()
    }

    /// Number of frames received so far
    pub fn sequence(&self) -> u64 {
        self.state.read().sequence
    }

    /// Latest snapshot if it arrived after `sequence`
    pub fn newer_than(&self, sequence: u64) -> Option<MachineStatus> {
        let state = self.state.read();
        if state.sequence > sequence {
            state.status.clone()
        } else {
            None
        }
    }

    /// Forget the snapshot
    pub fn clear(&self) {
        self.state.write().status = None;
    }

    /// Wait up to `timeout` for a frame newer than `sequence`
    pub async fn wait_newer_than(&self, sequence: u64, timeout: Duration) -> Option<MachineStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.updated.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(status) = self.newer_than(sequence) {
                return Some(status);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.newer_than(sequence);
            }
        }
    }
}
