//! In-flight command tracking
//!
//! GRBL answers every command line with exactly one terminal response
//! (`ok`, `error` or `alarm`), in send order, without correlation ids. The
//! tracker therefore only counts: a send increments, a terminal response
//! decrements the oldest outstanding command.
//!
//! The counter, the parser-state queue and the reader-stopped flag share one
//! lock. Every mutation wakes all waiters, and waiters re-check under the
//! lock, so a response arriving between a check and a wait is never lost.

use autopolish_core::{ControllerError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Maximum number of unconsumed parser-state replies kept
pub const PARSER_STATE_CAPACITY: usize = 5;

#[derive(Debug, Default)]
struct TrackerState {
    in_flight: usize,
    parser_states: VecDeque<String>,
    stopped: bool,
}

/// Counts commands sent but not yet answered
#[derive(Debug, Default)]
pub struct ResponseTracker {
    state: Mutex<TrackerState>,
    changed: Notify,
}

impl ResponseTracker {
    /// Create an idle tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Current number of unanswered commands
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    /// Record a command about to be written; returns the new count
    pub fn register_send(&self) -> usize {
        let mut state = self.state.lock();
        state.in_flight += 1;
        state.in_flight
    }

    /// Undo [`register_send`](Self::register_send) after a failed write
    pub fn rollback_send(&self) {
        self.decrement();
    }

    /// Record a terminal response; the count never drops below zero
    pub fn acknowledge(&self) -> usize {
        self.decrement()
    }

    fn decrement(&self) -> usize {
        let remaining = {
            let mut state = self.state.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            state.in_flight
        };
        self.changed.notify_waiters();
        remaining
    }

    /// Force the count to zero. Only a controller soft reset justifies this.
    pub fn reset(&self) {
        self.state.lock().in_flight = 0;
        self.changed.notify_waiters();
    }

    /// Prepare for a new connection
    pub fn restart(&self) {
        *self.state.lock() = TrackerState::default();
        self.changed.notify_waiters();
    }

    /// The line reader exited; wake every waiter so it can fail fast
    pub fn mark_stopped(&self) {
        self.state.lock().stopped = true;
        self.changed.notify_waiters();
    }

    /// Whether the line reader has exited
    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Queue a parser-state reply, dropping the oldest beyond capacity
    pub fn push_parser_state(&self, line: String) {
        {
            let mut state = self.state.lock();
            while state.parser_states.len() >= PARSER_STATE_CAPACITY {
                state.parser_states.pop_front();
            }
            state.parser_states.push_back(line);
        }
        self.changed.notify_waiters();
    }

    /// Drop every queued parser-state reply
    pub fn clear_parser_states(&self) {
        self.state.lock().parser_states.clear();
    }

    /// Number of queued parser-state replies
    pub fn pending_parser_states(&self) -> usize {
        self.state.lock().parser_states.len()
    }

    /// Wait until at most `target` commands are unanswered.
    ///
    /// Fails with `Timeout` after `timeout`, or with `Disconnected` if the
    /// line reader stops first.
    pub async fn wait_for_at_most(
        &self,
        target: usize,
        timeout: Duration,
        operation: &str,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.state.lock();
                if state.in_flight <= target {
                    return Ok(());
                }
                if state.stopped {
                    return Err(ControllerError::Disconnected {
                        operation: operation.to_string(),
                    }
                    .into());
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                if self.in_flight() <= target {
                    return Ok(());
                }
                return Err(ControllerError::Timeout {
                    operation: operation.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                }
                .into());
            }
        }
    }

    /// Take the oldest queued parser-state reply, waiting up to `timeout`
    pub async fn next_parser_state(&self, timeout: Duration) -> Option<String> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if let Some(line) = state.parser_states.pop_front() {
                    return Some(line);
                }
                if state.stopped {
                    return None;
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.state.lock().parser_states.pop_front();
            }
        }
    }
}
