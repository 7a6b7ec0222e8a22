//! Motion controller abstraction
//!
//! The workflow engine and macro runner drive the machine exclusively
//! through [`MotionController`]. The protocol client in
//! `autopolish-communication` is the production implementation; tests may
//! substitute their own.

use crate::data::MachineStatus;
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Command channel to a GRBL/FluidNC-class motion controller
#[async_trait]
pub trait MotionController: Send + Sync {
    /// Send one command line.
    ///
    /// With `wait_for_ack` the call returns once the controller answers
    /// with `ok`/`error`, or fails with a timeout error after `timeout`.
    async fn send_command(&self, line: &str, wait_for_ack: bool, timeout: Duration)
        -> Result<()>;

    /// Stream lines keeping at most `max_outstanding` unacknowledged,
    /// then wait for the remaining acknowledgements.
    async fn stream_commands(
        &self,
        lines: &[String],
        max_outstanding: usize,
        per_line_timeout: Duration,
    ) -> Result<()>;

    /// Poll status until the machine reports `Idle`.
    ///
    /// Never fails: on timeout the last known status is returned and the
    /// caller inspects its state.
    async fn wait_until_idle(&self, poll_hz: f64, timeout: Duration) -> MachineStatus;
}
