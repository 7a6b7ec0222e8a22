//! FluidNC/GRBL controller client
//!
//! Public facade over a [`Transport`]: connection lifecycle, acknowledged
//! and flow-controlled command sending, jogging, real-time control bytes and
//! status polling.
//!
//! ```no_run
//! # async fn demo() -> autopolish_core::Result<()> {
//! use autopolish_communication::{ClientConfig, ControllerClient, SimulatedTransport};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let client = ControllerClient::new(Arc::new(SimulatedTransport::new()), ClientConfig::default());
//! client.connect().await?;
//! client.send_command("G21 G90", true, Duration::from_secs(5)).await?;
//! let status = client.wait_until_idle(5.0, Duration::from_secs(10)).await;
//! println!("{}", status);
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

use super::reader::{spawn_reader, LineDispatcher, ReaderHandle};
use super::status_cache::StatusCache;
use super::tracker::ResponseTracker;
use crate::communication::Transport;
use async_trait::async_trait;
use autopolish_core::{
    ClientEvent, ConnectionError, ControllerError, MachineStatus, MotionController, Result,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

const SOFT_RESET: u8 = 0x18;
const FEED_HOLD: u8 = b'!';
const CYCLE_START: u8 = b'~';
const STATUS_QUERY: u8 = b'?';

/// Shortest status polling period
const MIN_POLL_PERIOD: Duration = Duration::from_millis(10);

/// Client timing configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Transport read timeout used by the line reader loop
    pub read_timeout: Duration,
    /// Query status on connect and wait for the first frame
    pub wait_for_banner: bool,
    /// How long to wait for the first status frame
    pub banner_timeout: Duration,
    /// Fail `connect` if no status frame arrives in time
    pub require_banner: bool,
    /// Acknowledgement timeout for `unlock` and other short commands
    pub ack_timeout: Duration,
    /// Acknowledgement timeout for `home`
    pub homing_timeout: Duration,
    /// Pause after a soft reset before discarding input
    pub reset_settle: Duration,
    /// Bound on waiting for the line reader to exit on close
    pub close_join_timeout: Duration,
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(50),
            wait_for_banner: true,
            banner_timeout: Duration::from_secs(2),
            require_banner: false,
            ack_timeout: Duration::from_secs(5),
            homing_timeout: Duration::from_secs(60),
            reset_settle: Duration::from_millis(200),
            close_join_timeout: Duration::from_secs(1),
            event_capacity: 256,
        }
    }
}

/// Allowed relative jog distance per axis, `(min, max)` in mm
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct JogLimits {
    /// X axis bounds
    pub x: Option<(f64, f64)>,
    /// Y axis bounds
    pub y: Option<(f64, f64)>,
    /// Z axis bounds
    pub z: Option<(f64, f64)>,
}

impl JogLimits {
    /// Same bounds on every axis
    pub fn symmetric(limit: f64) -> Self {
        let bounds = Some((-limit.abs(), limit.abs()));
        Self {
            x: bounds,
            y: bounds,
            z: bounds,
        }
    }

    fn check(&self, axis: char, value: f64) -> Result<()> {
        let bounds = match axis {
            'X' => self.x,
            'Y' => self.y,
            _ => self.z,
        };
        if let Some((min, max)) = bounds {
            if value < min || value > max {
                return Err(ControllerError::OutOfRange {
                    axis,
                    value,
                    min,
                    max,
                }
                .into());
            }
        }
        Ok(())
    }
}

/// GRBL/FluidNC protocol client
pub struct ControllerClient {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    tracker: Arc<ResponseTracker>,
    status: Arc<StatusCache>,
    events: broadcast::Sender<ClientEvent>,
    reader: Mutex<Option<ReaderHandle>>,
}

impl ControllerClient {
    /// Create a client over `transport`; nothing is opened until `connect`
    pub fn new(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            transport,
            config,
            tracker: Arc::new(ResponseTracker::new()),
            status: Arc::new(StatusCache::new()),
            events,
            reader: Mutex::new(None),
        }
    }

    /// Timing configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Transport name (port or address)
    pub fn name(&self) -> String {
        self.transport.name()
    }

    /// Subscribe to line, ack, error and status events
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Whether the transport is open and the line reader running
    pub fn is_connected(&self) -> bool {
        self.reader.lock().is_some() && self.transport.is_open() && !self.tracker.is_stopped()
    }

    /// Number of commands sent but not yet answered
    pub fn in_flight(&self) -> usize {
        self.tracker.in_flight()
    }

    /// Most recently parsed status frame
    pub fn last_status(&self) -> Option<MachineStatus> {
        self.status.latest()
    }

    /// Open the transport, discard stale input and start the line reader.
    ///
    /// With `wait_for_banner` a status query is sent and the first status
    /// frame awaited; a missing frame only fails when `require_banner` is set.
    pub async fn connect(&self) -> Result<()> {
        if self.reader.lock().is_some() {
            if self.is_connected() {
                return Ok(());
            }
            // Reader died underneath us; tear down before reconnecting.
            self.close().await?;
        }

        let port = self.transport.name();
        self.transport
            .open()
            .map_err(|e| ConnectionError::FailedToOpen {
                port: port.clone(),
                reason: e.to_string(),
            })?;
        self.transport.discard_input().map_err(|e| ConnectionError::Io {
            port: port.clone(),
            reason: e.to_string(),
        })?;

        self.tracker.restart();
        self.status.clear();
        let dispatcher =
            LineDispatcher::new(self.tracker.clone(), self.status.clone(), self.events.clone());
        let handle = spawn_reader(self.transport.clone(), dispatcher, self.config.read_timeout);
        *self.reader.lock() = Some(handle);
        tracing::info!("Connected to controller on {}", port);

        if self.config.wait_for_banner {
            let seen = self.status.sequence();
            self.status_query()?;
            let first = self
                .status
                .wait_newer_than(seen, self.config.banner_timeout)
                .await;
            match first {
                Some(status) => tracing::info!("Controller reports {}", status.state),
                None if self.config.require_banner => {
                    self.close().await?;
                    return Err(ControllerError::Timeout {
                        operation: "first status report".to_string(),
                        timeout_ms: self.config.banner_timeout.as_millis() as u64,
                    }
                    .into());
                }
                None => tracing::warn!(
                    "No status report from {} within {:?}",
                    port,
                    self.config.banner_timeout
                ),
            }
        }
        Ok(())
    }

    /// Stop the line reader and close the transport. Idempotent.
    ///
    /// Waiters blocked in other calls are released with a disconnected error.
    pub async fn close(&self) -> Result<()> {
        let handle = self.reader.lock().take();
        if let Some(handle) = handle {
            let _ = handle.shutdown.try_send(());
            if tokio::time::timeout(self.config.close_join_timeout, handle.task)
                .await
                .is_err()
            {
                tracing::warn!(
                    "Line reader on {} did not stop within {:?}",
                    self.transport.name(),
                    self.config.close_join_timeout
                );
            }
            tracing::info!("Disconnected from {}", self.transport.name());
        }
        self.tracker.mark_stopped();
        self.transport.close().map_err(|e| ConnectionError::Io {
            port: self.transport.name(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ControllerError::NotConnected.into())
        }
    }

    fn write_bytes(&self, data: &[u8]) -> Result<()> {
        self.transport.write(data).map_err(|e| {
            ConnectionError::Io {
                port: self.transport.name(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    fn write_realtime(&self, byte: u8) -> Result<()> {
        self.ensure_connected()?;
        self.write_bytes(&[byte])
    }

    /// Send one command line.
    ///
    /// The line counts as in flight until its `ok`/`error` arrives. With
    /// `wait_for_ack`, fails with `Timeout` if that takes longer than
    /// `timeout`; the command is not retried.
    pub async fn send_command(
        &self,
        line: &str,
        wait_for_ack: bool,
        timeout: Duration,
    ) -> Result<()> {
        self.ensure_connected()?;
        let line = line.trim();

        let count = self.tracker.register_send();
        if let Err(e) = self.write_bytes(format!("{}\n", line).as_bytes()) {
            self.tracker.rollback_send();
            return Err(e);
        }
        tracing::debug!("> {}", line);

        if wait_for_ack {
            self.tracker
                .wait_for_at_most(count - 1, timeout, &format!("'ok' to '{}'", line))
                .await?;
        }
        Ok(())
    }

    /// Stream lines with at most `max_outstanding` unacknowledged.
    pub async fn stream_commands(
        &self,
        lines: &[String],
        max_outstanding: usize,
        per_line_timeout: Duration,
    ) -> Result<()> {
        self.stream_commands_with_progress(lines, max_outstanding, per_line_timeout, |_| {})
            .await
    }

    /// Stream lines with at most `max_outstanding` unacknowledged, calling
    /// `progress` with the running count after each line is written.
    ///
    /// A new line is only written once the in-flight count is below the
    /// window. After the last line the remaining acknowledgements must
    /// arrive within `per_line_timeout` times the number outstanding.
    pub async fn stream_commands_with_progress<F>(
        &self,
        lines: &[String],
        max_outstanding: usize,
        per_line_timeout: Duration,
        mut progress: F,
    ) -> Result<()>
    where
        F: FnMut(usize) + Send,
    {
        self.ensure_connected()?;
        let window = max_outstanding.max(1);

        for (index, line) in lines.iter().enumerate() {
            self.tracker
                .wait_for_at_most(window - 1, per_line_timeout, "planner window")
                .await?;
            self.send_command(line, false, per_line_timeout).await?;
            progress(index + 1);
        }

        let remaining = self.tracker.in_flight();
        let drain_timeout = per_line_timeout * remaining.max(1) as u32;
        self.tracker
            .wait_for_at_most(
                0,
                drain_timeout,
                &format!("{} pending acknowledgements", remaining),
            )
            .await
    }

    /// Relative jog (`$J=G91 G21 ...`).
    ///
    /// Non-zero distances are checked against `limits` before anything is
    /// written. Jogs are not awaited; the acknowledgement is still counted.
    pub async fn jog(
        &self,
        dx: f64,
        dy: f64,
        dz: f64,
        feed_mm_min: f64,
        limits: Option<&JogLimits>,
    ) -> Result<()> {
        let moves = [('X', dx), ('Y', dy), ('Z', dz)];
        let mut words = Vec::new();
        for (axis, distance) in moves {
            if !distance.is_finite() {
                return Err(ControllerError::InvalidArgument {
                    reason: format!("jog distance {}{} is not finite", axis, distance),
                }
                .into());
            }
            if distance.abs() <= 1e-9 {
                continue;
            }
            if let Some(limits) = limits {
                limits.check(axis, distance)?;
            }
            words.push(format!("{}{:.4}", axis, distance));
        }
        if !feed_mm_min.is_finite() || feed_mm_min <= 0.0 {
            return Err(ControllerError::InvalidArgument {
                reason: format!("jog feed {} must be positive", feed_mm_min),
            }
            .into());
        }
        if words.is_empty() {
            tracing::debug!("Ignoring zero-length jog");
            return Ok(());
        }

        let command = format!("$J=G91 G21 {} F{:.2}", words.join(" "), feed_mm_min);
        self.send_command(&command, false, self.config.ack_timeout)
            .await
    }

    /// Soft reset (Ctrl-X): clears the firmware planner and forces the
    /// in-flight count to zero.
    pub async fn soft_reset(&self) -> Result<()> {
        self.write_realtime(SOFT_RESET)?;
        tracing::info!("Soft reset sent to {}", self.transport.name());
        tokio::time::sleep(self.config.reset_settle).await;
        self.transport
            .discard_input()
            .map_err(|e| ConnectionError::Io {
                port: self.transport.name(),
                reason: e.to_string(),
            })?;
        self.tracker.reset();
        self.tracker.clear_parser_states();
        Ok(())
    }

    /// Feed hold (`!`)
    pub fn feed_hold(&self) -> Result<()> {
        self.write_realtime(FEED_HOLD)
    }

    /// Cycle start / resume (`~`)
    pub fn cycle_start(&self) -> Result<()> {
        self.write_realtime(CYCLE_START)
    }

    /// Request a status report (`?`)
    pub fn status_query(&self) -> Result<()> {
        self.write_realtime(STATUS_QUERY)
    }

    /// Clear an alarm lock (`$X`)
    pub async fn unlock(&self) -> Result<()> {
        self.send_command("$X", true, self.config.ack_timeout).await
    }

    /// Run the homing cycle (`$H`)
    pub async fn home(&self) -> Result<()> {
        self.send_command("$H", true, self.config.homing_timeout)
            .await
    }

    /// Poll status until the machine reports `Idle`.
    ///
    /// Only frames received after polling started count. On timeout, or if
    /// the connection drops, the last known status is returned instead.
    pub async fn wait_until_idle(&self, poll_hz: f64, timeout: Duration) -> MachineStatus {
        let period = if poll_hz > 0.0 && poll_hz.is_finite() {
            Duration::from_secs_f64(1.0 / poll_hz).max(MIN_POLL_PERIOD)
        } else {
            MIN_POLL_PERIOD
        };
        let start_sequence = self.status.sequence();
        let deadline = Instant::now() + timeout;

        while Instant::now() < deadline {
            if let Err(e) = self.status_query() {
                tracing::warn!("Status polling stopped: {}", e);
                break;
            }
            tokio::time::sleep(period).await;
            if let Some(status) = self.status.newer_than(start_sequence) {
                if status.state.is_idle() {
                    return status;
                }
            }
        }

        let last = self.status.latest().unwrap_or_else(MachineStatus::unknown);
        tracing::warn!("Controller not idle after {:?}; last state {}", timeout, last.state);
        last
    }

    /// Query the G-code parser state (`$G`).
    ///
    /// Pending input and stale replies are discarded first. Returns `None`
    /// if no reply arrives within `timeout`.
    pub async fn parser_state(&self, timeout: Duration) -> Result<Option<String>> {
        self.ensure_connected()?;
        self.transport.discard_input().map_err(|e| ConnectionError::Io {
            port: self.transport.name(),
            reason: e.to_string(),
        })?;
        self.tracker.clear_parser_states();
        self.send_command("$G", false, timeout).await?;
        Ok(self.tracker.next_parser_state(timeout).await)
    }
}

impl fmt::Debug for ControllerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerClient")
            .field("transport", &self.transport.name())
            .field("connected", &self.is_connected())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl Drop for ControllerClient {
    fn drop(&mut self) {
        if let Some(handle) = self.reader.get_mut().take() {
            let _ = handle.shutdown.try_send(());
        }
        let _ = self.transport.close();
    }
}

#[async_trait]
impl MotionController for ControllerClient {
    async fn send_command(
        &self,
        line: &str,
        wait_for_ack: bool,
        timeout: Duration,
    ) -> Result<()> {
        ControllerClient::send_command(self, line, wait_for_ack, timeout).await
    }

    async fn stream_commands(
        &self,
        lines: &[String],
        max_outstanding: usize,
        per_line_timeout: Duration,
    ) -> Result<()> {
        ControllerClient::stream_commands(self, lines, max_outstanding, per_line_timeout).await
    }

    async fn wait_until_idle(&self, poll_hz: f64, timeout: Duration) -> MachineStatus {
        ControllerClient::wait_until_idle(self, poll_hz, timeout).await
    }
}
