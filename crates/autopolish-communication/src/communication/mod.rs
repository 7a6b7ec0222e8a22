//! Byte transports to the motion controller
//!
//! A [`Transport`] is a blocking, line-oriented duplex channel. The protocol
//! client reads from it on a dedicated blocking task while callers write to
//! it, so every method takes `&self` and implementations keep the read and
//! write halves behind separate locks.

pub mod serial;
pub mod simulator;
pub mod tcp;

use autopolish_core::{ConnectionError, Result};
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Line-oriented duplex channel to a controller
pub trait Transport: Send + Sync {
    /// Port name or address, for logging and errors
    fn name(&self) -> String;

    /// Open the underlying channel. Opening an open transport is a no-op.
    fn open(&self) -> io::Result<()>;

    /// Close the underlying channel. Closing a closed transport is a no-op.
    fn close(&self) -> io::Result<()>;

    /// Whether the channel is currently open
    fn is_open(&self) -> bool;

    /// Write raw bytes (a terminated command line or a single real-time byte)
    fn write(&self, data: &[u8]) -> io::Result<()>;

    /// Read one line without its terminator.
    ///
    /// Returns `Ok(None)` when no complete line arrived within `timeout`.
    /// A closed transport reports `ErrorKind::NotConnected`.
    fn read_line(&self, timeout: Duration) -> io::Result<Option<Vec<u8>>>;

    /// Drop any input received but not yet read
    fn discard_input(&self) -> io::Result<()>;
}

/// Connection driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionDriver {
    /// Serial/USB connection
    #[default]
    Serial,
    /// TCP connection (FluidNC telnet)
    Tcp,
    /// In-process simulated controller
    Simulator,
}

/// Connection parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionParams {
    /// Driver type
    pub driver: ConnectionDriver,
    /// Serial port path (e.g. "/dev/ttyUSB0") or TCP host
    pub port: String,
    /// TCP port (FluidNC telnet defaults to 23)
    pub network_port: u16,
    /// Serial baud rate
    pub baud_rate: u32,
    /// Connect timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            driver: ConnectionDriver::Serial,
            port: String::new(),
            network_port: 23,
            baud_rate: 115_200,
            timeout_ms: 2000,
        }
    }
}

impl ConnectionParams {
    /// Serial connection on `port`
    pub fn serial(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            driver: ConnectionDriver::Serial,
            port: port.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// TCP connection to `host:network_port`
    pub fn tcp(host: impl Into<String>, network_port: u16) -> Self {
        Self {
            driver: ConnectionDriver::Tcp,
            port: host.into(),
            network_port,
            ..Default::default()
        }
    }

    /// In-process simulator
    pub fn simulator() -> Self {
        Self {
            driver: ConnectionDriver::Simulator,
            port: "simulator".to_string(),
            ..Default::default()
        }
    }

    /// Check the parameters are usable for the selected driver
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| -> Result<()> {
            Err(ConnectionError::InvalidParameters {
                reason: reason.to_string(),
            }
            .into())
        };
        match self.driver {
            ConnectionDriver::Serial => {
                if self.port.trim().is_empty() {
                    return invalid("serial port must not be empty");
                }
                if self.baud_rate == 0 {
                    return invalid("baud rate must be positive");
                }
            }
            ConnectionDriver::Tcp => {
                if self.port.trim().is_empty() {
                    return invalid("TCP host must not be empty");
                }
                if self.network_port == 0 {
                    return invalid("TCP port must be positive");
                }
            }
            ConnectionDriver::Simulator => {}
        }
        Ok(())
    }
}

/// Build the transport described by `params`. The transport is not opened.
pub fn open_transport(params: &ConnectionParams) -> Result<Arc<dyn Transport>> {
    params.validate()?;
    let transport: Arc<dyn Transport> = match params.driver {
        ConnectionDriver::Serial => {
            Arc::new(serial::SerialTransport::new(&params.port, params.baud_rate))
        }
        ConnectionDriver::Tcp => Arc::new(tcp::TcpTransport::new(
            &params.port,
            params.network_port,
            Duration::from_millis(params.timeout_ms),
        )),
        ConnectionDriver::Simulator => Arc::new(simulator::SimulatedTransport::new()),
    };
    Ok(transport)
}

/// Splits a byte stream into lines
///
/// Accepts `\n` and `\r\n`; a trailing `\r` is stripped.
#[derive(Debug, Default)]
pub(crate) struct LineAssembler {
    buffer: Vec<u8>,
}

impl LineAssembler {
    pub(crate) fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub(crate) fn next_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.buffer.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }

    pub(crate) fn clear(&mut self) {
        self.buffer.clear();
    }
}

pub(crate) fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

pub(crate) fn not_connected(name: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, format!("{} is not open", name))
}
