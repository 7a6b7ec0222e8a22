//! Serial port transport
//!
//! Direct USB/RS-232 connection to the controller via the `serialport` crate.
//! The port handle is cloned once on open so the line reader and command
//! writers never contend for the same lock.

use super::{is_timeout, not_connected, LineAssembler, Transport};
use autopolish_core::{ConnectionError, Result};
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,
    /// Port description (e.g., "USB Silicon Labs CP2102")
    pub description: String,
    /// Manufacturer name if available
    pub manufacturer: Option<String>,
}

/// List serial ports that look like CNC controllers
///
/// Filters to USB/ACM style devices:
/// - Windows: COM*
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*
/// - macOS: /dev/cu.usbserial*, /dev/cu.usbmodem*
pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate serial ports: {}", e);
        ConnectionError::Io {
            port: "serial".to_string(),
            reason: format!("failed to enumerate ports: {}", e),
        }
    })?;

    Ok(ports
        .into_iter()
        .filter(|port| is_controller_port(&port.port_name))
        .map(|port| {
            let (description, manufacturer) = match &port.port_type {
                serialport::SerialPortType::UsbPort(usb) => (
                    format!(
                        "USB {} {}",
                        usb.manufacturer.as_deref().unwrap_or("Device"),
                        usb.product.as_deref().unwrap_or("Serial Port")
                    ),
                    usb.manufacturer.clone(),
                ),
                _ => ("Serial Port".to_string(), None),
            };
            SerialPortInfo {
                port_name: port.port_name,
                description,
                manufacturer,
            }
        })
        .collect())
}

fn is_controller_port(port_name: &str) -> bool {
    if let Some(number) = port_name.strip_prefix("COM") {
        return !number.is_empty() && number.chars().all(|c| c.is_ascii_digit());
    }
    ["/dev/ttyUSB", "/dev/ttyACM", "/dev/cu.usbserial", "/dev/cu.usbmodem"]
        .iter()
        .any(|prefix| port_name.starts_with(prefix))
}

struct SerialReader {
    port: Box<dyn serialport::SerialPort>,
    lines: LineAssembler,
}

/// Serial transport backed by the `serialport` crate
pub struct SerialTransport {
    port_name: String,
    baud_rate: u32,
    writer: Mutex<Option<Box<dyn serialport::SerialPort>>>,
    reader: Mutex<Option<SerialReader>>,
}

impl SerialTransport {
    /// Create a transport for `port_name`; nothing is opened yet
    pub fn new(port_name: &str, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.to_string(),
            baud_rate,
            writer: Mutex::new(None),
            reader: Mutex::new(None),
        }
    }

    /// Configured baud rate
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

impl Transport for SerialTransport {
    fn name(&self) -> String {
        self.port_name.clone()
    }

    fn open(&self) -> io::Result<()> {
        let mut writer = self.writer.lock();
        if writer.is_some() {
            return Ok(());
        }

        let port = serialport::new(&self.port_name, self.baud_rate)
            .timeout(Duration::from_millis(10))
            .open()
            .map_err(|e| {
                tracing::warn!("Failed to open serial port {}: {}", self.port_name, e);
                io::Error::from(e)
            })?;
        let read_half = port.try_clone()?;

        *self.reader.lock() = Some(SerialReader {
            port: read_half,
            lines: LineAssembler::default(),
        });
        *writer = Some(port);
        tracing::info!("Opened {} at {} baud", self.port_name, self.baud_rate);
        Ok(())
    }

    fn close(&self) -> io::Result<()> {
        let was_open = self.writer.lock().take().is_some();
        self.reader.lock().take();
        if was_open {
            tracing::info!("Closed {}", self.port_name);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.writer.lock().is_some()
    }

    fn write(&self, data: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock();
        let port = writer
            .as_mut()
            .ok_or_else(|| not_connected(&self.port_name))?;
        port.write_all(data)?;
        port.flush()
    }

    fn read_line(&self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        let mut reader = self.reader.lock();
        let reader = reader
            .as_mut()
            .ok_or_else(|| not_connected(&self.port_name))?;

        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 256];
        loop {
            if let Some(line) = reader.lines.next_line() {
                return Ok(Some(line));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            reader.port.set_timeout(remaining)?;
            match reader.port.read(&mut chunk) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("{} closed by device", self.port_name),
                    ))
                }
                Ok(n) => reader.lines.push(&chunk[..n]),
                Err(e) if is_timeout(&e) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }

    fn discard_input(&self) -> io::Result<()> {
        if let Some(reader) = self.reader.lock().as_mut() {
            reader.lines.clear();
            reader.port.clear(serialport::ClearBuffer::Input)?;
        }
        Ok(())
    }
}
