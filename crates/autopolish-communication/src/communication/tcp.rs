//! TCP transport
//!
//! FluidNC exposes the same line protocol over its telnet port.

use super::{is_timeout, not_connected, LineAssembler, Transport};
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

struct TcpReader {
    stream: TcpStream,
    lines: LineAssembler,
}

/// TCP transport to a network-attached controller
pub struct TcpTransport {
    host: String,
    port: u16,
    connect_timeout: Duration,
    writer: Mutex<Option<TcpStream>>,
    reader: Mutex<Option<TcpReader>>,
}

impl TcpTransport {
    /// Create a transport for `host:port`; nothing is connected yet
    pub fn new(host: &str, port: u16, connect_timeout: Duration) -> Self {
        Self {
            host: host.to_string(),
            port,
            connect_timeout,
            writer: Mutex::new(None),
            reader: Mutex::new(None),
        }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Transport for TcpTransport {
    fn name(&self) -> String {
        self.address()
    }

    fn open(&self) -> io::Result<()> {
        let mut writer = self.writer.lock();
        if writer.is_some() {
            return Ok(());
        }

        let addr = self
            .address()
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("{} did not resolve", self.address()),
                )
            })?;
        let stream = TcpStream::connect_timeout(&addr, self.connect_timeout)?;
        stream.set_nodelay(true)?;
        let read_half = stream.try_clone()?;

        *self.reader.lock() = Some(TcpReader {
            stream: read_half,
            lines: LineAssembler::default(),
        });
        *writer = Some(stream);
        tracing::info!("Connected to {}", self.address());
        Ok(())
    }

    fn close(&self) -> io::Result<()> {
        if let Some(stream) = self.writer.lock().take() {
            let _ = stream.shutdown(Shutdown::Both);
            tracing::info!("Disconnected from {}", self.address());
        }
        self.reader.lock().take();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.writer.lock().is_some()
    }

    fn write(&self, data: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock();
        let stream = writer
            .as_mut()
            .ok_or_else(|| not_connected(&self.address()))?;
        stream.write_all(data)?;
        stream.flush()
    }

    fn read_line(&self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        let mut reader = self.reader.lock();
        let reader = reader
            .as_mut()
            .ok_or_else(|| not_connected(&self.address()))?;

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
            // A zero read timeout means "block forever" for std sockets.
            reader
                .stream
                .set_read_timeout(Some(remaining.max(Duration::from_millis(1))))?;
            match reader.stream.read(&mut chunk) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("{} closed the connection", self.address()),
                    ))
                }
                Ok(n) => reader.lines.push(&chunk[..n]),
                Err(e) if is_timeout(&e) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }

    fn discard_input(&self) -> io::Result<()> {
        let mut reader = self.reader.lock();
        let Some(reader) = reader.as_mut() else {
            return Ok(());
        };
        reader.lines.clear();
        reader.stream.set_nonblocking(true)?;
        let mut chunk = [0u8; 256];
        let result = loop {
            match reader.stream.read(&mut chunk) {
                Ok(0) => break Ok(()),
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        reader.stream.set_nonblocking(false)?;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_reads_lines_from_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut received = [0u8; 3];
            socket.read_exact(&mut received).unwrap();
            socket.write_all(b"ok\r\n<Idle|MPos:0,0,0>\n").unwrap();
            received
        });

        let transport = TcpTransport::new("127.0.0.1", port, Duration::from_secs(1));
        transport.open().unwrap();
        transport.write(b"$G\n").unwrap();

        let first = transport.read_line(Duration::from_secs(2)).unwrap();
        assert_eq!(first, Some(b"ok".to_vec()));
        let second = transport.read_line(Duration::from_secs(2)).unwrap();
        assert_eq!(second, Some(b"<Idle|MPos:0,0,0>".to_vec()));
        assert_eq!(&server.join().unwrap(), b"$G\n");

        transport.close().unwrap();
        assert!(!transport.is_open());
    }
}
