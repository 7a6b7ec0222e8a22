//! Events published by the controller client
//!
//! Every received line is published as [`ClientEvent::Line`] before any
//! classification, followed by the classified event (if any). Events travel
//! over a `tokio::sync::broadcast` channel, so a slow subscriber lags and
//! loses events instead of stalling the line reader.

use crate::data::MachineStatus;

/// Controller client event types
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Raw received line (trimmed)
    Line(String),
    /// `ok` acknowledgement
    Ack,
    /// `error...`/`alarm...` response, or a reader-side failure
    Error(String),
    /// Parsed status frame
    Status(MachineStatus),
}

impl std::fmt::Display for ClientEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientEvent::Line(line) => write!(f, "Line: {}", line),
            ClientEvent::Ack => write!(f, "Ack"),
            ClientEvent::Error(msg) => write!(f, "Error: {}", msg),
            ClientEvent::Status(status) => write!(f, "Status: {}", status),
        }
    }
}
