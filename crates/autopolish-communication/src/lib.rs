//! # Autopolish Communication
//!
//! Byte transports (serial, TCP, in-process simulator) and the GRBL/FluidNC
//! protocol client that drives them: line reader, response classification,
//! flow-controlled streaming and status parsing.

pub mod communication;
pub mod firmware;

pub use communication::{
    open_transport,
    serial::{list_ports, SerialPortInfo, SerialTransport},
    simulator::SimulatedTransport,
    tcp::TcpTransport,
    ConnectionDriver, ConnectionParams, Transport,
};

pub use firmware::fluidnc::{
    classify, ClientConfig, ControllerClient, ControllerResponse, JogLimits, ResponseTracker,
    StatusCache, StatusParser,
};
