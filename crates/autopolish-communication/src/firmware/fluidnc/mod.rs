//! FluidNC/GRBL protocol client
//!
//! - [`status_parser`] - angle-bracket and JSON status frames
//! - [`response_parser`] - classification of received lines
//! - [`error_decoder`] - human-readable error and alarm codes
//! - [`tracker`] / [`status_cache`] - state shared with the line reader
//! - [`reader`] - background line reader
//! - [`client`] - the public [`ControllerClient`] facade

pub mod client;
pub mod error_decoder;
pub mod reader;
pub mod response_parser;
pub mod status_cache;
pub mod status_parser;
pub mod tracker;

pub use client::{ClientConfig, ControllerClient, JogLimits};
pub use response_parser::{classify, ControllerResponse};
pub use status_cache::StatusCache;
pub use status_parser::StatusParser;
pub use tracker::ResponseTracker;
