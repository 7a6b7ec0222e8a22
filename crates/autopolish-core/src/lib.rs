//! # Autopolish Core
//!
//! Core types, traits, and errors shared by the autopolish crates.
//! Provides the machine status model, controller events, the
//! [`MotionController`] abstraction used by the workflow engine, and the
//! unified error taxonomy.

pub mod controller;
pub mod data;
pub mod error;
pub mod event;

pub use controller::MotionController;

pub use data::{BufferType, MachineState, MachineStatus, Overrides};

pub use error::{
    ConfigError, ConnectionError, ControllerError, Error, MacroError, Result, WorkflowError,
};

pub use event::ClientEvent;
