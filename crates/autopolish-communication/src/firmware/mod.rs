//! Firmware protocol implementations
//!
//! Only the GRBL/FluidNC line protocol is supported.

pub mod fluidnc;
