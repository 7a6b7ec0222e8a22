//! Data models for machine status and specimen buffers
//!
//! This module provides:
//! - Machine state as reported by GRBL/FluidNC status frames
//! - Immutable machine status snapshots
//! - Feed/rapid/spindle override percentages
//! - Specimen buffer identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine state reported in the first field of a status frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MachineState {
    /// Ready, nothing executing
    Idle,
    /// Executing motion
    Run,
    /// Feed hold active
    Hold,
    /// Jogging
    Jog,
    /// Alarm lock
    Alarm,
    /// Safety door open
    Door,
    /// G-code check mode
    Check,
    /// Homing cycle
    Home,
    /// Sleep mode
    Sleep,
    /// Not yet reported or unrecognised
    #[default]
    Unknown,
}

impl MachineState {
    /// Parse the state field of a status frame.
    ///
    /// Sub-states such as `Hold:0` or `Door:1` map to their base state.
    /// Matching is case-insensitive; anything unrecognised is `Unknown`.
    pub fn parse(state: &str) -> Self {
        let base = state.split(':').next().unwrap_or("").trim();
        match base.to_ascii_lowercase().as_str() {
            "idle" => Self::Idle,
            "run" => Self::Run,
            "hold" => Self::Hold,
            "jog" => Self::Jog,
            "alarm" => Self::Alarm,
            "door" => Self::Door,
            "check" => Self::Check,
            "home" => Self::Home,
            "sleep" => Self::Sleep,
            _ => Self::Unknown,
        }
    }

    /// Whether the controller has finished all queued motion
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "Idle",
            Self::Run => "Run",
            Self::Hold => "Hold",
            Self::Jog => "Jog",
            Self::Alarm => "Alarm",
            Self::Door => "Door",
            Self::Check => "Check",
            Self::Home => "Home",
            Self::Sleep => "Sleep",
            Self::Unknown => "Unknown",
        };
        write!(f, "{}", s)
    }
}

/// Override percentages (`Ov:feed,rapid,spindle`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overrides {
    /// Feed override percentage
    pub feed: u16,
    /// Rapid override percentage
    pub rapid: u16,
    /// Spindle override percentage
    pub spindle: u16,
}

impl Default for Overrides {
    fn default() -> Self {
        Self {
            feed: 100,
            rapid: 100,
            spindle: 100,
        }
    }
}

/// Snapshot of one parsed status frame
///
/// Replaced wholesale whenever a new frame is parsed; never patched in place.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MachineStatus {
    /// Machine state
    pub state: MachineState,
    /// Machine position `[X, Y, Z, ...]`
    pub machine_position: Option<Vec<f64>>,
    /// Work position `[X, Y, Z, ...]`
    pub work_position: Option<Vec<f64>>,
    /// Current feed rate (mm/min)
    pub feed: Option<f64>,
    /// Current spindle speed
    pub spindle: Option<f64>,
    /// Override percentages
    pub overrides: Option<Overrides>,
    /// The line this snapshot was parsed from
    pub raw_line: String,
}

impl MachineStatus {
    /// Status used when nothing has been reported yet
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Z coordinate of the machine position, if reported
    pub fn machine_z(&self) -> Option<f64> {
        self.machine_position
            .as_ref()
            .and_then(|p| p.get(2).copied())
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.state)?;
        if let Some(mpos) = &self.machine_position {
            let coords: Vec<String> = mpos.iter().map(|v| format!("{:.3}", v)).collect();
            write!(f, " MPos:{}", coords.join(","))?;
        }
        if let Some(feed) = self.feed {
            write!(f, " F:{}", feed)?;
        }
        Ok(())
    }
}

/// Specimen buffer rack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferType {
    /// Rack holding unprocessed specimens
    Input,
    /// Rack receiving processed specimens
    Output,
}

impl fmt::Display for BufferType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
        }
    }
}
