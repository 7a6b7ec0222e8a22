//! Machine settings
//!
//! One settings file describes a polishing station:
//! - `connection`: how to reach the controller (serial, TCP or simulator)
//! - `client`: protocol client timing
//! - `positions`: global safe height
//! - `buffers`: physical coordinates of every input and output slot
//! - `calibration`: contact detection step and retract
//! - `workflow`: defaults for the sequencing engine
//!
//! Files are YAML, TOML or JSON, chosen by extension. Every section is
//! optional and falls back to its defaults.

use crate::format::ConfigFormat;
use autopolish_communication::{ClientConfig, ConnectionParams};
use autopolish_core::{BufferType, ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Protocol client timing, in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Line reader poll interval
    pub read_timeout_ms: u64,
    /// Query status on connect and wait for the first frame
    pub wait_for_banner: bool,
    /// How long to wait for that frame
    pub banner_timeout_ms: u64,
    /// Fail the connection if no frame arrives
    pub require_banner: bool,
    /// Acknowledgement timeout for short commands
    pub ack_timeout_ms: u64,
    /// Acknowledgement timeout for homing
    pub homing_timeout_ms: u64,
    /// Pause after a soft reset
    pub reset_settle_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            read_timeout_ms: 50,
            wait_for_banner: true,
            banner_timeout_ms: 2000,
            require_banner: false,
            ack_timeout_ms: 5000,
            homing_timeout_ms: 60_000,
            reset_settle_ms: 200,
        }
    }
}

impl ClientSettings {
    /// Runtime client configuration
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            wait_for_banner: self.wait_for_banner,
            banner_timeout: Duration::from_millis(self.banner_timeout_ms),
            require_banner: self.require_banner,
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
            homing_timeout: Duration::from_millis(self.homing_timeout_ms),
            reset_settle: Duration::from_millis(self.reset_settle_ms),
            ..Default::default()
        }
    }
}

/// Global positions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionSettings {
    /// Safe traverse height; overrides the recipe's when set
    pub safe_z_mm: Option<f64>,
}

/// One buffer slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotEntry {
    /// Slot index as used in job requests
    pub slot: u32,
    /// Machine coordinates `[x, y, z]`
    pub position: [f64; 3],
    /// Specimen currently held, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specimen: Option<String>,
}

/// Input and output buffer layouts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferSettings {
    /// Slots specimens are picked up from
    pub input_slots: Vec<SlotEntry>,
    /// Slots finished specimens are stored in
    pub output_slots: Vec<SlotEntry>,
}

impl BufferSettings {
    /// Slot entries of one buffer, in file order
    pub fn slots(&self, buffer: BufferType) -> &[SlotEntry] {
        match buffer {
            BufferType::Input => &self.input_slots,
            BufferType::Output => &self.output_slots,
        }
    }
}

/// Contact detection calibration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactCalibration {
    /// Descent per step; overrides the recipe's when set
    pub approach_step_mm: Option<f64>,
    /// Lift after the descent loop ends
    pub retract_mm: Option<f64>,
}

/// Calibration data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    /// Contact detection calibration
    pub contact: ContactCalibration,
}

/// Sequencing engine defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    /// Recipe used when a job names none
    pub default_recipe: String,
    /// Directory holding recipe files and the macros they reference
    pub recipes_dir: PathBuf,
    /// Feed for the controlled move to safe Z
    pub safe_z_feed_mm_min: f64,
    /// Status polling rate while waiting for idle
    pub idle_poll_hz: f64,
    /// Bound on each wait for idle
    pub idle_timeout_s: f64,
    /// Streaming window for macros and polishing programs
    pub stream_window: usize,
    /// Per-line acknowledgement timeout while streaming
    pub line_timeout_s: f64,
    /// Descent step when neither calibration nor recipe sets one
    pub default_approach_step_mm: f64,
    /// Retract when calibration sets none
    pub default_retract_mm: f64,
    /// Polishing programs per specimen when the recipe sets no count
    pub default_polish_cycles: u32,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            default_recipe: "default".to_string(),
            recipes_dir: PathBuf::from("recipes"),
            safe_z_feed_mm_min: 600.0,
            idle_poll_hz: 5.0,
            idle_timeout_s: 60.0,
            stream_window: 12,
            line_timeout_s: 5.0,
            default_approach_step_mm: 0.1,
            default_retract_mm: 2.0,
            default_polish_cycles: 5,
        }
    }
}

/// Station settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Controller connection
    pub connection: ConnectionParams,
    /// Protocol client timing
    pub client: ClientSettings,
    /// Global positions
    pub positions: PositionSettings,
    /// Buffer slot layouts
    pub buffers: BufferSettings,
    /// Calibration data
    pub calibration: CalibrationSettings,
    /// Sequencing engine defaults
    pub workflow: WorkflowSettings,
}

impl Settings {
    /// Load settings from file (YAML, TOML or JSON)
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let format = ConfigFormat::from_path(path)
            .ok_or_else(|| invalid(path, "Settings file must be .yml, .yaml, .toml or .json"))?;
        let content = std::fs::read_to_string(path)
            .map_err(|e| invalid(path, format!("Failed to read settings file: {}", e)))?;

        let mut settings: Self = format.parse(&content).map_err(|e| invalid(path, e))?;
        settings.validate_at(path)?;

        if settings.workflow.recipes_dir.is_relative() {
            if let Some(parent) = path.parent() {
                settings.workflow.recipes_dir = parent.join(&settings.workflow.recipes_dir);
            }
        }
        tracing::info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Save settings to file (YAML, TOML or JSON)
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        self.validate_at(path)?;
        let format = ConfigFormat::from_path(path)
            .ok_or_else(|| invalid(path, "Settings file must be .yml, .yaml, .toml or .json"))?;
        let content = format
            .render(self)
            .map_err(|e| invalid(path, format!("Failed to serialize settings: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate settings
    pub fn validate(&self) -> Result<()> {
        self.validate_at(Path::new("<settings>"))
    }

    fn validate_at(&self, path: &Path) -> Result<()> {
        let fail = |reason: String| -> Result<()> { Err(invalid(path, reason)) };

        for buffer in [BufferType::Input, BufferType::Output] {
            let mut seen = HashSet::new();
            for entry in self.buffers.slots(buffer) {
                if !seen.insert(entry.slot) {
                    return fail(format!("duplicate {} slot {}", buffer, entry.slot));
                }
                if entry.position.iter().any(|v| !v.is_finite()) {
                    return fail(format!("{} slot {} position must be finite", buffer, entry.slot));
                }
            }
        }

        if let Some(z) = self.positions.safe_z_mm {
            if !z.is_finite() {
                return fail("positions.safe_z_mm must be finite".to_string());
            }
        }
        let contact = &self.calibration.contact;
        if contact.approach_step_mm.is_some_and(|v| !positive(v)) {
            return fail("calibration.contact.approach_step_mm must be > 0".to_string());
        }
        if contact.retract_mm.is_some_and(|v| !v.is_finite() || v < 0.0) {
            return fail("calibration.contact.retract_mm must be >= 0".to_string());
        }

        let wf = &self.workflow;
        if wf.default_recipe.trim().is_empty() {
            return fail("workflow.default_recipe must not be empty".to_string());
        }
        for (key, value) in [
            ("safe_z_feed_mm_min", wf.safe_z_feed_mm_min),
            ("idle_poll_hz", wf.idle_poll_hz),
            ("idle_timeout_s", wf.idle_timeout_s),
            ("line_timeout_s", wf.line_timeout_s),
            ("default_approach_step_mm", wf.default_approach_step_mm),
        ] {
            if !positive(value) {
                return fail(format!("workflow.{} must be > 0", key));
            }
        }
        if wf.stream_window == 0 {
            return fail("workflow.stream_window must be >= 1".to_string());
        }
        if !wf.default_retract_mm.is_finite() || wf.default_retract_mm < 0.0 {
            return fail("workflow.default_retract_mm must be >= 0".to_string());
        }

        if self.client.read_timeout_ms == 0 || self.client.ack_timeout_ms == 0 {
            return fail("client timeouts must be > 0".to_string());
        }
        Ok(())
    }

    /// Position of a slot, if the buffer defines it
    pub fn slot_position(&self, buffer: BufferType, slot: u32) -> Option<[f64; 3]> {
        self.buffers
            .slots(buffer)
            .iter()
            .find(|entry| entry.slot == slot)
            .map(|entry| entry.position)
    }
}

fn positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

fn invalid(path: &Path, reason: impl Into<String>) -> autopolish_core::Error {
    ConfigError::InvalidSettings {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.workflow.stream_window, 12);
        assert_eq!(settings.connection.baud_rate, 115_200);
    }

    #[test]
    fn test_duplicate_slot_rejected() {
        let mut settings = Settings::default();
        let entry = SlotEntry {
            slot: 1,
            position: [0.0, 0.0, 0.0],
            specimen: None,
        };
        settings.buffers.output_slots = vec![entry.clone(), entry];
        let err = settings.validate().unwrap_err();
        assert!(err.is_configuration_error());
        assert!(err.to_string().contains("duplicate output slot 1"));
    }

    #[test]
    fn test_client_config_conversion() {
        let client = ClientSettings {
            ack_timeout_ms: 1500,
            require_banner: true,
            ..Default::default()
        };
        let config = client.to_client_config();
        assert_eq!(config.ack_timeout, Duration::from_millis(1500));
        assert!(config.require_banner);
        assert_eq!(config.event_capacity, ClientConfig::default().event_capacity);
    }
}
