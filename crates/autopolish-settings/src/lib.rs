//! # Autopolish Settings
//!
//! Declarative configuration for autopolish:
//! - Recipes: per-specimen-type motion, contact and polishing parameters
//! - Recipe loading from a directory of YAML, TOML or JSON files
//! - Machine settings: connection, client timing, buffer slot positions,
//!   calibration and workflow defaults
//!
//! Everything is parsed into typed structs and validated once at load time.

pub mod config;
pub mod format;
pub mod loader;
pub mod recipe;

pub use config::{
    BufferSettings, CalibrationSettings, ClientSettings, ContactCalibration, PositionSettings,
    Settings, SlotEntry, WorkflowSettings,
};
pub use format::ConfigFormat;
pub use loader::{RecipeDirectory, RecipeLoader};
pub use recipe::{
    ContactConfig, CycleConfig, CycleMode, MotionMacro, MotionSection, PolishingSection, Recipe,
    RecipeMetadata, WaveformConfig,
};
