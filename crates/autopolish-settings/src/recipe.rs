//! Polishing recipes
//!
//! A recipe is the per-specimen-type configuration consumed by the workflow:
//! which macros pick up and place the specimen, how to find electrical
//! contact, and how to oscillate while polishing. The file layout is
//!
//! ```yaml
//! metadata: { description: "..." }
//! motion: { safe_z_mm: 20.0, pickup_macro: pickup, place_macro: place }
//! motion_macros:
//!   pickup: { file: motion/pickup.gcode, description: "..." }
//!   place: motion/place.gcode
//! polishing:
//!   waveform: { amplitude_mm: 0.2, period_s: 1.0, center_z_mm: -0.5 }
//!   contact: { approach_speed_mm_s: 1.0, detection_current_ma: 5.0, max_depth_mm: 2.0 }
//!   cycle: { mode: cycles, max_cycles: 3 }
//! ```
//!
//! Recipes are parsed into these structs and validated once at load time.

use crate::format::ConfigFormat;
use autopolish_core::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A validated polishing recipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    /// Recipe name (file stem); not part of the file body
    #[serde(skip)]
    pub name: String,
    /// Free-form metadata
    #[serde(default)]
    pub metadata: RecipeMetadata,
    /// Safe height and macro references
    pub motion: MotionSection,
    /// Macro definitions by id
    #[serde(default)]
    pub motion_macros: BTreeMap<String, MotionMacro>,
    /// Contact detection and polishing parameters
    pub polishing: PolishingSection,
    /// Cleaning parameters, passed through to collaborators
    #[serde(default)]
    pub cleaning: BTreeMap<String, f64>,
    /// Imaging parameters, passed through to collaborators
    #[serde(default)]
    pub imaging: BTreeMap<String, f64>,
}

/// Recipe metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecipeMetadata {
    /// Human-readable description
    #[serde(default)]
    pub description: Option<String>,
}

/// `motion` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionSection {
    /// Absolute Z for traverses between stations
    pub safe_z_mm: f64,
    /// Macro id executed at the input slot
    pub pickup_macro: String,
    /// Macro id executed at the output slot
    pub place_macro: String,
}

/// A file-backed motion macro
///
/// In a recipe a macro is written either as a bare path or as a mapping
/// with `file` and `description`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "MacroEntry", into = "MacroEntry")]
pub struct MotionMacro {
    /// Macro id, filled from the `motion_macros` key
    pub name: String,
    /// G-code file, relative to the recipes directory unless absolute
    pub file: Option<PathBuf>,
    /// Human-readable description
    pub description: Option<String>,
}

impl MotionMacro {
    /// Macro backed by `file`
    pub fn new(name: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            file: Some(file.into()),
            description: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum MacroEntry {
    Path(PathBuf),
    Detailed {
        #[serde(default)]
        file: Option<PathBuf>,
        #[serde(default)]
        description: Option<String>,
    },
}

impl From<MacroEntry> for MotionMacro {
    fn from(entry: MacroEntry) -> Self {
        match entry {
            MacroEntry::Path(file) => Self {
                name: String::new(),
                file: Some(file),
                description: None,
            },
            MacroEntry::Detailed { file, description } => Self {
                name: String::new(),
                file,
                description,
            },
        }
    }
}

impl From<MotionMacro> for MacroEntry {
    fn from(m: MotionMacro) -> Self {
        match (m.file, m.description) {
            (Some(file), None) => MacroEntry::Path(file),
            (file, description) => MacroEntry::Detailed { file, description },
        }
    }
}

/// `polishing` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolishingSection {
    /// Oscillation shape
    pub waveform: WaveformConfig,
    /// Contact detection parameters
    pub contact: ContactConfig,
    /// How long to polish
    #[serde(default)]
    pub cycle: CycleConfig,
    /// Power supply voltage
    #[serde(default = "default_voltage")]
    pub voltage_v: f64,
    /// Power supply current limit
    #[serde(default = "default_current_limit")]
    pub current_limit_a: f64,
}

fn default_voltage() -> f64 {
    8.0
}

fn default_current_limit() -> f64 {
    0.6
}

/// Polishing oscillation about a Z center
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveformConfig {
    /// Relative offset of the oscillation center from the contact height
    pub center_z_mm: f64,
    /// Peak displacement from center
    pub amplitude_mm: f64,
    /// Duration of one full oscillation
    pub period_s: f64,
}

impl Default for WaveformConfig {
    fn default() -> Self {
        Self {
            center_z_mm: 0.0,
            amplitude_mm: 0.5,
            period_s: 2.0,
        }
    }
}

/// Contact detection descent parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactConfig {
    /// Descent speed
    pub approach_speed_mm_s: f64,
    /// Current at or above which contact is declared
    pub detection_current_ma: f64,
    /// Maximum cumulative descent
    pub max_depth_mm: f64,
    /// Descent per step; settings calibration takes precedence
    pub approach_step_mm: Option<f64>,
}

impl Default for ContactConfig {
    fn default() -> Self {
        Self {
            approach_speed_mm_s: 1.0,
            detection_current_ma: 5.0,
            max_depth_mm: 5.0,
            approach_step_mm: None,
        }
    }
}

/// What bounds a polishing run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleMode {
    /// Fixed duration
    #[default]
    Time,
    /// Fixed number of oscillation programs
    Cycles,
    /// Target integrated charge
    Charge,
}

impl std::fmt::Display for CycleMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Time => write!(f, "time"),
            Self::Cycles => write!(f, "cycles"),
            Self::Charge => write!(f, "charge"),
        }
    }
}

/// `polishing.cycle` section
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    /// Bounding mode
    pub mode: CycleMode,
    /// Duration for `time` mode
    pub duration_s: Option<f64>,
    /// Program count for `cycles` mode
    pub max_cycles: Option<u32>,
    /// Charge target for `charge` mode
    pub target_charge_c: Option<f64>,
}

impl Recipe {
    /// Parse and validate a recipe body
    pub fn parse(name: &str, content: &str, format: ConfigFormat) -> Result<Self> {
        let mut recipe: Recipe = format.parse(content).map_err(|reason| invalid(name, reason))?;
        recipe.name = name.to_string();
        for (id, entry) in recipe.motion_macros.iter_mut() {
            entry.name = id.clone();
        }
        recipe.validate()?;
        Ok(recipe)
    }

    /// Description, falling back to "Recipe <name>"
    pub fn description(&self) -> String {
        self.metadata
            .description
            .clone()
            .unwrap_or_else(|| format!("Recipe {}", self.name))
    }

    /// Safe traverse height
    pub fn safe_z_mm(&self) -> f64 {
        self.motion.safe_z_mm
    }

    /// Contact detection parameters
    pub fn contact(&self) -> &ContactConfig {
        &self.polishing.contact
    }

    /// Oscillation parameters
    pub fn waveform(&self) -> &WaveformConfig {
        &self.polishing.waveform
    }

    /// Cycle configuration
    pub fn cycle(&self) -> &CycleConfig {
        &self.polishing.cycle
    }

    /// Macro definition by id
    pub fn macro_by_id(&self, id: &str) -> Option<&MotionMacro> {
        self.motion_macros.get(id)
    }

    /// Check value ranges
    ///
    /// Macro references are not resolved here; a recipe naming an undefined
    /// macro loads and fails when the workflow reaches that macro.
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: String| -> Result<()> { Err(invalid(&self.name, reason)) };

        if !self.motion.safe_z_mm.is_finite() {
            return fail("motion.safe_z_mm must be finite".to_string());
        }
        if self.motion.pickup_macro.trim().is_empty() {
            return fail("motion.pickup_macro must not be empty".to_string());
        }
        if self.motion.place_macro.trim().is_empty() {
            return fail("motion.place_macro must not be empty".to_string());
        }

        let contact = &self.polishing.contact;
        if !positive(contact.approach_speed_mm_s) {
            return fail("polishing.contact.approach_speed_mm_s must be > 0".to_string());
        }
        if !positive(contact.max_depth_mm) {
            return fail("polishing.contact.max_depth_mm must be > 0".to_string());
        }
        if !contact.detection_current_ma.is_finite() || contact.detection_current_ma < 0.0 {
            return fail("polishing.contact.detection_current_ma must be >= 0".to_string());
        }
        if let Some(step) = contact.approach_step_mm {
            if !positive(step) {
                return fail("polishing.contact.approach_step_mm must be > 0".to_string());
            }
        }

        let waveform = &self.polishing.waveform;
        if !positive(waveform.period_s) {
            return fail("polishing.waveform.period_s must be > 0".to_string());
        }
        if !waveform.amplitude_mm.is_finite() || waveform.amplitude_mm < 0.0 {
            return fail("polishing.waveform.amplitude_mm must be >= 0".to_string());
        }
        if !waveform.center_z_mm.is_finite() {
            return fail("polishing.waveform.center_z_mm must be finite".to_string());
        }

        let cycle = &self.polishing.cycle;
        if cycle.max_cycles == Some(0) {
            return fail("polishing.cycle.max_cycles must be >= 1".to_string());
        }
        if let Some(duration) = cycle.duration_s {
            if !positive(duration) {
                return fail("polishing.cycle.duration_s must be > 0".to_string());
            }
        }

        if !positive(self.polishing.voltage_v) {
            return fail("polishing.voltage_v must be > 0".to_string());
        }
        if !positive(self.polishing.current_limit_a) {
            return fail("polishing.current_limit_a must be > 0".to_string());
        }
        Ok(())
    }
}

fn positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

fn invalid(name: &str, reason: impl Into<String>) -> autopolish_core::Error {
    ConfigError::InvalidRecipe {
        name: name.to_string(),
        reason: reason.into(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopolish_core::Error;

    const BASIC: &str = r#"
metadata:
  description: Standard tip
motion:
  safe_z_mm: 20
  pickup_macro: pickup_standard
  place_macro: place_standard
motion_macros:
  pickup_standard:
    file: motion/pickup_standard.gcode
    description: Lift from input buffer
  place_standard: motion/place_standard.gcode
polishing:
  waveform: { amplitude_mm: 0.2, period_s: 1.0, center_z_mm: -0.5 }
  contact: { approach_speed_mm_s: 1.0, detection_current_ma: 1.0, max_depth_mm: 1.0 }
  cycle: { mode: cycles, max_cycles: 1 }
cleaning:
  rinse_s: 5
"#;

    #[test]
    fn test_parse_basic_recipe() {
        let recipe = Recipe::parse("basic", BASIC, ConfigFormat::Yaml).unwrap();

        assert_eq!(recipe.name, "basic");
        assert_eq!(recipe.description(), "Standard tip");
        assert_eq!(recipe.safe_z_mm(), 20.0);
        assert_eq!(recipe.cycle().mode, CycleMode::Cycles);
        assert_eq!(recipe.cycle().max_cycles, Some(1));
        assert_eq!(recipe.polishing.voltage_v, 8.0);
        assert_eq!(recipe.polishing.current_limit_a, 0.6);
        assert_eq!(recipe.cleaning["rinse_s"], 5.0);

        let pickup = recipe.macro_by_id("pickup_standard").unwrap();
        assert_eq!(pickup.name, "pickup_standard");
        assert_eq!(
            pickup.file.as_deref(),
            Some(std::path::Path::new("motion/pickup_standard.gcode"))
        );
        assert_eq!(pickup.description.as_deref(), Some("Lift from input buffer"));

        let place = recipe.macro_by_id("place_standard").unwrap();
        assert_eq!(place.name, "place_standard");
        assert!(place.description.is_none());
    }

    #[test]
    fn test_defaults_fill_missing_values() {
        let content = r#"
motion: { safe_z_mm: 10, pickup_macro: a, place_macro: b }
polishing:
  waveform: {}
  contact: {}
"#;
        let recipe = Recipe::parse("minimal", content, ConfigFormat::Yaml).unwrap();
        assert_eq!(recipe.description(), "Recipe minimal");
        assert_eq!(recipe.cycle().mode, CycleMode::Time);
        assert_eq!(recipe.contact().max_depth_mm, 5.0);
        assert_eq!(recipe.contact().detection_current_ma, 5.0);
        assert_eq!(recipe.waveform().period_s, 2.0);
        assert!(recipe.motion_macros.is_empty());
    }

    #[test]
    fn test_missing_required_section() {
        let content = "motion: { safe_z_mm: 10, pickup_macro: a, place_macro: b }\n";
        let err = Recipe::parse("broken", content, ConfigFormat::Yaml).unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::InvalidRecipe { ref name, .. }) if name == "broken"
        ));
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_unknown_cycle_mode_rejected() {
        let content = BASIC.replace("mode: cycles", "mode: forever");
        assert!(Recipe::parse("basic", &content, ConfigFormat::Yaml).is_err());
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        for (from, to) in [
            ("period_s: 1.0", "period_s: 0"),
            ("max_depth_mm: 1.0", "max_depth_mm: -1"),
            ("approach_speed_mm_s: 1.0", "approach_speed_mm_s: 0"),
            ("max_cycles: 1", "max_cycles: 0"),
        ] {
            let content = BASIC.replace(from, to);
            let err = Recipe::parse("basic", &content, ConfigFormat::Yaml).unwrap_err();
            assert!(err.is_configuration_error(), "{} accepted", to);
        }
    }

    #[test]
    fn test_undefined_macro_reference_loads() {
        let content = BASIC.replace("pickup_macro: pickup_standard", "pickup_macro: nope");
        let recipe = Recipe::parse("basic", &content, ConfigFormat::Yaml).unwrap();
        assert!(recipe.macro_by_id("nope").is_none());
    }
}
