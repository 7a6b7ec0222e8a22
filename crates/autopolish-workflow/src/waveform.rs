//! Polishing motion programs
//!
//! Two generators:
//! - [`polishing_waveform`]: the short relative oscillation streamed once per
//!   polishing cycle. It always returns the tool to where it started.
//! - [`SineProgram`]: a sampled sinusoidal Z program for offline use, saved
//!   with [`save_ngc`].

use autopolish_core::{ControllerError, Result};
use autopolish_settings::WaveformConfig;
use std::f64::consts::PI;
use std::io;
use std::path::{Path, PathBuf};

const MIN_FEED_MM_MIN: f64 = 1.0;

/// One oscillation about the waveform center, in relative mode.
///
/// Moves to the center offset, up by the amplitude, down through the center
/// to minus the amplitude, back to the center and finally back by the center
/// offset. The feed makes the oscillation itself last one period. The net
/// displacement is zero.
pub fn polishing_waveform(waveform: &WaveformConfig) -> Vec<String> {
    let amplitude = waveform.amplitude_mm.abs();
    let center = waveform.center_z_mm;
    let feed = (4.0 * amplitude / waveform.period_s * 60.0).max(MIN_FEED_MM_MIN);

    let mut moves = Vec::with_capacity(5);
    if center != 0.0 {
        moves.push(center);
    }
    if amplitude > 0.0 {
        moves.extend([amplitude, -2.0 * amplitude, amplitude]);
    }
    if center != 0.0 {
        moves.push(-center);
    }

    let mut lines = Vec::with_capacity(moves.len() + 2);
    lines.push("G91".to_string());
    lines.extend(
        moves
            .into_iter()
            .map(|dz| format!("G1 Z{} F{:.1}", coord(dz, 3), feed)),
    );
    lines.push("G90".to_string());
    lines
}

/// How segment timing is expressed
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeedMode {
    /// G93: every segment lasts exactly one sample period
    InverseTime,
    /// G94: feed derived from each segment's length, capped
    UnitsPerMinute {
        /// Upper bound on any emitted feed
        max_feed_mm_min: f64,
    },
}

/// Sampled sine motion on Z
///
/// `Z(t) = center + amplitude * sin(2 * PI * t / period + phase)`
#[derive(Debug, Clone, PartialEq)]
pub struct SineProgram {
    /// Absolute Z of the oscillation center
    pub center_z: f64,
    /// Peak displacement from center
    pub amplitude: f64,
    /// Period in seconds
    pub period_s: f64,
    /// Total run time; ignored when `cycles` is set
    pub duration_s: Option<f64>,
    /// Number of periods to run
    pub cycles: Option<u32>,
    /// Segments per second
    pub sample_hz: f64,
    /// Starting phase in degrees
    pub start_phase_deg: f64,
    /// Feed mode
    pub feed_mode: FeedMode,
    /// Lower Z clamp
    pub z_min: Option<f64>,
    /// Upper Z clamp
    pub z_max: Option<f64>,
    /// Decimal places for coordinates
    pub precision: usize,
}

impl Default for SineProgram {
    fn default() -> Self {
        Self {
            center_z: 0.0,
            amplitude: 0.5,
            period_s: 2.0,
            duration_s: None,
            cycles: Some(1),
            sample_hz: 50.0,
            start_phase_deg: 0.0,
            feed_mode: FeedMode::InverseTime,
            z_min: None,
            z_max: None,
            precision: 4,
        }
    }
}

impl SineProgram {
    fn total_time(&self) -> Result<f64> {
        let total = match (self.cycles, self.duration_s) {
            (Some(cycles), _) => f64::from(cycles) * self.period_s,
            (None, Some(duration)) => duration,
            (None, None) => return invalid("either cycles or duration_s is required"),
        };
        if !(total.is_finite() && total > 0.0) {
            return invalid("program length must be > 0");
        }
        Ok(total)
    }

    fn validate(&self) -> Result<()> {
        if !(self.period_s.is_finite() && self.period_s > 0.0) {
            return invalid("period_s must be > 0");
        }
        if !(self.sample_hz.is_finite() && self.sample_hz > 0.0) {
            return invalid("sample_hz must be > 0");
        }
        if let (Some(lo), Some(hi)) = (self.z_min, self.z_max) {
            if lo > hi {
                return invalid("z_min must not exceed z_max");
            }
        }
        if let FeedMode::UnitsPerMinute { max_feed_mm_min } = self.feed_mode {
            if max_feed_mm_min.is_nan() || max_feed_mm_min < MIN_FEED_MM_MIN {
                return invalid("max_feed_mm_min must be >= 1");
            }
        }
        Ok(())
    }

    fn clamp(&self, z: f64) -> f64 {
        let z = self.z_min.map_or(z, |lo| z.max(lo));
        self.z_max.map_or(z, |hi| z.min(hi))
    }

    fn z_at(&self, t: f64) -> f64 {
        let phase = self.start_phase_deg.to_radians();
        self.clamp(self.center_z + self.amplitude * (2.0 * PI * t / self.period_s + phase).sin())
    }

    /// Render the program as G-code text
    pub fn generate(&self) -> Result<String> {
        self.validate()?;
        let total = self.total_time()?;
        let dt = 1.0 / self.sample_hz;
        let steps = ((total / dt).round() as u64).max(1);
        let precision = self.precision;

        let mode = match self.feed_mode {
            FeedMode::InverseTime => "G93",
            FeedMode::UnitsPerMinute { .. } => "G94",
        };
        let mut lines = vec![
            format!(
                "(SINE Z center={} amp={} T={}s rate={}Hz mode={})",
                self.center_z, self.amplitude, self.period_s, self.sample_hz, mode
            ),
            "G21 (mm units)".to_string(),
            "G90 (absolute positioning)".to_string(),
        ];

        let mut z_prev = self.z_at(0.0);
        match self.feed_mode {
            FeedMode::InverseTime => {
                lines.push("G93 (inverse time feed rate)".to_string());
                lines.push(format!("G1 Z{}", coord(z_prev, precision)));
                let inverse_feed = 60.0 / dt;
                for step in 1..=steps {
                    let z = self.z_at(step as f64 * dt);
                    lines.push(format!("G1 Z{} F{:.2}", coord(z, precision), inverse_feed));
                }
                lines.push("G94 (back to units/min)".to_string());
            }
            FeedMode::UnitsPerMinute { max_feed_mm_min } => {
                lines.push("G94 (units/min feed)".to_string());
                let peak_speed = self.amplitude.abs() * 2.0 * PI / self.period_s;
                let base_feed = (peak_speed * 60.0).clamp(MIN_FEED_MM_MIN, max_feed_mm_min);
                lines.push(format!("G1 Z{} F{:.2}", coord(z_prev, precision), base_feed));
                for step in 1..=steps {
                    let z = self.z_at(step as f64 * dt);
                    let dz = (z - z_prev).abs();
                    let feed = if dz < 1e-6 {
                        base_feed
                    } else {
                        (dz / dt * 60.0).clamp(MIN_FEED_MM_MIN, max_feed_mm_min)
                    };
                    lines.push(format!("G1 Z{} F{:.2}", coord(z, precision), feed));
                    z_prev = z;
                }
            }
        }

        Ok(lines.join("\n"))
    }
}

/// Write a program to a `.ngc` file and return its path.
///
/// Without a path the file goes to `gcode/program_<timestamp>.ngc`. Any
/// other extension is replaced by `.ngc`. Newlines are normalized to LF and,
/// with `add_eof`, `M2` is appended unless the program already ends with
/// `M2`, `M30` or `%`. An existing file is only replaced with `overwrite`;
/// the write goes through a temporary file and a rename.
pub fn save_ngc(
    gcode: &str,
    path: Option<&Path>,
    overwrite: bool,
    add_eof: bool,
) -> Result<PathBuf> {
    let path = match path {
        Some(path) => {
            let is_ngc = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("ngc"));
            if is_ngc {
                path.to_path_buf()
            } else {
                path.with_extension("ngc")
            }
        }
        None => {
            let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
            PathBuf::from("gcode").join(format!("program_{}.ngc", stamp))
        }
    };

    let mut text = gcode.replace("\r\n", "\n").replace('\r', "\n");
    text.truncate(text.trim_end().len());
    if add_eof {
        let last = text
            .lines()
            .last()
            .map(|line| line.trim().to_ascii_uppercase())
            .unwrap_or_default();
        if !matches!(last.as_str(), "M2" | "M30" | "%") {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str("M2");
        }
    }
    text.push('\n');

    if path.exists() && !overwrite {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", path.display()),
        )
        .into());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut tmp = path.clone().into_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, text)?;
    std::fs::rename(&tmp, &path)?;

    tracing::info!("Saved program to {}", path.display());
    Ok(path)
}

fn coord(value: f64, precision: usize) -> String {
    let text = format!("{:.*}", precision, value);
    if text.starts_with('-') && text[1..].chars().all(|c| c == '0' || c == '.') {
        text[1..].to_string()
    } else {
        text
    }
}

fn invalid<T>(reason: &str) -> Result<T> {
    Err(ControllerError::InvalidArgument {
        reason: reason.to_string(),
    }
    .into())
}
