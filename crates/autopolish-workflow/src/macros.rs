//! Motion macro execution
//!
//! A macro is a plain text G-code file, one command per line. Blank lines
//! and lines starting with `(` are skipped. The whole file is read before
//! anything is sent, so a missing or unreadable file never leaves a
//! partially streamed macro behind.

use autopolish_core::{Error, MacroError, MotionController, Result};
use autopolish_settings::MotionMacro;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Streaming window used for macros
pub const DEFAULT_MACRO_WINDOW: usize = 12;

/// Loads macro files and streams them to a controller
#[derive(Debug, Clone)]
pub struct MacroRunner {
    base_dir: PathBuf,
    window: usize,
    line_timeout: Duration,
    idle_poll_hz: f64,
    idle_timeout: Duration,
}

impl MacroRunner {
    /// Runner resolving relative macro paths against `base_dir`
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            window: DEFAULT_MACRO_WINDOW,
            line_timeout: Duration::from_secs(5),
            idle_poll_hz: 5.0,
            idle_timeout: Duration::from_secs(60),
        }
    }

    /// Override the streaming window
    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(1);
        self
    }

    /// Override the per-line acknowledgement timeout and the idle wait
    pub fn with_timeouts(
        mut self,
        line_timeout: Duration,
        idle_poll_hz: f64,
        idle_timeout: Duration,
    ) -> Self {
        self.line_timeout = line_timeout;
        self.idle_poll_hz = idle_poll_hz;
        self.idle_timeout = idle_timeout;
        self
    }

    /// Directory relative macro paths are resolved against
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Path of the macro file, which must exist
    pub fn resolve(&self, motion_macro: &MotionMacro) -> Result<PathBuf> {
        let file = motion_macro
            .file
            .as_ref()
            .ok_or_else(|| MacroError::NotFound {
                name: motion_macro.name.clone(),
                path: None,
            })?;
        let path = self.base_dir.join(file);
        if !path.is_file() {
            return Err(MacroError::NotFound {
                name: motion_macro.name.clone(),
                path: Some(path),
            }
            .into());
        }
        Ok(path)
    }

    /// Command lines of the macro, comments and blanks removed
    pub fn load_lines(&self, motion_macro: &MotionMacro) -> Result<Vec<String>> {
        let path = self.resolve(motion_macro)?;
        let content = std::fs::read_to_string(&path).map_err(|source| MacroError::Read {
            name: motion_macro.name.clone(),
            source,
        })?;

        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('('))
            .map(str::to_string)
            .collect())
    }

    /// Stream the macro and optionally wait for the machine to go idle.
    ///
    /// Every failure comes back as [`MacroError::Execution`] carrying the
    /// macro name; [`Error::root`] gives the underlying cause.
    pub async fn execute(
        &self,
        controller: &dyn MotionController,
        motion_macro: &MotionMacro,
        wait_idle: bool,
    ) -> Result<()> {
        self.run(controller, motion_macro, wait_idle)
            .await
            .map_err(|source| {
                Error::from(MacroError::Execution {
                    name: motion_macro.name.clone(),
                    source: Box::new(source),
                })
            })
    }

    async fn run(
        &self,
        controller: &dyn MotionController,
        motion_macro: &MotionMacro,
        wait_idle: bool,
    ) -> Result<()> {
        let lines = self.load_lines(motion_macro)?;
        if lines.is_empty() {
            tracing::debug!("Macro '{}' is empty", motion_macro.name);
            return Ok(());
        }

        tracing::info!(
            "Executing macro '{}' ({} lines)",
            motion_macro.name,
            lines.len()
        );
        controller
            .stream_commands(&lines, self.window, self.line_timeout)
            .await?;
        if wait_idle {
            controller
                .wait_until_idle(self.idle_poll_hz, self.idle_timeout)
                .await;
        }
        Ok(())
    }
}
