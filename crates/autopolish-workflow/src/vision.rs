//! Inspection imaging

use autopolish_core::Result;
use parking_lot::Mutex;

/// Camera used during inspection. Capture only; analysis happens elsewhere.
pub trait VisionSystem: Send + Sync {
    /// Capture one frame, tagged with `label`
    fn capture_snapshot(&self, label: Option<&str>) -> Result<()>;
}

/// Vision stand-in that records and logs capture requests
#[derive(Debug, Default)]
pub struct LoggingVision {
    captures: Mutex<Vec<String>>,
}

impl LoggingVision {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Labels captured so far
    pub fn captures(&self) -> Vec<String> {
        self.captures.lock().clone()
    }
}

impl VisionSystem for LoggingVision {
    fn capture_snapshot(&self, label: Option<&str>) -> Result<()> {
        let label = label.unwrap_or("snapshot").to_string();
        tracing::info!("Snapshot requested: {}", label);
        self.captures.lock().push(label);
        Ok(())
    }
}
