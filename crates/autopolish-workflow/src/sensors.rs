//! Current sensing used for contact detection

use autopolish_core::{Result, WorkflowError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One current measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurrentReading {
    /// When the sample was taken
    pub timestamp: DateTime<Utc>,
    /// Measured current
    pub amperes: f64,
}

impl CurrentReading {
    /// Reading taken now
    pub fn now(amperes: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            amperes,
        }
    }

    /// Current in milliamperes
    pub fn milliamperes(&self) -> f64 {
        self.amperes * 1000.0
    }
}

/// Source of instantaneous current readings
pub trait CurrentSensor: Send + Sync {
    /// Take one reading
    fn read(&self) -> Result<CurrentReading>;
}

/// Sensor that always reads zero
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyCurrentSensor;

impl CurrentSensor for DummyCurrentSensor {
    fn read(&self) -> Result<CurrentReading> {
        Ok(CurrentReading::now(0.0))
    }
}

/// Sensor replaying a fixed sequence of readings
///
/// Once the sequence is exhausted the last value repeats. An empty sequence
/// fails every read.
#[derive(Debug, Default)]
pub struct SequenceCurrentSensor {
    remaining: Mutex<VecDeque<f64>>,
    last: Mutex<Option<f64>>,
}

impl SequenceCurrentSensor {
    /// Replay `amperes` in order
    pub fn new(amperes: impl IntoIterator<Item = f64>) -> Self {
        Self {
            remaining: Mutex::new(amperes.into_iter().collect()),
            last: Mutex::new(None),
        }
    }

    /// Report `amperes` after `steps` zero readings
    pub fn contact_after(steps: usize, amperes: f64) -> Self {
        Self::new(std::iter::repeat_n(0.0, steps).chain([amperes]))
    }
}

impl CurrentSensor for SequenceCurrentSensor {
    fn read(&self) -> Result<CurrentReading> {
        let mut last = self.last.lock();
        let value = match self.remaining.lock().pop_front() {
            Some(value) => value,
            None => (*last).ok_or_else(|| WorkflowError::Sensor {
                reason: "no readings configured".to_string(),
            })?,
        };
        *last = Some(value);
        Ok(CurrentReading::now(value))
    }
}
