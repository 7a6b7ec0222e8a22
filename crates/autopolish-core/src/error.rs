//! Error handling for autopolish
//!
//! Provides typed error enums for every layer of the system:
//! - Controller errors (protocol client, flow control, jogging)
//! - Connection errors (transport open/read/write)
//! - Macro errors (loading and streaming motion macros)
//! - Workflow errors (slot bookkeeping, recipe references, sensors)
//! - Configuration errors (recipes and settings files)
//!
//! All error types use `thiserror`. Callers branch on [`Error::is_timeout`],
//! [`Error::requires_operator`] and [`Error::is_configuration_error`] rather
//! than on message text.

use crate::data::BufferType;
use std::path::PathBuf;
use thiserror::Error;

/// Controller error type
///
/// Represents errors raised by the controller protocol client.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControllerError {
    /// Controller is not connected
    #[error("Controller not connected")]
    NotConnected,

    /// The line reader stopped while a caller was waiting on it
    #[error("Controller connection closed while waiting for {operation}")]
    Disconnected {
        /// What the caller was waiting for.
        operation: String,
    },

    /// A blocking wait ran out of time
    #[error("Timed out after {timeout_ms}ms waiting for {operation}")]
    Timeout {
        /// What the caller was waiting for.
        operation: String,
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// Jog distance outside the configured safe limits
    #[error("Jog {axis}{value} out of safe limits {min}..{max}")]
    OutOfRange {
        /// Axis letter.
        axis: char,
        /// Requested relative distance.
        value: f64,
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },

    /// Argument rejected before anything reached the wire
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// Why the argument was rejected.
        reason: String,
    },
}

/// Connection error type
///
/// Represents failures of the byte transport underneath the client.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    /// Failed to open port
    #[error("Failed to open {port}: {reason}")]
    FailedToOpen {
        /// Port name or address.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// Invalid connection parameters
    #[error("Invalid connection parameters: {reason}")]
    InvalidParameters {
        /// The reason the parameters are invalid.
        reason: String,
    },

    /// Read or write failure on an open transport
    #[error("I/O error on {port}: {reason}")]
    Io {
        /// Port name or address.
        port: String,
        /// The underlying failure.
        reason: String,
    },
}

/// Motion macro error type
#[derive(Error, Debug)]
pub enum MacroError {
    /// The macro names no file, or its file does not exist
    #[error("Macro '{name}' file not found{}", path_suffix(.path))]
    NotFound {
        /// Macro identifier.
        name: String,
        /// Resolved path, when the macro names one.
        path: Option<PathBuf>,
    },

    /// The macro file could not be read
    #[error("Failed to read macro '{name}': {source}")]
    Read {
        /// Macro identifier.
        name: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// Loading or streaming the macro failed
    #[error("Failed to execute macro '{name}': {source}")]
    Execution {
        /// Macro identifier.
        name: String,
        /// The failure that aborted execution.
        #[source]
        source: Box<Error>,
    },
}

fn path_suffix(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(": {}", p.display()))
        .unwrap_or_default()
}

/// Workflow error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    /// The position table has no entry for the slot
    #[error("Slot {slot} not defined for {buffer} buffer")]
    SlotNotDefined {
        /// Buffer the slot was looked up in.
        buffer: BufferType,
        /// Slot index.
        slot: u32,
    },

    /// Every output slot already holds a specimen
    #[error("No free output slot available")]
    NoFreeOutputSlot,

    /// The recipe references a macro id it does not define
    #[error("Recipe '{recipe}' missing {role} macro '{macro_id}'")]
    MissingMacro {
        /// Recipe name.
        recipe: String,
        /// "pickup" or "place".
        role: String,
        /// Referenced macro id.
        macro_id: String,
    },

    /// The current sensor could not be read
    #[error("Current sensor read failed: {reason}")]
    Sensor {
        /// The reason reported by the sensor.
        reason: String,
    },
}

/// Configuration error type
///
/// Recipe and settings files are validated once at load time.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// No recipe file with this name
    #[error("Recipe '{name}' not found in {}", .dir.display())]
    RecipeNotFound {
        /// Recipe name.
        name: String,
        /// Directory that was searched.
        dir: PathBuf,
    },

    /// The recipe file is unreadable, malformed or fails validation
    #[error("Invalid recipe '{name}': {reason}")]
    InvalidRecipe {
        /// Recipe name.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The settings file is unreadable, malformed or fails validation
    #[error("Invalid settings {}: {reason}", .path.display())]
    InvalidSettings {
        /// Settings file path.
        path: PathBuf,
        /// What is wrong with it.
        reason: String,
    },
}

/// Main error type for autopolish
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Controller error
    #[error(transparent)]
    Controller(#[from] ControllerError),

    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Macro error
    #[error(transparent)]
    Macro(#[from] MacroError),

    /// Workflow error
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Innermost error, looking through macro execution wrappers
    pub fn root(&self) -> &Error {
        match self {
            Error::Macro(MacroError::Execution { source, .. }) => source.root(),
            other => other,
        }
    }

    /// Check if this is a timeout ("retry later")
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.root(),
            Error::Controller(ControllerError::Timeout { .. })
        )
    }

    /// Check if an operator must intervene before processing can continue
    pub fn requires_operator(&self) -> bool {
        matches!(
            self.root(),
            Error::Workflow(WorkflowError::NoFreeOutputSlot)
                | Error::Workflow(WorkflowError::SlotNotDefined { .. })
                | Error::Controller(ControllerError::OutOfRange { .. })
        )
    }

    /// Check if this points at a recipe, macro or settings mistake
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self.root(),
            Error::Workflow(WorkflowError::MissingMacro { .. })
                | Error::Macro(MacroError::NotFound { .. })
                | Error::Config(_)
        )
    }

    /// Check if this is a transport or connection failure
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self.root(),
            Error::Connection(_)
                | Error::Controller(ControllerError::NotConnected)
                | Error::Controller(ControllerError::Disconnected { .. })
        )
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = ControllerError::Timeout {
            operation: "'ok'".to_string(),
            timeout_ms: 5000,
        };
        assert_eq!(err.to_string(), "Timed out after 5000ms waiting for 'ok'");
    }

    #[test]
    fn test_macro_not_found_display() {
        let err = MacroError::NotFound {
            name: "pickup".to_string(),
            path: Some(PathBuf::from("/recipes/motion/pickup.gcode")),
        };
        assert_eq!(
            err.to_string(),
            "Macro 'pickup' file not found: /recipes/motion/pickup.gcode"
        );

        let err = MacroError::NotFound {
            name: "pickup".to_string(),
            path: None,
        };
        assert_eq!(err.to_string(), "Macro 'pickup' file not found");
    }

    #[test]
    fn test_classification_looks_through_macro_wrapper() {
        let inner = Error::from(ControllerError::Timeout {
            operation: "pending acknowledgements".to_string(),
            timeout_ms: 100,
        });
        let wrapped = Error::from(MacroError::Execution {
            name: "place".to_string(),
            source: Box::new(inner),
        });
        assert!(wrapped.is_timeout());
        assert!(!wrapped.is_configuration_error());

        let missing = Error::from(MacroError::Execution {
            name: "place".to_string(),
            source: Box::new(Error::from(MacroError::NotFound {
                name: "place".to_string(),
                path: None,
            })),
        });
        assert!(missing.is_configuration_error());
    }

    #[test]
    fn test_operator_errors() {
        assert!(Error::from(WorkflowError::NoFreeOutputSlot).requires_operator());
        assert!(Error::from(WorkflowError::SlotNotDefined {
            buffer: BufferType::Input,
            slot: 3
        })
        .requires_operator());
        assert!(!Error::from(ControllerError::NotConnected).requires_operator());
        assert!(Error::from(ControllerError::NotConnected).is_connection_error());
    }
}
