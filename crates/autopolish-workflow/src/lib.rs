//! # Autopolish Workflow
//!
//! Walks each queued specimen through the fixed polishing procedure:
//! safe Z, pickup, safe Z, contact detection, polishing, inspection and
//! storage. Motion goes through a [`MotionController`]; macros are streamed
//! by the [`MacroRunner`]; contact is found with a [`CurrentSensor`].
//!
//! [`MotionController`]: autopolish_core::MotionController

pub mod buffers;
pub mod engine;
pub mod macros;
pub mod sensors;
pub mod vision;
pub mod waveform;

pub use buffers::SpecimenBuffers;
pub use engine::{ContactResult, Job, PolishingWorkflow, SpecimenReport, Stage, WorkflowConfig};
pub use macros::MacroRunner;
pub use sensors::{CurrentReading, CurrentSensor, DummyCurrentSensor, SequenceCurrentSensor};
pub use vision::{LoggingVision, VisionSystem};
pub use waveform::{polishing_waveform, save_ngc, FeedMode, SineProgram};
