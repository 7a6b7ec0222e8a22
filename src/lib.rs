//! # Autopolish
//!
//! Automated specimen electropolishing driven through a GRBL/FluidNC motion
//! controller.
//!
//! ## Architecture
//!
//! Autopolish is organized as a workspace with multiple crates:
//!
//! 1. **autopolish-core** - Machine status model, controller trait, events, errors
//! 2. **autopolish-communication** - Serial, TCP and simulated transports plus the
//!    FluidNC protocol client
//! 3. **autopolish-settings** - Recipes and station settings
//! 4. **autopolish-workflow** - Macro runner, polishing programs and the
//!    specimen sequencing engine
//! 5. **autopolish** - Command-line binary that integrates all crates

pub use autopolish_communication::{
    list_ports, open_transport, ClientConfig, ConnectionDriver, ConnectionParams,
    ControllerClient, SimulatedTransport, Transport,
};
pub use autopolish_core::{
    BufferType, ClientEvent, ConfigError, ConnectionError, ControllerError, Error, MacroError,
    MachineState, MachineStatus, MotionController, Result, WorkflowError,
};
pub use autopolish_settings::{Recipe, RecipeDirectory, RecipeLoader, Settings};
pub use autopolish_workflow::{
    PolishingWorkflow, SineProgram, SpecimenBuffers, SpecimenReport, WorkflowConfig,
};

use std::path::Path;
use std::sync::Arc;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging
///
/// Sets up structured logging with:
/// - Output on stderr, leaving stdout for command results
/// - RUST_LOG environment variable support, INFO by default
/// - Human-readable or JSON lines
pub fn init_logging(json: bool) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        let fmt_layer = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_current_span(true);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .with_thread_names(true);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

/// Station settings from `path`, or the defaults without one
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => Settings::load_from_file(path),
        None => Ok(Settings::default()),
    }
}

/// Open the transport described by `params` and connect a client over it
pub async fn connect_controller(
    params: &ConnectionParams,
    config: ClientConfig,
) -> Result<Arc<ControllerClient>> {
    let transport = open_transport(params)?;
    let client = Arc::new(ControllerClient::new(transport, config));
    client.connect().await?;
    tracing::info!("Connected to {}", client.name());
    Ok(client)
}
