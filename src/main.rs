//! Command-line entry point for autopolish
//!
//! ```bash
//! autopolish --settings config/settings.yml run --slot 1 --slot 2
//! autopolish --simulate status
//! autopolish --recipes-dir recipes recipes
//! autopolish sine --center -1.0 --amplitude 0.2 --period 2 --cycles 5 -o sine.ngc
//! ```

use anyhow::{Context, Result};
use autopolish::{
    connect_controller, init_logging, list_ports, load_settings, ConnectionParams,
    PolishingWorkflow, RecipeDirectory, RecipeLoader, Settings, SineProgram, SpecimenBuffers,
    WorkflowConfig, BUILD_DATE, VERSION,
};
use autopolish_workflow::{
    save_ngc, CurrentSensor, DummyCurrentSensor, FeedMode, LoggingVision, SequenceCurrentSensor,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "autopolish")]
#[command(about = "Automated specimen electropolishing", long_about = None)]
#[command(version)]
struct Cli {
    /// Station settings file (YAML, TOML or JSON)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Serial port of the controller
    #[arg(long, global = true)]
    port: Option<String>,

    /// Serial baud rate
    #[arg(long, global = true)]
    baud: Option<u32>,

    /// Controller telnet address, HOST or HOST:PORT
    #[arg(long, global = true, conflicts_with = "port")]
    tcp: Option<String>,

    /// Use the built-in simulated controller
    #[arg(long, global = true, conflicts_with_all = ["port", "tcp"])]
    simulate: bool,

    /// Directory holding recipes and their macros
    #[arg(long, global = true)]
    recipes_dir: Option<PathBuf>,

    /// Emit logs and reports as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process the specimens in the given input slots
    Run {
        /// Input slot to process; repeat for more specimens
        #[arg(long = "slot", required = true)]
        slots: Vec<u32>,

        /// Recipe name; the configured default when omitted
        #[arg(long)]
        recipe: Option<String>,

        /// Simulated sensor: report contact after this many descent steps
        #[arg(long, requires = "simulate")]
        contact_after: Option<usize>,
    },

    /// Print the controller status and parser state
    Status,

    /// List available recipes
    Recipes,

    /// List serial ports that look like CNC controllers
    Ports,

    /// Generate a sinusoidal Z program and save it as .ngc
    Sine {
        /// Absolute Z of the oscillation center
        #[arg(long, allow_hyphen_values = true)]
        center: f64,

        /// Peak displacement from center
        #[arg(long)]
        amplitude: f64,

        /// Period in seconds
        #[arg(long)]
        period: f64,

        /// Number of periods
        #[arg(long, conflicts_with = "duration")]
        cycles: Option<u32>,

        /// Total duration in seconds
        #[arg(long)]
        duration: Option<f64>,

        /// Segments per second
        #[arg(long, default_value = "50")]
        sample_hz: f64,

        /// Starting phase in degrees
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        phase: f64,

        /// Use units/min feeds (G94) instead of inverse time (G93)
        #[arg(long)]
        g94: bool,

        /// Feed cap for G94 mode
        #[arg(long, default_value = "3000")]
        max_feed: f64,

        /// Lower Z clamp
        #[arg(long, allow_hyphen_values = true)]
        z_min: Option<f64>,

        /// Upper Z clamp
        #[arg(long, allow_hyphen_values = true)]
        z_max: Option<f64>,

        /// Decimal places for coordinates
        #[arg(long, default_value = "4")]
        precision: usize,

        /// Output file; gcode/program_<timestamp>.ngc when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Replace an existing file
        #[arg(long)]
        overwrite: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json)?;
    tracing::debug!("autopolish {} (built {})", VERSION, BUILD_DATE);

    let settings = load_settings(cli.settings.as_deref()).context("Failed to load settings")?;

    match &cli.command {
        Commands::Run {
            slots,
            recipe,
            contact_after,
        } => run(&cli, &settings, slots, recipe.as_deref(), *contact_after).await,
        Commands::Status => status(&cli, &settings).await,
        Commands::Recipes => recipes(&cli, &settings),
        Commands::Ports => ports(),
        Commands::Sine {
            center,
            amplitude,
            period,
            cycles,
            duration,
            sample_hz,
            phase,
            g94,
            max_feed,
            z_min,
            z_max,
            precision,
            output,
            overwrite,
        } => {
            let program = SineProgram {
                center_z: *center,
                amplitude: *amplitude,
                period_s: *period,
                cycles: *cycles,
                duration_s: *duration,
                sample_hz: *sample_hz,
                start_phase_deg: *phase,
                feed_mode: if *g94 {
                    FeedMode::UnitsPerMinute {
                        max_feed_mm_min: *max_feed,
                    }
                } else {
                    FeedMode::InverseTime
                },
                z_min: *z_min,
                z_max: *z_max,
                precision: *precision,
            };
            let gcode = program.generate().context("Invalid sine parameters")?;
            let path = save_ngc(&gcode, output.as_deref(), *overwrite, true)
                .context("Failed to save program")?;
            println!("{}", path.display());
            Ok(())
        }
    }
}

fn connection_params(cli: &Cli, settings: &Settings) -> Result<ConnectionParams> {
    let mut params = settings.connection.clone();
    if cli.simulate {
        params = ConnectionParams::simulator();
    } else if let Some(address) = &cli.tcp {
        params = match address.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .with_context(|| format!("Invalid TCP port in '{}'", address))?;
                ConnectionParams::tcp(host, port)
            }
            None => ConnectionParams::tcp(address.as_str(), params.network_port),
        };
    } else if let Some(port) = &cli.port {
        params = ConnectionParams::serial(port.as_str(), params.baud_rate);
    }
    if let Some(baud) = cli.baud {
        params.baud_rate = baud;
    }
    Ok(params)
}

fn recipe_dir(cli: &Cli, settings: &Settings) -> RecipeDirectory {
    RecipeDirectory::new(
        cli.recipes_dir
            .clone()
            .unwrap_or_else(|| settings.workflow.recipes_dir.clone()),
    )
}

async fn run(
    cli: &Cli,
    settings: &Settings,
    slots: &[u32],
    recipe: Option<&str>,
    contact_after: Option<usize>,
) -> Result<()> {
    let params = connection_params(cli, settings)?;
    let client = connect_controller(&params, settings.client.to_client_config())
        .await
        .context("Failed to connect to controller")?;

    let sensor: Arc<dyn CurrentSensor> = match contact_after {
        Some(steps) => Arc::new(SequenceCurrentSensor::contact_after(steps, 1.0)),
        None => Arc::new(DummyCurrentSensor),
    };
    let mut workflow = PolishingWorkflow::new(
        client.clone(),
        sensor,
        Arc::new(recipe_dir(cli, settings)),
        SpecimenBuffers::from_settings(&settings.buffers),
        WorkflowConfig::from_settings(settings),
    )
    .with_vision(Arc::new(LoggingVision::new()));

    for slot in slots {
        workflow.enqueue_slot(*slot, recipe);
    }

    let outcome = workflow.run().await;
    for report in workflow.history() {
        if cli.json {
            println!("{}", serde_json::to_string(report)?);
        } else {
            println!(
                "slot {} -> output {}: recipe '{}', contact {} at {:.3} mm ({:.3} mA), {} polish cycles",
                report.input_slot,
                report.output_slot,
                report.recipe,
                if report.contact.detected { "detected" } else { "not detected" },
                report.contact.depth_mm,
                report.contact.current_ma,
                report.polish_cycles
            );
        }
    }

    client.close().await?;
    if let Err(e) = outcome {
        if e.requires_operator() {
            eprintln!("Operator action required: {}", e);
        }
        return Err(e).context(format!(
            "Stopped with {} job(s) left in the queue",
            workflow.queue_len()
        ));
    }
    Ok(())
}

async fn status(cli: &Cli, settings: &Settings) -> Result<()> {
    let params = connection_params(cli, settings)?;
    let client = connect_controller(&params, settings.client.to_client_config())
        .await
        .context("Failed to connect to controller")?;

    let status = client.wait_until_idle(10.0, Duration::from_millis(500)).await;
    let parser_state = client.parser_state(Duration::from_secs(2)).await?;

    println!("{}", status);
    match parser_state {
        Some(state) => println!("{}", state),
        None => println!("(no parser state reply)"),
    }
    client.close().await?;
    Ok(())
}

fn recipes(cli: &Cli, settings: &Settings) -> Result<()> {
    let loader = recipe_dir(cli, settings);
    for name in loader.list()? {
        match loader.load(&name) {
            Ok(recipe) => println!("{:<24} {}", name, recipe.description()),
            Err(e) => println!("{:<24} (invalid: {})", name, e),
        }
    }
    Ok(())
}

fn ports() -> Result<()> {
    let ports = list_ports()?;
    if ports.is_empty() {
        println!("No controller ports found");
    }
    for port in ports {
        println!("{:<20} {}", port.port_name, port.description);
    }
    Ok(())
}
