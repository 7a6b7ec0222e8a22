//! End-to-end workflow runs against the simulated controller

use autopolish_communication::{ClientConfig, ControllerClient, SimulatedTransport};
use autopolish_core::{BufferType, Error, MacroError, WorkflowError};
use autopolish_settings::{RecipeDirectory, SlotEntry};
use autopolish_workflow::{
    DummyCurrentSensor, LoggingVision, PolishingWorkflow, SequenceCurrentSensor, SpecimenBuffers,
    Stage, WorkflowConfig,
};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const RECIPE: &str = r#"
metadata:
  description: Test recipe
motion:
  safe_z_mm: 20
  pickup_macro: pickup_standard
  place_macro: place_standard
motion_macros:
  pickup_standard: { file: motion/pickup_standard.gcode }
  place_standard: { file: motion/place_standard.gcode }
polishing:
  waveform: { amplitude_mm: 0.2, period_s: 1.0, center_z_mm: -0.5 }
  contact: { approach_speed_mm_s: 1.0, detection_current_ma: 1.0, max_depth_mm: 1.0 }
  cycle: { mode: cycles, max_cycles: 1 }
"#;

struct Station {
    _dir: TempDir,
    sim: Arc<SimulatedTransport>,
    client: Arc<ControllerClient>,
    workflow: PolishingWorkflow,
    vision: Arc<LoggingVision>,
}

fn slot(slot: u32, x: f64, y: f64) -> SlotEntry {
    SlotEntry {
        slot,
        position: [x, y, 5.0],
        specimen: None,
    }
}

fn write_recipe_dir(recipe: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("motion")).unwrap();
    fs::write(
        dir.path().join("motion/pickup_standard.gcode"),
        "(pickup)\nG1 X1\n",
    )
    .unwrap();
    fs::write(dir.path().join("motion/place_standard.gcode"), "G1 X-1\n").unwrap();
    fs::write(dir.path().join("basic.yml"), recipe).unwrap();
    dir
}

async fn station(recipe: &str, output_slots: Vec<SlotEntry>) -> Station {
    let dir = write_recipe_dir(recipe);

    let sim = Arc::new(SimulatedTransport::new());
    let client = Arc::new(ControllerClient::new(
        sim.clone(),
        ClientConfig {
            read_timeout: Duration::from_millis(5),
            banner_timeout: Duration::from_millis(500),
            ..Default::default()
        },
    ));
    client.connect().await.unwrap();

    let config = WorkflowConfig {
        default_recipe: "basic".to_string(),
        idle_poll_hz: 200.0,
        idle_timeout: Duration::from_secs(2),
        line_timeout: Duration::from_secs(1),
        ..Default::default()
    };
    let buffers = SpecimenBuffers::new(
        vec![slot(1, 100.0, 50.0), slot(2, 110.0, 50.0)],
        output_slots,
    );
    let vision = Arc::new(LoggingVision::new());
    let workflow = PolishingWorkflow::new(
        client.clone(),
        Arc::new(DummyCurrentSensor),
        Arc::new(RecipeDirectory::new(dir.path())),
        buffers,
        config,
    )
    .with_vision(vision.clone());

    Station {
        _dir: dir,
        sim,
        client,
        workflow,
        vision,
    }
}

/// Index of each expected line, searching forward from the previous match
fn positions_in_order(sent: &[String], expected: &[&str]) -> Vec<usize> {
    let mut found = Vec::new();
    let mut from = 0;
    for line in expected {
        let index = sent[from..]
            .iter()
            .position(|s| s == line)
            .unwrap_or_else(|| panic!("'{}' not sent after index {}: {:?}", line, from, sent))
            + from;
        found.push(index);
        from = index + 1;
    }
    found
}

#[tokio::test]
async fn test_single_specimen_command_order() {
    let mut station = station(RECIPE, vec![slot(1, 120.0, 60.0), slot(2, 130.0, 60.0)]).await;
    station.workflow.enqueue_slot(1, None);

    let reports = station.workflow.run().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(station.workflow.stage(), Some(Stage::Done));

    let sent = station.sim.sent_lines();
    positions_in_order(
        &sent,
        &[
            "G90",
            "G1 Z20.000 F600",
            "G0 Z20.000",
            "G0 X100.000 Y50.000",
            "G1 X1",
            "G1 Z20.000 F600",
            "G91",
            "G1 Z-0.100 F60.0",
            "G1 Z2.000 F60.0",
            "G90",
            "G1 Z-0.500 F48.0",
            "G1 Z20.000 F600",
            "G0 Z20.000",
            "G0 X120.000 Y60.000",
            "G1 X-1",
        ],
    );
    assert_eq!(sent.last().map(String::as_str), Some("G1 X-1"));
    assert!(!sent.iter().any(|l| l.starts_with('(')));

    let descents = sent.iter().filter(|l| *l == "G1 Z-0.100 F60.0").count();
    assert_eq!(descents, 10);

    let report = &reports[0];
    assert_eq!(report.input_slot, 1);
    assert_eq!(report.output_slot, 1);
    assert_eq!(report.recipe, "basic");
    assert!(!report.contact.detected);
    assert_eq!(report.polish_cycles, 1);
    assert_eq!(station.vision.captures(), vec!["inspection"]);
    assert_eq!(station.client.in_flight(), 0);
}

#[tokio::test]
async fn test_two_specimens_never_share_output_slot() {
    let mut station = station(RECIPE, vec![slot(1, 120.0, 60.0), slot(2, 130.0, 60.0)]).await;
    station.workflow.enqueue_slot(1, None);
    station.workflow.enqueue_slot(2, Some("basic"));

    let reports = station.workflow.run().await.unwrap();
    let outputs: Vec<u32> = reports.iter().map(|r| r.output_slot).collect();
    assert_eq!(outputs, vec![1, 2]);

    let sent = station.sim.sent_lines();
    positions_in_order(
        &sent,
        &[
            "G0 X100.000 Y50.000",
            "G1 X1",
            "G0 X120.000 Y60.000",
            "G1 X-1",
            "G0 X110.000 Y50.000",
            "G1 X1",
            "G0 X130.000 Y60.000",
            "G1 X-1",
        ],
    );
    assert_eq!(station.workflow.history().len(), 2);
    assert!(station
        .workflow
        .buffers()
        .specimen(BufferType::Output, 2)
        .is_some());
}

#[tokio::test]
async fn test_full_output_buffer_requires_operator() {
    let mut station = station(RECIPE, vec![slot(1, 120.0, 60.0)]).await;
    station.workflow.enqueue_slot(1, None);
    station.workflow.enqueue_slot(2, None);
    station.workflow.enqueue_slot(1, None);

    let err = station.workflow.run().await.unwrap_err();
    assert!(matches!(
        err,
        Error::Workflow(WorkflowError::NoFreeOutputSlot)
    ));
    assert!(err.requires_operator());
    assert_eq!(station.workflow.history().len(), 1);
    assert_eq!(station.workflow.stage(), Some(Stage::Storing));
    assert_eq!(station.workflow.queue_len(), 1);
}

#[tokio::test]
async fn test_contact_detection_ends_descent() {
    let dir = write_recipe_dir(RECIPE);
    let sim = Arc::new(SimulatedTransport::new());
    let client = Arc::new(ControllerClient::new(
        sim.clone(),
        ClientConfig {
            read_timeout: Duration::from_millis(5),
            ..Default::default()
        },
    ));
    client.connect().await.unwrap();

    let mut workflow = PolishingWorkflow::new(
        client.clone(),
        Arc::new(SequenceCurrentSensor::contact_after(3, 0.002)),
        Arc::new(RecipeDirectory::new(dir.path())),
        SpecimenBuffers::new(vec![slot(1, 100.0, 50.0)], vec![slot(1, 120.0, 60.0)]),
        WorkflowConfig {
            default_recipe: "basic".to_string(),
            approach_step_override_mm: Some(0.25),
            retract_mm: 1.0,
            idle_poll_hz: 200.0,
            idle_timeout: Duration::from_secs(2),
            ..Default::default()
        },
    );
    workflow.enqueue_slot(1, None);
    let report = workflow.run_next().await.unwrap().unwrap();

    assert!(report.contact.detected);
    assert_eq!(report.contact.steps, 4);
    assert!((report.contact.depth_mm - 1.0).abs() < 1e-9);

    let sent = sim.sent_lines();
    assert_eq!(sent.iter().filter(|l| *l == "G1 Z-0.250 F60.0").count(), 4);
    assert!(sent.iter().any(|l| l == "G1 Z1.000 F60.0"));
}

#[tokio::test]
async fn test_missing_macro_file_sends_nothing() {
    let recipe = RECIPE.replace("motion/pickup_standard.gcode", "motion/absent.gcode");
    let mut station = station(&recipe, vec![slot(1, 120.0, 60.0)]).await;
    station.workflow.enqueue_slot(1, None);

    let err = station.workflow.run().await.unwrap_err();
    assert!(matches!(
        err.root(),
        Error::Macro(MacroError::NotFound { name, .. }) if name == "pickup_standard"
    ));
    assert!(matches!(err, Error::Macro(MacroError::Execution { .. })));
    assert!(err.is_configuration_error());
    assert_eq!(station.workflow.stage(), Some(Stage::PickingUp));
    assert_eq!(station.client.in_flight(), 0);
    assert!(!station.sim.sent_lines().iter().any(|l| l == "G1 X1"));
}

#[tokio::test]
async fn test_undefined_slot_fails_job() {
    let mut station = station(RECIPE, vec![slot(1, 120.0, 60.0)]).await;
    station.workflow.enqueue_slot(7, None);

    let err = station.workflow.run().await.unwrap_err();
    assert!(matches!(
        err,
        Error::Workflow(WorkflowError::SlotNotDefined {
            buffer: BufferType::Input,
            slot: 7
        })
    ));
    assert!(!station
        .sim
        .sent_lines()
        .iter()
        .any(|l| l.starts_with("G0 X")));
}

#[tokio::test]
async fn test_unknown_recipe_fails_before_motion() {
    let mut station = station(RECIPE, vec![slot(1, 120.0, 60.0)]).await;
    station.workflow.enqueue_slot(1, Some("ghost"));

    let err = station.workflow.run().await.unwrap_err();
    assert!(err.is_configuration_error());
    assert!(station.sim.sent_lines().is_empty());
    assert_eq!(station.workflow.stage(), None);
    assert_eq!(station.workflow.available_recipes().unwrap(), vec!["basic"]);
}
