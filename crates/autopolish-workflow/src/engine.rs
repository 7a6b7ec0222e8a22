//! Specimen polishing workflow
//!
//! Jobs are processed strictly one at a time, in the order they were
//! queued. Every job walks the same stages:
//!
//! ```text
//! MovingToSafeZ -> PickingUp -> MovingToSafeZ -> DetectingContact
//!     -> Polishing -> Inspecting -> Storing -> Done
//! ```
//!
//! A failing stage aborts its job immediately and the error is returned to
//! the caller. No recovery motion is attempted; the machine stays where the
//! failure left it. The failed job is dropped, the rest of the queue and the
//! controller connection stay usable.

use crate::buffers::SpecimenBuffers;
use crate::macros::MacroRunner;
use crate::sensors::CurrentSensor;
use crate::vision::VisionSystem;
use crate::waveform::polishing_waveform;
use autopolish_core::{BufferType, MotionController, Result, WorkflowError};
use autopolish_settings::{CycleMode, MotionMacro, Recipe, RecipeLoader, Settings};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

/// Engine parameters
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowConfig {
    /// Recipe used when a job names none
    pub default_recipe: String,
    /// Safe Z for traverses; the recipe's when unset
    pub safe_z_override_mm: Option<f64>,
    /// Feed of the controlled move to safe Z
    pub safe_z_feed_mm_min: f64,
    /// Descent step; the recipe's when unset
    pub approach_step_override_mm: Option<f64>,
    /// Descent step when neither override nor recipe sets one
    pub default_approach_step_mm: f64,
    /// Lift after contact detection
    pub retract_mm: f64,
    /// Status polling rate while waiting for idle
    pub idle_poll_hz: f64,
    /// Bound on each wait for idle
    pub idle_timeout: Duration,
    /// Streaming window for macros and polishing programs
    pub stream_window: usize,
    /// Per-line acknowledgement timeout
    pub line_timeout: Duration,
    /// Polishing programs per specimen when the recipe sets no count
    pub default_polish_cycles: u32,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            default_recipe: "default".to_string(),
            safe_z_override_mm: None,
            safe_z_feed_mm_min: 600.0,
            approach_step_override_mm: None,
            default_approach_step_mm: 0.1,
            retract_mm: 2.0,
            idle_poll_hz: 5.0,
            idle_timeout: Duration::from_secs(60),
            stream_window: 12,
            line_timeout: Duration::from_secs(5),
            default_polish_cycles: 5,
        }
    }
}

impl WorkflowConfig {
    /// Engine parameters from station settings
    pub fn from_settings(settings: &Settings) -> Self {
        let defaults = Self::default();
        let wf = &settings.workflow;
        let contact = &settings.calibration.contact;
        Self {
            default_recipe: wf.default_recipe.clone(),
            safe_z_override_mm: settings.positions.safe_z_mm,
            safe_z_feed_mm_min: wf.safe_z_feed_mm_min,
            approach_step_override_mm: contact.approach_step_mm,
            default_approach_step_mm: wf.default_approach_step_mm,
            retract_mm: contact.retract_mm.unwrap_or(wf.default_retract_mm),
            idle_poll_hz: wf.idle_poll_hz,
            idle_timeout: Duration::try_from_secs_f64(wf.idle_timeout_s)
                .unwrap_or(defaults.idle_timeout),
            stream_window: wf.stream_window.max(1),
            line_timeout: Duration::try_from_secs_f64(wf.line_timeout_s)
                .unwrap_or(defaults.line_timeout),
            default_polish_cycles: wf.default_polish_cycles,
        }
    }
}

/// Procedure stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    /// Absolute move to safe Z
    MovingToSafeZ,
    /// Traverse to the input slot and run the pickup macro
    PickingUp,
    /// Stepwise descent until current flows
    DetectingContact,
    /// Oscillation programs
    Polishing,
    /// Snapshot for inspection
    Inspecting,
    /// Traverse to a free output slot and run the place macro
    Storing,
    /// Specimen stored
    Done,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::MovingToSafeZ => "moving to safe Z",
            Self::PickingUp => "picking up",
            Self::DetectingContact => "detecting contact",
            Self::Polishing => "polishing",
            Self::Inspecting => "inspecting",
            Self::Storing => "storing",
            Self::Done => "done",
        };
        write!(f, "{}", name)
    }
}

/// A queued specimen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job id
    pub id: Uuid,
    /// Input slot holding the specimen
    pub slot: u32,
    /// Recipe to process it with
    pub recipe: String,
    /// When the job was queued
    pub enqueued_at: DateTime<Utc>,
}

/// Outcome of the contact descent
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactResult {
    /// Whether the threshold was reached before the depth limit
    pub detected: bool,
    /// Steps taken
    pub steps: u32,
    /// Cumulative descent
    pub depth_mm: f64,
    /// Last reading
    pub current_ma: f64,
}

/// Record of one processed specimen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecimenReport {
    /// Job id
    pub job_id: Uuid,
    /// Recipe used
    pub recipe: String,
    /// Slot the specimen came from
    pub input_slot: u32,
    /// Slot it was stored in
    pub output_slot: u32,
    /// Specimen label recorded in the output slot
    pub specimen: String,
    /// Contact detection outcome
    pub contact: ContactResult,
    /// Polishing programs run
    pub polish_cycles: u32,
    /// Processing start
    pub started_at: DateTime<Utc>,
    /// Processing end
    pub finished_at: DateTime<Utc>,
}

/// Sequencing engine driving specimens through the polishing procedure
pub struct PolishingWorkflow {
    controller: Arc<dyn MotionController>,
    sensor: Arc<dyn CurrentSensor>,
    vision: Option<Arc<dyn VisionSystem>>,
    recipes: Arc<dyn RecipeLoader>,
    macros: MacroRunner,
    buffers: SpecimenBuffers,
    config: WorkflowConfig,
    queue: VecDeque<Job>,
    stage: Option<Stage>,
    history: Vec<SpecimenReport>,
}

impl PolishingWorkflow {
    /// Create an engine. Macros resolve against the recipe loader's directory.
    pub fn new(
        controller: Arc<dyn MotionController>,
        sensor: Arc<dyn CurrentSensor>,
        recipes: Arc<dyn RecipeLoader>,
        buffers: SpecimenBuffers,
        config: WorkflowConfig,
    ) -> Self {
        let macros = MacroRunner::new(recipes.macro_base_dir())
            .with_window(config.stream_window)
            .with_timeouts(config.line_timeout, config.idle_poll_hz, config.idle_timeout);
        Self {
            controller,
            sensor,
            vision: None,
            recipes,
            macros,
            buffers,
            config,
            queue: VecDeque::new(),
            stage: None,
            history: Vec::new(),
        }
    }

    /// Attach a camera for the inspection stage
    pub fn with_vision(mut self, vision: Arc<dyn VisionSystem>) -> Self {
        self.vision = Some(vision);
        self
    }

    /// Engine parameters
    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Buffer positions and occupancy
    pub fn buffers(&self) -> &SpecimenBuffers {
        &self.buffers
    }

    /// Stage most recently entered, if any job has started
    pub fn stage(&self) -> Option<Stage> {
        self.stage
    }

    /// Reports of every specimen completed so far
    pub fn history(&self) -> &[SpecimenReport] {
        &self.history
    }

    /// Names of the recipes the loader offers
    pub fn available_recipes(&self) -> Result<Vec<String>> {
        self.recipes.list()
    }

    /// Queue the specimen in `slot`. Occupancy is not checked here.
    pub fn enqueue_slot(&mut self, slot: u32, recipe: Option<&str>) -> Uuid {
        let job = Job {
            id: Uuid::new_v4(),
            slot,
            recipe: recipe
                .unwrap_or(&self.config.default_recipe)
                .to_string(),
            enqueued_at: Utc::now(),
        };
        tracing::info!(
            "Queued input slot {} with recipe '{}' as job {}",
            job.slot,
            job.recipe,
            job.id
        );
        let id = job.id;
        self.queue.push_back(job);
        id
    }

    /// Drop every queued job
    pub fn clear_queue(&mut self) {
        self.queue.clear();
    }

    /// Jobs waiting to run, oldest first
    pub fn queued_jobs(&self) -> impl Iterator<Item = &Job> {
        self.queue.iter()
    }

    /// Number of jobs waiting to run
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Process queued jobs until the queue is empty.
    ///
    /// Stops at the first failing job and returns its error; that job is
    /// dropped and later jobs stay queued. Reports of jobs completed before
    /// the failure remain available from [`history`](Self::history).
    pub async fn run(&mut self) -> Result<Vec<SpecimenReport>> {
        let mut reports = Vec::new();
        while let Some(report) = self.run_next().await? {
            reports.push(report);
        }
        Ok(reports)
    }

    /// Process the oldest queued job, if any
    pub async fn run_next(&mut self) -> Result<Option<SpecimenReport>> {
        let Some(job) = self.queue.pop_front() else {
            return Ok(None);
        };

        let span = tracing::info_span!("job", id = %job.id, slot = job.slot, recipe = %job.recipe);
        match self.process(&job).instrument(span).await {
            Ok(report) => {
                self.history.push(report.clone());
                Ok(Some(report))
            }
            Err(e) => {
                let stage = self
                    .stage
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "loading recipe".to_string());
                tracing::error!("Job {} failed while {}: {}", job.id, stage, e);
                Err(e)
            }
        }
    }

    async fn process(&mut self, job: &Job) -> Result<SpecimenReport> {
        let started_at = Utc::now();
        self.stage = None;
        let recipe = self.recipes.load(&job.recipe)?;
        tracing::info!(
            "Processing input slot {} with recipe '{}'",
            job.slot,
            recipe.name
        );

        self.enter(Stage::MovingToSafeZ);
        self.move_to_safe_z(&recipe).await?;

        self.enter(Stage::PickingUp);
        let specimen = self.pickup(job, &recipe).await?;

        self.enter(Stage::MovingToSafeZ);
        self.move_to_safe_z(&recipe).await?;

        self.enter(Stage::DetectingContact);
        let contact = self.detect_contact(&recipe).await?;

        self.enter(Stage::Polishing);
        let polish_cycles = self.polish(&recipe).await?;

        self.enter(Stage::Inspecting);
        self.inspect();

        self.enter(Stage::Storing);
        let output_slot = self.store(&recipe, &specimen).await?;

        self.enter(Stage::Done);
        tracing::info!(
            "Specimen {} stored in output slot {}",
            specimen,
            output_slot
        );
        Ok(SpecimenReport {
            job_id: job.id,
            recipe: recipe.name.clone(),
            input_slot: job.slot,
            output_slot,
            specimen,
            contact,
            polish_cycles,
            started_at,
            finished_at: Utc::now(),
        })
    }

    fn enter(&mut self, stage: Stage) {
        tracing::info!("Stage: {}", stage);
        self.stage = Some(stage);
    }

    /// Traverse height: the station override, else the recipe's
    pub fn configured_safe_z(&self, recipe: &Recipe) -> f64 {
        self.config
            .safe_z_override_mm
            .unwrap_or_else(|| recipe.safe_z_mm())
    }

    async fn command(&self, line: &str) -> Result<()> {
        self.controller
            .send_command(line, true, self.config.line_timeout)
            .await
    }

    async fn wait_idle(&self) {
        let status = self
            .controller
            .wait_until_idle(self.config.idle_poll_hz, self.config.idle_timeout)
            .await;
        if !status.state.is_idle() {
            tracing::warn!("Machine not idle after {:?}: {}", self.config.idle_timeout, status);
        }
    }

    async fn move_to_safe_z(&self, recipe: &Recipe) -> Result<()> {
        self.command("G90").await?;
        self.command(&format!(
            "G1 Z{:.3} F{}",
            self.configured_safe_z(recipe),
            self.config.safe_z_feed_mm_min
        ))
        .await?;
        self.wait_idle().await;
        Ok(())
    }

    async fn rapid_xy(&self, position: [f64; 3], safe_z: f64) -> Result<()> {
        self.command("G90").await?;
        self.command(&format!("G0 Z{:.3}", safe_z)).await?;
        self.command(&format!("G0 X{:.3} Y{:.3}", position[0], position[1]))
            .await?;
        self.wait_idle().await;
        Ok(())
    }

    fn recipe_macro(&self, recipe: &Recipe, role: &str, id: &str) -> Result<MotionMacro> {
        recipe.macro_by_id(id).cloned().ok_or_else(|| {
            WorkflowError::MissingMacro {
                recipe: recipe.name.clone(),
                role: role.to_string(),
                macro_id: id.to_string(),
            }
            .into()
        })
    }

    async fn pickup(&mut self, job: &Job, recipe: &Recipe) -> Result<String> {
        let position = self.buffers.position(BufferType::Input, job.slot)?;
        let pickup = self.recipe_macro(recipe, "pickup", &recipe.motion.pickup_macro)?;

        self.rapid_xy(position, self.configured_safe_z(recipe))
            .await?;
        self.macros
            .execute(self.controller.as_ref(), &pickup, true)
            .await?;

        let specimen = self
            .buffers
            .take_input(job.slot)?
            .unwrap_or_else(|| job.id.to_string());
        Ok(specimen)
    }

    async fn detect_contact(&self, recipe: &Recipe) -> Result<ContactResult> {
        let contact = recipe.contact();
        let step = self
            .config
            .approach_step_override_mm
            .or(contact.approach_step_mm)
            .unwrap_or(self.config.default_approach_step_mm);
        let feed = contact.approach_speed_mm_s * 60.0;
        let max_steps = (contact.max_depth_mm / step - 1e-9).ceil().max(0.0) as u32;

        let mut result = ContactResult::default();
        self.command("G91").await?;
        for n in 1..=max_steps {
            self.command(&format!("G1 Z-{:.3} F{:.1}", step, feed))
                .await?;
            self.wait_idle().await;

            let reading = self.sensor.read()?;
            result.steps = n;
            result.depth_mm = f64::from(n) * step;
            result.current_ma = reading.milliamperes();
            tracing::debug!(
                "Contact step {}: depth {:.3} mm, {:.3} mA",
                n,
                result.depth_mm,
                result.current_ma
            );
            if result.current_ma >= contact.detection_current_ma {
                result.detected = true;
                break;
            }
        }

        if result.detected {
            tracing::info!("Contact detected at {:.3} mm", result.depth_mm);
        } else {
            tracing::warn!(
                "No contact within {:.3} mm (last reading {:.3} mA)",
                contact.max_depth_mm,
                result.current_ma
            );
        }

        if self.config.retract_mm > 0.0 {
            self.command(&format!("G1 Z{:.3} F{:.1}", self.config.retract_mm, feed))
                .await?;
            self.wait_idle().await;
        }
        self.command("G90").await?;
        Ok(result)
    }

    async fn polish(&self, recipe: &Recipe) -> Result<u32> {
        let cycle = recipe.cycle();
        let cycles = cycle.max_cycles.unwrap_or(self.config.default_polish_cycles);
        if cycle.mode != CycleMode::Cycles {
            tracing::debug!(
                "Cycle mode '{}' runs {} programs here; duration {:?}s and charge {:?}C are not enforced",
                cycle.mode,
                cycles,
                cycle.duration_s,
                cycle.target_charge_c
            );
        }

        let program = polishing_waveform(recipe.waveform());
        for n in 1..=cycles {
            tracing::debug!("Polishing cycle {}/{}", n, cycles);
            self.controller
                .stream_commands(&program, self.config.stream_window, self.config.line_timeout)
                .await?;
            self.wait_idle().await;
        }
        Ok(cycles)
    }

    fn inspect(&self) {
        match &self.vision {
            Some(vision) => {
                if let Err(e) = vision.capture_snapshot(Some("inspection")) {
                    tracing::warn!("Inspection snapshot failed: {}", e);
                }
            }
            None => tracing::debug!("No vision system attached"),
        }
    }

    async fn store(&mut self, recipe: &Recipe, specimen: &str) -> Result<u32> {
        self.move_to_safe_z(recipe).await?;
        let place = self.recipe_macro(recipe, "place", &recipe.motion.place_macro)?;
        let slot = self
            .buffers
            .next_free_output()
            .ok_or(WorkflowError::NoFreeOutputSlot)?;
        let position = self.buffers.position(BufferType::Output, slot)?;

        self.rapid_xy(position, self.configured_safe_z(recipe))
            .await?;
        self.macros
            .execute(self.controller.as_ref(), &place, true)
            .await?;
        self.buffers.store_output(slot, specimen)?;
        Ok(slot)
    }
}
