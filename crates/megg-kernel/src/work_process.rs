//! [`WorkProcessMachine`] – batch-level sorting workflow.
//!
//! ```text
//! idle ─start_batch─▶ getting_ready ─▶ loading ─▶ processing ─▶ complete
//!                                         │            │
//!                                         └─stop───────┴──▶ stopped
//! any ─reset_process─▶ idle
//! ```
//!
//! Like the calibration machine, this one is driven by its owner's ticks:
//! [`tick_command`][WorkProcessMachine::tick_command] names the round trip
//! for the current tick (if any) and [`advance`][WorkProcessMachine::advance]
//! consumes its outcome.
//!
//! | Phase | Round trip | Lasts |
//! |---|---|---|
//! | `getting_ready` | `HOME` on the first tick | `ready_ticks` |
//! | `loading` | `START` on the first tick | `loading_ticks` |
//! | `processing` | one `INSPECT` per tick | until `target` eggs |
//!
//! A run of `max_inspection_failures` inspections without an egg stops the
//! batch.

use chrono::{Local, Utc};
use megg_hal::{LinkCommand, LinkReply};
use megg_types::{
    BatchStats, Component, EggQuality, MeggError, WorkBatch, WorkPhase, WorkProcessStatus,
    WorkProcessUpdate, codes,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::grading::GradeRules;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkConfig {
    /// Eggs per batch when `start_batch` carries no `egg_count`.
    pub default_batch_size: u32,
    pub ready_ticks: u32,
    pub loading_ticks: u32,
    /// Consecutive failed inspections after which the batch is stopped.
    pub max_inspection_failures: u32,
    pub grading: GradeRules,
}

impl Default for WorkConfig {
    fn default() -> Self {
        Self {
            default_batch_size: 10,
            ready_ticks: 2,
            loading_ticks: 2,
            max_inspection_failures: 3,
            grading: GradeRules::default(),
        }
    }
}

pub struct WorkProcessMachine {
    config: WorkConfig,
    phase: WorkPhase,
    /// Active batch, or the archived one after `complete`/`stopped`.
    batch: Option<WorkBatch>,
    /// Ticks spent in the current phase.
    phase_ticks: u32,
    /// Inspections in a row that produced no egg.
    failed_inspections: u32,
}

impl Default for WorkProcessMachine {
    fn default() -> Self {
        Self::new(WorkConfig::default())
    }
}

impl WorkProcessMachine {
    pub fn new(config: WorkConfig) -> Self {
        Self {
            config,
            phase: WorkPhase::Idle,
            batch: None,
            phase_ticks: 0,
            failed_inspections: 0,
        }
    }

    /// Begin a new batch, discarding any archived one.
    ///
    /// # Errors
    ///
    /// - `batch_active` while a batch is getting ready, loading or processing.
    /// - `components_not_calibrated` when `uncalibrated` is non-empty; the
    ///   message names every blocking component.
    pub fn start_batch(
        &mut self,
        batch_id: Option<String>,
        egg_count: Option<u32>,
        uncalibrated: &[Component],
    ) -> Result<WorkProcessUpdate, MeggError> {
        if self.phase.is_active() {
            let id = self.batch.as_ref().map(|b| b.id.as_str()).unwrap_or("unknown");
            return Err(MeggError::rejected(
                codes::BATCH_ACTIVE,
                format!("Batch {id} is already {}", self.phase.as_str()),
            ));
        }
        if !uncalibrated.is_empty() {
            let names: Vec<&str> = uncalibrated.iter().map(Component::as_str).collect();
            return Err(MeggError::rejected(
                codes::COMPONENTS_NOT_CALIBRATED,
                format!("Components not calibrated: {}", names.join(", ")),
            ));
        }

        let id = batch_id.unwrap_or_else(|| Local::now().format("BATCH-%Y%m%d-%H%M%S").to_string());
        let target = egg_count.unwrap_or(self.config.default_batch_size).max(1);
        self.batch = Some(WorkBatch {
            id: id.clone(),
            phase: WorkPhase::GettingReady,
            stats: BatchStats::new(target),
            started_at: Utc::now(),
            ended_at: None,
        });
        self.enter(WorkPhase::GettingReady);
        info!(batch = %id, target, "batch started");

        Ok(self.update("Getting ready: homing conveyor and checking sensors..."))
    }

    /// Halt a loading or processing batch, keeping its statistics.
    ///
    /// # Errors
    ///
    /// `not_processing` from any other phase.
    pub fn stop(&mut self) -> Result<WorkProcessUpdate, MeggError> {
        if !matches!(self.phase, WorkPhase::Loading | WorkPhase::Processing) {
            return Err(MeggError::rejected(
                codes::NOT_PROCESSING,
                format!("Nothing to stop: work process is {}", self.phase.as_str()),
            ));
        }
        self.enter(WorkPhase::Stopped);
        let stats = self.stats();
        info!(processed = stats.processed, target = stats.target, "batch stopped");
        Ok(self.update(&format!(
            "Processing stopped after {} of {} eggs",
            stats.processed, stats.target
        )))
    }

    /// Return to `idle` from any phase, discarding the batch.
    pub fn reset(&mut self) -> WorkProcessUpdate {
        if let Some(batch) = &self.batch {
            info!(batch = %batch.id, phase = self.phase.as_str(), "batch discarded");
        }
        self.batch = None;
        self.phase = WorkPhase::Idle;
        self.phase_ticks = 0;
        self.failed_inspections = 0;
        self.update("Work process reset")
    }

    /// The round trip this tick needs, if any.
    pub fn tick_command(&self) -> Option<LinkCommand> {
        match self.phase {
            WorkPhase::GettingReady if self.phase_ticks == 0 => Some(LinkCommand::Home),
            WorkPhase::Loading if self.phase_ticks == 0 => Some(LinkCommand::Start),
            WorkPhase::Processing => Some(LinkCommand::Inspect),
            _ => None,
        }
    }

    /// Advance one tick, given the outcome of [`tick_command`][Self::tick_command].
    pub fn advance(
        &mut self,
        outcome: Option<Result<LinkReply, MeggError>>,
    ) -> Vec<WorkProcessUpdate> {
        match self.phase {
            WorkPhase::GettingReady => {
                self.note_preparation(outcome);
                self.phase_ticks += 1;
                if self.phase_ticks >= self.config.ready_ticks.max(1) {
                    self.enter(WorkPhase::Loading);
                    vec![self.update("Loading eggs onto the conveyor...")]
                } else {
                    Vec::new()
                }
            }
            WorkPhase::Loading => {
                self.note_preparation(outcome);
                self.phase_ticks += 1;
                if self.phase_ticks >= self.config.loading_ticks.max(1) {
                    self.enter(WorkPhase::Processing);
                    vec![self.update("Processing eggs...")]
                } else {
                    Vec::new()
                }
            }
            WorkPhase::Processing => self.inspect(outcome),
            WorkPhase::Idle | WorkPhase::Complete | WorkPhase::Stopped => Vec::new(),
        }
    }

    fn note_preparation(&self, outcome: Option<Result<LinkReply, MeggError>>) {
        match outcome {
            Some(Ok(LinkReply::Error(reason))) => {
                warn!(phase = self.phase.as_str(), reason = %reason, "board rejected preparation step")
            }
            Some(Err(e)) => warn!(phase = self.phase.as_str(), error = %e, "preparation step failed"),
            _ => {}
        }
    }

    fn inspect(&mut self, outcome: Option<Result<LinkReply, MeggError>>) -> Vec<WorkProcessUpdate> {
        let (weight_g, good) = match outcome {
            Some(Ok(LinkReply::Egg { weight_g, good })) => (weight_g, good),
            Some(Ok(LinkReply::Error(reason))) => return self.inspection_failed(reason),
            Some(Ok(other)) => {
                return self.inspection_failed(format!("unexpected reply: {}", other.encode()));
            }
            Some(Err(e)) => return self.inspection_failed(e.to_string()),
            None => return Vec::new(),
        };
        self.failed_inspections = 0;

        let quality = if good { EggQuality::Good } else { EggQuality::Bad };
        let size = self.config.grading.size(weight_g);
        let Some(batch) = self.batch.as_mut() else {
            return Vec::new();
        };
        batch.stats.record(quality, size);
        let stats = batch.stats.clone();
        debug!(batch = %batch.id, weight_g, ?quality, ?size, processed = stats.processed, "egg graded");

        let grade = match quality {
            EggQuality::Good => format!("good, {size:?}").to_lowercase(),
            EggQuality::Bad => "bad".to_string(),
        };
        let mut updates = vec![self.update(&format!(
            "Egg {}/{}: {weight_g:.1} g, {grade}",
            stats.processed, stats.target
        ))];

        if stats.is_finished() {
            self.enter(WorkPhase::Complete);
            info!(good = stats.good, bad = stats.bad, "batch complete");
            updates.push(self.update(&format!(
                "Batch complete: {} good, {} bad ({} small, {} medium, {} large)",
                stats.good, stats.bad, stats.small, stats.medium, stats.large
            )));
        }
        updates
    }

    /// Skip the egg; stop the batch once too many inspections in a row fail.
    fn inspection_failed(&mut self, reason: String) -> Vec<WorkProcessUpdate> {
        self.failed_inspections += 1;
        let limit = self.config.max_inspection_failures.max(1);
        if self.failed_inspections < limit {
            warn!(reason = %reason, failures = self.failed_inspections, "egg skipped: inspection failed");
            return Vec::new();
        }

        self.enter(WorkPhase::Stopped);
        let stats = self.stats();
        warn!(reason = %reason, failures = self.failed_inspections, "batch stopped: inspections keep failing");
        vec![self.update(&format!(
            "Processing stopped after {} of {} eggs: {} inspections in a row failed ({reason})",
            stats.processed, stats.target, self.failed_inspections
        ))]
    }

    fn enter(&mut self, phase: WorkPhase) {
        self.phase = phase;
        self.phase_ticks = 0;
        self.failed_inspections = 0;
        if let Some(batch) = self.batch.as_mut() {
            batch.phase = phase;
            if matches!(phase, WorkPhase::Complete | WorkPhase::Stopped) {
                batch.ended_at = Some(Utc::now());
            }
        }
    }

    fn update(&self, message: &str) -> WorkProcessUpdate {
        WorkProcessUpdate {
            phase: self.phase,
            batch_id: self.batch.as_ref().map(|b| b.id.clone()),
            stats: self.stats(),
            message: message.to_string(),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub fn phase(&self) -> WorkPhase {
        self.phase
    }

    pub fn batch(&self) -> Option<&WorkBatch> {
        self.batch.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.phase.is_active()
    }

    pub fn stats(&self) -> BatchStats {
        self.batch
            .as_ref()
            .map(|b| b.stats.clone())
            .unwrap_or_default()
    }

    pub fn config(&self) -> &WorkConfig {
        &self.config
    }

    /// Snapshot for `status`; `uncalibrated` comes from the calibration
    /// machine.
    pub fn status(&self, uncalibrated: &[Component]) -> WorkProcessStatus {
        WorkProcessStatus {
            phase: self.phase,
            batch: self.batch.clone(),
            can_start: !self.phase.is_active() && uncalibrated.is_empty(),
            blocking: uncalibrated.to_vec(),
        }
    }

    /// Snapshot as a `work_process_update`, used to answer `get_status`.
    pub fn snapshot(&self) -> WorkProcessUpdate {
        let message = match &self.batch {
            Some(batch) => format!("Batch {} is {}", batch.id, self.phase.as_str()),
            None => "No batch".to_string(),
        };
        self.update(&message)
    }
}
