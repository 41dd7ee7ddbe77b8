//! [`SystemStatus`] – the derived snapshot broadcast to every client.
//!
//! A snapshot is always rebuilt from the live state machines and the hardware
//! link; nothing in this module is stored independently.

use serde::{Deserialize, Serialize};

use crate::component::{CalibrationStatus, Component, ComponentState};
use crate::work::{WorkBatch, WorkPhase};

/// Whether the hardware link is talking to a board or fabricating replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkMode {
    Real,
    Simulated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkStatus {
    pub mode: LinkMode,
    /// Serial port in use; `None` in simulated mode.
    pub port: Option<String>,
    /// The link fell back to simulation after a transport failure.
    pub degraded: bool,
    pub detail: Option<String>,
}

/// View of the single in-flight calibration session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProgress {
    pub component: Component,
    pub status: CalibrationStatus,
    pub progress: u8,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkProcessStatus {
    pub phase: WorkPhase,
    /// Active or archived batch.
    pub batch: Option<WorkBatch>,
    /// `start_batch` would currently be accepted.
    pub can_start: bool,
    /// Components that still block `start_batch`.
    pub blocking: Vec<Component>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub components: Vec<ComponentState>,
    pub calibration: Option<CalibrationProgress>,
    pub work_process: WorkProcessStatus,
    pub link: LinkStatus,
}

impl SystemStatus {
    /// Look up the record for `component`.
    pub fn component(&self, component: Component) -> Option<&ComponentState> {
        self.components.iter().find(|s| s.component == component)
    }
}
