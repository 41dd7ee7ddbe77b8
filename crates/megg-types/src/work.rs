//! Work-process batch types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound on eggs in a single batch.
pub const MAX_BATCH_SIZE: u32 = 1000;

/// Phase of the egg-sorting work process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkPhase {
    Idle,
    GettingReady,
    Loading,
    Processing,
    Complete,
    Stopped,
}

impl WorkPhase {
    /// Phases during which a batch is live and ticking.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::GettingReady | Self::Loading | Self::Processing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::GettingReady => "getting_ready",
            Self::Loading => "loading",
            Self::Processing => "processing",
            Self::Complete => "complete",
            Self::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EggQuality {
    Good,
    Bad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EggSize {
    Small,
    Medium,
    Large,
}

/// Running counts for one batch.
///
/// Only good eggs are graded by size, so `small + medium + large == good`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub processed: u32,
    pub target: u32,
    pub good: u32,
    pub bad: u32,
    pub small: u32,
    pub medium: u32,
    pub large: u32,
}

impl BatchStats {
    pub fn new(target: u32) -> Self {
        Self {
            target,
            ..Self::default()
        }
    }

    pub fn record(&mut self, quality: EggQuality, size: EggSize) {
        self.processed += 1;
        match quality {
            EggQuality::Good => {
                self.good += 1;
                match size {
                    EggSize::Small => self.small += 1,
                    EggSize::Medium => self.medium += 1,
                    EggSize::Large => self.large += 1,
                }
            }
            EggQuality::Bad => self.bad += 1,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.processed >= self.target
    }
}

/// One sorting run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkBatch {
    pub id: String,
    pub phase: WorkPhase,
    pub stats: BatchStats,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}
