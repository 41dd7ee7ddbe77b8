//! Egg grading thresholds.

use megg_types::EggSize;
use serde::{Deserialize, Serialize};

/// Weight boundaries between size categories, in grams.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradeRules {
    /// Eggs lighter than this are `small`.
    pub small_below_g: f64,
    /// Eggs lighter than this (and not small) are `medium`; the rest `large`.
    pub medium_below_g: f64,
}

impl Default for GradeRules {
    fn default() -> Self {
        Self {
            small_below_g: 53.0,
            medium_below_g: 63.0,
        }
    }
}

impl GradeRules {
    pub fn size(&self, weight_g: f64) -> EggSize {
        if weight_g < self.small_below_g {
            EggSize::Small
        } else if weight_g < self.medium_below_g {
            EggSize::Medium
        } else {
            EggSize::Large
        }
    }
}
