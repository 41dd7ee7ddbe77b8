//! The fixed set of calibratable hardware components.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MeggError, codes};

/// One of the five hardware units mounted on the sorting machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Component {
    /// Arduino UNO controller board.
    Controller,
    /// HX711 load cell amplifier used to weigh eggs.
    LoadCell,
    /// NEMA 23 stepper driving the conveyor.
    Stepper,
    /// SG90 servo feeding eggs onto the conveyor.
    LoadingServo,
    /// MG996R servo gripping eggs for placement.
    GrippingServo,
}

impl Component {
    /// Every component, in calibration-table order.
    pub const ALL: [Component; 5] = [
        Component::Controller,
        Component::LoadCell,
        Component::Stepper,
        Component::LoadingServo,
        Component::GrippingServo,
    ];

    /// Wire identifier, e.g. `"load-cell"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Controller => "controller",
            Component::LoadCell => "load-cell",
            Component::Stepper => "stepper",
            Component::LoadingServo => "loading-servo",
            Component::GrippingServo => "gripping-servo",
        }
    }

    /// Part code understood by the controller firmware, e.g. `"HX711"`.
    pub fn hardware_code(&self) -> &'static str {
        match self {
            Component::Controller => "UNO",
            Component::LoadCell => "HX711",
            Component::Stepper => "NEMA23",
            Component::LoadingServo => "SG90",
            Component::GrippingServo => "MG996R",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Component::Controller => "Arduino UNO",
            Component::LoadCell => "HX711 Load Cell",
            Component::Stepper => "NEMA 23 Stepper Motor",
            Component::LoadingServo => "SG90 Loading Servo",
            Component::GrippingServo => "MG996R Gripping Servo",
        }
    }

    /// Resolve a firmware part code (case-insensitive).
    pub fn from_hardware_code(code: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.hardware_code().eq_ignore_ascii_case(code.trim()))
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Component {
    type Err = MeggError;

    /// Accepts the wire identifier (`load-cell`, `load_cell`) or the part code
    /// (`HX711`), ignoring case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .or_else(|| Self::from_hardware_code(s))
            .ok_or_else(|| {
                MeggError::protocol(codes::UNKNOWN_COMPONENT, format!("Unknown component: {s}"))
            })
    }
}

/// Calibration progression of a single component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationStatus {
    Idle,
    Requesting,
    InProgress,
    Complete,
    Failed,
}

impl CalibrationStatus {
    /// A session is live for the component.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Requesting | Self::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// Last known calibration record of a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentState {
    pub component: Component,
    pub status: CalibrationStatus,
    pub last_calibrated_at: Option<DateTime<Utc>>,
    /// Measured parameters from the last successful calibration, e.g.
    /// `zero_offset` and `scale_factor` for the load cell.
    pub parameters: BTreeMap<String, f64>,
    /// Reason of the most recent failed attempt, cleared on success.
    pub last_error: Option<String>,
}

impl ComponentState {
    pub fn new(component: Component) -> Self {
        Self {
            component,
            status: CalibrationStatus::Idle,
            last_calibrated_at: None,
            parameters: BTreeMap::new(),
            last_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_names_and_part_codes() {
        assert_eq!("load-cell".parse::<Component>().unwrap(), Component::LoadCell);
        assert_eq!("LOAD_CELL".parse::<Component>().unwrap(), Component::LoadCell);
        assert_eq!("hx711".parse::<Component>().unwrap(), Component::LoadCell);
        assert_eq!("MG996R".parse::<Component>().unwrap(), Component::GrippingServo);
    }

    #[test]
    fn unknown_component_is_a_protocol_error() {
        let err = "flux-capacitor".parse::<Component>().unwrap_err();
        assert_eq!(err.code(), codes::UNKNOWN_COMPONENT);
    }

    #[test]
    fn serializes_as_kebab_case() {
        let json = serde_json::to_string(&Component::GrippingServo).unwrap();
        assert_eq!(json, "\"gripping-servo\"");
        let status = serde_json::to_string(&CalibrationStatus::InProgress).unwrap();
        assert_eq!(status, "\"in_progress\"");
    }

    #[test]
    fn every_component_has_a_distinct_part_code() {
        for c in Component::ALL {
            assert_eq!(Component::from_hardware_code(c.hardware_code()), Some(c));
        }
    }
}
