//! Per-component calibration step messages.
//!
//! Each component has [`MESSAGES_PER_COMPONENT`] messages: index 0 accompanies
//! the `requesting` event, 1–3 the intermediate steps and 4 the completion.
//! Deployments may replace any component's row through configuration.

use std::collections::BTreeMap;

use megg_types::{Component, MeggError};
use serde::{Deserialize, Serialize};

pub const MESSAGES_PER_COMPONENT: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageTable {
    rows: BTreeMap<Component, Vec<String>>,
}

impl Default for MessageTable {
    fn default() -> Self {
        let rows = Component::ALL
            .into_iter()
            .map(|c| (c, default_row(c).iter().map(|m| m.to_string()).collect()))
            .collect();
        Self { rows }
    }
}

impl MessageTable {
    /// Replace the row for `component`.
    ///
    /// # Errors
    ///
    /// [`MeggError::Config`] unless exactly [`MESSAGES_PER_COMPONENT`]
    /// non-empty messages are supplied.
    pub fn set(&mut self, component: Component, row: Vec<String>) -> Result<(), MeggError> {
        if row.len() != MESSAGES_PER_COMPONENT || row.iter().any(|m| m.trim().is_empty()) {
            return Err(MeggError::Config(format!(
                "messages for {component} must be {MESSAGES_PER_COMPONENT} non-empty strings, got {}",
                row.len()
            )));
        }
        self.rows.insert(component, row);
        Ok(())
    }

    /// Apply every valid row of `overrides`, returning the rejected ones.
    pub fn merge(&mut self, overrides: BTreeMap<Component, Vec<String>>) -> Vec<MeggError> {
        overrides
            .into_iter()
            .filter_map(|(component, row)| self.set(component, row).err())
            .collect()
    }

    /// Message for `index`, clamped to the last entry.
    pub fn message(&self, component: Component, index: usize) -> &str {
        let index = index.min(MESSAGES_PER_COMPONENT - 1);
        match self.rows.get(&component).and_then(|row| row.get(index)) {
            Some(m) => m,
            None => default_row(component)[index],
        }
    }

    pub fn failure(&self, component: Component, reason: &str) -> String {
        format!("{} calibration failed: {reason}", component.display_name())
    }
}

fn default_row(component: Component) -> [&'static str; MESSAGES_PER_COMPONENT] {
    match component {
        Component::Controller => [
            "Requesting Arduino UNO controller check...",
            "Verifying serial communication...",
            "Checking reference voltage...",
            "Testing digital and PWM outputs...",
            "Controller verified: communication and I/O OK",
        ],
        Component::LoadCell => [
            "Requesting HX711 load cell calibration...",
            "Taring empty platform (zero offset)...",
            "Place reference weight on platform...",
            "Computing scale factor from reference weight...",
            "Load cell calibrated: zero offset and scale factor stored",
        ],
        Component::Stepper => [
            "Requesting NEMA 23 stepper calibration...",
            "Homing conveyor to limit switch...",
            "Measuring steps per revolution...",
            "Verifying conveyor travel distance...",
            "Stepper calibrated: home position and steps per revolution stored",
        ],
        Component::LoadingServo => [
            "Requesting SG90 loading servo calibration...",
            "Moving to minimum angle...",
            "Moving to maximum angle...",
            "Centering loading gate...",
            "Loading servo calibrated: angle range stored",
        ],
        Component::GrippingServo => [
            "Requesting MG996R gripping servo calibration...",
            "Opening gripper fully...",
            "Closing gripper to grip position...",
            "Testing grip hold...",
            "Gripping servo calibrated: open and grip angles stored",
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_component_has_a_full_row() {
        let table = MessageTable::default();
        for c in Component::ALL {
            for i in 0..MESSAGES_PER_COMPONENT {
                assert!(!table.message(c, i).is_empty());
            }
        }
        assert_eq!(
            table.message(Component::LoadCell, 99),
            table.message(Component::LoadCell, 4)
        );
    }

    #[test]
    fn overrides_replace_only_valid_rows() {
        let mut table = MessageTable::default();
        let mut overrides = BTreeMap::new();
        overrides.insert(
            Component::Stepper,
            (0..5).map(|i| format!("stepper step {i}")).collect(),
        );
        overrides.insert(Component::LoadCell, vec!["too short".to_string()]);

        let rejected = table.merge(overrides);
        assert_eq!(rejected.len(), 1);
        assert_eq!(table.message(Component::Stepper, 2), "stepper step 2");
        assert_eq!(
            table.message(Component::LoadCell, 0),
            "Requesting HX711 load cell calibration..."
        );
    }

    #[test]
    fn deserializes_from_kebab_keys() {
        let json = r#"{"gripping-servo": ["a", "b", "c", "d", "e"]}"#;
        let rows: BTreeMap<Component, Vec<String>> = serde_json::from_str(json).unwrap();
        let mut table = MessageTable::default();
        assert!(table.merge(rows).is_empty());
        assert_eq!(table.message(Component::GrippingServo, 4), "e");
    }
}
