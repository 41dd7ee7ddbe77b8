//! [`SimulatedLink`] – fabricates controller replies when no board is attached.
//!
//! Replies follow the same framing as the firmware so the layers above run
//! unchanged. Readings and egg weights come from a seedable RNG, which keeps
//! test runs reproducible.
//!
//! ```rust
//! use megg_hal::sim::SimulatedLink;
//! use megg_hal::link::SimSettings;
//! use megg_types::Component;
//!
//! let link = SimulatedLink::new(&SimSettings::default())
//!     .with_seed(7)
//!     .failing_on(Component::Stepper);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use megg_types::{Component, LinkMode, MeggError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::frame::{FINAL_CALIBRATION_STEP, LinkCommand, LinkReply};
use crate::link::{HardwareLink, SimSettings};

/// Simulated egg weights in grams.
const WEIGHT_RANGE: std::ops::Range<f64> = 45.0..75.0;

pub struct SimulatedLink {
    rng: StdRng,
    latency: Duration,
    good_rate: f64,
    /// Components whose calibration the fake board refuses.
    failing: BTreeSet<Component>,
    closed: bool,
}

impl SimulatedLink {
    pub fn new(settings: &SimSettings) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            rng,
            latency: settings.latency,
            good_rate: settings.good_rate.clamp(0.0, 1.0),
            failing: BTreeSet::new(),
            closed: false,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Make calibration of `component` fail with an `ERROR:` reply.
    pub fn failing_on(mut self, component: Component) -> Self {
        self.failing.insert(component);
        self
    }

    fn calibrate(&mut self, component: Component, step: u8) -> LinkReply {
        if self.failing.contains(&component) && step >= 2 {
            return LinkReply::Error(format!("{} not responding", component.hardware_code()));
        }
        if step >= FINAL_CALIBRATION_STEP {
            return LinkReply::CalibrationComplete {
                component,
                parameters: self.parameters(component),
            };
        }
        LinkReply::CalibrationStep {
            component,
            step,
            reading: Some(self.reading(component)),
        }
    }

    fn reading(&mut self, component: Component) -> f64 {
        let raw = match component {
            Component::Controller => self.rng.random_range(4.90..5.10),
            Component::LoadCell => self.rng.random_range(8000.0..9000.0),
            Component::Stepper => self.rng.random_range(1590.0..1610.0),
            Component::LoadingServo | Component::GrippingServo => {
                self.rng.random_range(0.0..180.0)
            }
        };
        round(raw, 2)
    }

    fn parameters(&mut self, component: Component) -> BTreeMap<String, f64> {
        let mut params = BTreeMap::new();
        match component {
            Component::Controller => {
                params.insert("vref".into(), round(self.rng.random_range(4.95..5.05), 3));
                params.insert("clock_mhz".into(), 16.0);
            }
            Component::LoadCell => {
                params.insert(
                    "zero_offset".into(),
                    round(self.rng.random_range(8000.0..9000.0), 1),
                );
                params.insert(
                    "scale_factor".into(),
                    round(self.rng.random_range(400.0..450.0), 2),
                );
                params.insert("reference_weight_g".into(), 100.0);
            }
            Component::Stepper => {
                params.insert("steps_per_rev".into(), 1600.0);
                params.insert(
                    "home_offset_mm".into(),
                    round(self.rng.random_range(0.0..2.0), 2),
                );
            }
            Component::LoadingServo => {
                params.insert("min_angle".into(), round(self.rng.random_range(0.0..5.0), 1));
                params.insert(
                    "max_angle".into(),
                    round(self.rng.random_range(175.0..180.0), 1),
                );
            }
            Component::GrippingServo => {
                params.insert(
                    "open_angle".into(),
                    round(self.rng.random_range(85.0..95.0), 1),
                );
                params.insert(
                    "grip_angle".into(),
                    round(self.rng.random_range(20.0..30.0), 1),
                );
            }
        }
        params
    }
}

fn round(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[async_trait]
impl HardwareLink for SimulatedLink {
    fn mode(&self) -> LinkMode {
        LinkMode::Simulated
    }

    fn port(&self) -> Option<&str> {
        None
    }

    async fn send(&mut self, command: &LinkCommand) -> Result<LinkReply, MeggError> {
        if self.closed {
            return Err(MeggError::LinkUnavailable("simulated link closed".into()));
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let reply = match *command {
            LinkCommand::Status => LinkReply::Status("READY:SIMULATED".into()),
            LinkCommand::Calibrate { component, step } => self.calibrate(component, step),
            LinkCommand::Home | LinkCommand::Start | LinkCommand::Stop => LinkReply::Ok(None),
            LinkCommand::Inspect => LinkReply::Egg {
                weight_g: round(self.rng.random_range(WEIGHT_RANGE), 1),
                good: self.rng.random_bool(self.good_rate),
            },
        };
        debug!(tx = %command.encode(), rx = %reply.encode(), "simulated round trip");
        Ok(reply)
    }

    fn disconnect(&mut self) {
        self.closed = true;
    }
}
