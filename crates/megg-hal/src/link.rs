//! The [`HardwareLink`] capability and its connection settings.
//!
//! Two drivers implement the trait: [`RealLink`][crate::serial::RealLink]
//! talks to the controller board over a serial port, and
//! [`SimulatedLink`][crate::sim::SimulatedLink] fabricates plausible replies.
//! Higher layers only ever hold a [`Link`][crate::supervisor::Link], which
//! owns one of the two and swaps them on failure.

use std::time::Duration;

use async_trait::async_trait;
use megg_types::{LinkMode, MeggError};

use crate::discovery::{Platform, default_port};
use crate::frame::{LinkCommand, LinkReply};

/// A request/response channel to the controller board.
#[async_trait]
pub trait HardwareLink: Send {
    fn mode(&self) -> LinkMode;

    /// Serial port in use, if any.
    fn port(&self) -> Option<&str>;

    /// Write one framed command and wait (bounded) for its reply.
    ///
    /// # Errors
    ///
    /// Transport failures surface as [`MeggError::LinkTimeout`],
    /// [`MeggError::LinkIo`] or [`MeggError::LinkUnavailable`]. An `ERROR:`
    /// line from the board is a successful round trip and is returned as
    /// [`LinkReply::Error`].
    async fn send(&mut self, command: &LinkCommand) -> Result<LinkReply, MeggError>;

    /// Release the underlying handle. Calling it twice is harmless.
    fn disconnect(&mut self);
}

/// Parameters of the simulated driver.
#[derive(Debug, Clone)]
pub struct SimSettings {
    /// Delay injected before every reply.
    pub latency: Duration,
    /// Fixed RNG seed for reproducible runs.
    pub seed: Option<u64>,
    /// Probability that an inspected egg is graded GOOD.
    pub good_rate: f64,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(50),
            seed: None,
            good_rate: 0.95,
        }
    }
}

/// Everything needed to open the link.
#[derive(Debug, Clone)]
pub struct LinkSettings {
    /// Preferred port, tried before the fallback list.
    pub port: String,
    pub baud_rate: u32,
    /// Per round-trip read/write bound.
    pub timeout: Duration,
    /// Wait after opening a port while the board resets.
    pub settle: Duration,
    pub fallback_ports: Vec<String>,
    /// Skip port probing and start simulated.
    pub force_simulation: bool,
    pub sim: SimSettings,
}

impl LinkSettings {
    pub fn for_platform(platform: Platform) -> Self {
        Self {
            port: default_port(platform).to_string(),
            baud_rate: 9600,
            timeout: Duration::from_secs(1),
            settle: Duration::from_secs(2),
            fallback_ports: platform
                .fallback_ports()
                .iter()
                .map(|p| p.to_string())
                .collect(),
            force_simulation: false,
            sim: SimSettings::default(),
        }
    }
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self::for_platform(Platform::detect())
    }
}
