//! `megg-types` – shared vocabulary of the MEGG egg-sorting controller.
//!
//! Every other crate in the workspace speaks in these types:
//!
//! - [`component`] – the five fixed hardware [`Component`]s and their
//!   calibration state.
//! - [`work`] – [`WorkBatch`], [`WorkPhase`] and the running [`BatchStats`].
//! - [`status`] – the derived [`SystemStatus`] snapshot.
//! - [`message`] – the `{type, payload}` wire envelope: inbound [`Command`]s
//!   and outbound [`Outbound`] messages wrapped in an [`Event`].
//! - [`error`] – [`MeggError`] and the stable reason [`codes`].

pub mod component;
pub mod error;
pub mod message;
pub mod status;
pub mod work;

pub use component::{CalibrationStatus, Component, ComponentState};
pub use error::{MeggError, codes};
pub use message::{
    CalibrationUpdate, Command, ComponentInfo, ConnectionInfo, ErrorPayload, Event, Outbound,
    WorkAction, WorkProcessUpdate,
};
pub use status::{CalibrationProgress, LinkMode, LinkStatus, SystemStatus, WorkProcessStatus};
pub use work::{BatchStats, EggQuality, EggSize, WorkBatch, WorkPhase};
