//! `megg-hal` – Hardware Abstraction Layer for the MEGG controller board.
//!
//! The board is reached over a line-oriented serial protocol ([`frame`]).
//! Two [`HardwareLink`] drivers speak it:
//!
//! - [`RealLink`] – a physical serial port opened through `serialport`.
//! - [`SimulatedLink`] – plausible fabricated replies, used when no board is
//!   attached or after the real link is lost.
//!
//! Owners hold a [`Link`], which picks the driver at start-up through port
//! [`discovery`] and swaps to simulation when the board stops answering.

pub mod discovery;
pub mod frame;
pub mod link;
pub mod serial;
pub mod sim;
pub mod supervisor;

pub use discovery::Platform;
pub use frame::{FINAL_CALIBRATION_STEP, LinkCommand, LinkReply};
pub use link::{HardwareLink, LinkSettings, SimSettings};
pub use serial::RealLink;
pub use sim::SimulatedLink;
pub use supervisor::{Connector, Link, SerialConnector};
