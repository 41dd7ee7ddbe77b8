//! `megg-kernel` – the calibration and work-process state machines.
//!
//! Both machines are plain synchronous state owned by a single caller. They
//! never perform I/O: each exposes the hardware round trip it needs next and
//! consumes the outcome, returning the updates to broadcast.
//!
//! - [`calibration::CalibrationMachine`] – per-component progression from
//!   `idle` to `complete`, one session at a time.
//! - [`work_process::WorkProcessMachine`] – batch workflow gated on every
//!   component being calibrated.
//! - [`messages::MessageTable`] – the injectable per-component step messages.
//! - [`grading::GradeRules`] – egg size thresholds.

pub mod calibration;
pub mod grading;
pub mod messages;
pub mod work_process;

pub use calibration::CalibrationMachine;
pub use grading::GradeRules;
pub use messages::MessageTable;
pub use work_process::{WorkConfig, WorkProcessMachine};
