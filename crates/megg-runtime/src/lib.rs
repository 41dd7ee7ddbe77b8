//! `megg-runtime` – the serialized execution context of the controller.
//!
//! - [`coordinator`] – [`Coordinator`]: owns the calibration and
//!   work-process machines plus the hardware link, routes commands and
//!   builds the [`SystemStatus`][megg_types::SystemStatus] snapshot.
//! - [`service`] – [`CoordinatorService`]: runs the coordinator on one task
//!   that interleaves client requests with the progress tick, and hands out
//!   [`CoordinatorHandle`]s.
//! - [`telemetry`] – [`init_tracing`]: `tracing` subscriber with optional
//!   OTLP export.

pub mod coordinator;
pub mod service;
pub mod telemetry;

pub use coordinator::{Coordinator, Dispatch};
pub use service::{CoordinatorHandle, CoordinatorService};
pub use telemetry::{TracerProviderGuard, init_tracing};
