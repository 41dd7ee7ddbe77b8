//! `megg-middleware` – in-process fan-out of outbound events.
//!
//! The coordinator publishes every [`Event`][megg_types::Event] it generates
//! on the [`EventBus`]; each connected client holds its own
//! [`Subscription`].

pub mod bus;

pub use bus::{EventBus, Subscription};
