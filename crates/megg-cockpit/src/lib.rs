//! `megg-cockpit` – the Connection Hub.
//!
//! Boots an HTTP + WebSocket server (default port `8765`) that:
//!
//! 1. **Greets** every new WebSocket client with a `connection` message and
//!    the current `status` snapshot.
//! 2. **Forwards** inbound `{type, payload}` commands to the coordinator and
//!    returns its direct replies (`pong`, `status`, `error`) to that client
//!    only.
//! 3. **Broadcasts** every coordinator event to all clients in order. A
//!    client that stalls or disconnects is dropped without affecting the
//!    others.
//! 4. **Answers** plain HTTP requests with a JSON health document.

pub mod client;
pub mod server;

pub use client::handle_inbound;
pub use server::{ConnectionHub, DEFAULT_PORT, HubConfig};
