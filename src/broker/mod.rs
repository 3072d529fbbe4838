//! The broker crate module contains the authoritative side of the protocol:
//! connection flags, status queries and the per-subscription push tasks.
//!
//! Public types:
//! - `Broker`: the engine the WebSocket server hands every decoded request to.
//! - `Peer`: one physical connection as the broker sees it.
//! - `StatusSource` / `DataSource`: pluggable providers for status answers
//!   and pushed readings.

pub mod engine;
pub mod peer;
pub mod source;

pub use engine::Broker;
pub use peer::Peer;
pub use source::{DataSource, SimulatedSensors, StatusSource};

#[cfg(test)]
mod tests;
