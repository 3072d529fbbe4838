//! # SensorSub
//!
//! `sensorsub` is a small publish/subscribe protocol over WebSockets. A broker
//! tracks which peers have announced themselves as connected and pushes
//! periodic sensor readings to every peer subscribed to a sensor; a peer
//! client keeps a session with the broker, queries sensor status and hands
//! pushed readings to registered callbacks.
//!
//! ## Core Modules
//!
//! - `transport`: the `{event, data}` envelope and the broker's WebSocket server.
//! - `registry`: subscription bookkeeping for both sides.
//! - `broker`: connection flags, request handling and per-subscription push tasks.
//! - `client`: the peer client with reconnection and callback dispatch.
//! - `config`: loading settings from files and the environment.
//! - `utils`: the error type and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod registry;
pub mod transport;
pub mod utils;

pub use broker::Broker;
pub use client::Client;
pub use utils::{Error, Result};
