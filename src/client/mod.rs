//! The `client` module is the peer side of the protocol.
//!
//! It provides `Client`, which keeps a session with the broker, answers
//! blocking status queries and dispatches pushed sensor data to registered
//! callbacks, plus the `Connector` seam it uses to open transports.

pub mod callbacks;
pub mod connection;
pub mod pubsub_client;

pub use connection::{Connector, FrameSink, FrameStream, WsConnector};
pub use pubsub_client::{Client, ConnectionState};
