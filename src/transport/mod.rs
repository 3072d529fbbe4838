//! The `transport` module owns everything that touches the wire: the
//! envelope format shared by broker and client, and the broker's WebSocket
//! server that decodes frames and forwards them to the `Broker`.

pub mod message;
pub mod websocket;

pub use message::{ClientMessage, Envelope, EventKind, ServerMessage};
pub use websocket::{serve, start_websocket_server};
