//! Connection handle
//!
//! `Peer` is the broker's view of one physical connection: an opaque id and
//! the sending side of the channel drained by the connection's writer task.
//! The `connected` flag starts `false` and is flipped by `client_connect` /
//! `client_disconnect`.

use tokio::sync::mpsc::UnboundedSender;
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::registry::ConnectionId;
use crate::transport::message::ServerMessage;
use crate::utils::{Error, Result};

#[derive(Debug)]
pub struct Peer {
    pub id: ConnectionId,
    pub sender: UnboundedSender<WsMessage>,
    pub connected: bool,
}

impl Peer {
    /// Create a peer with a fresh UUID. Ids are never reused.
    pub fn new(sender: UnboundedSender<WsMessage>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender,
            connected: false,
        }
    }

    /// Queue an event for the writer task. Fails with `TransportClosed` once
    /// the writer has gone away.
    pub fn send(&self, msg: &ServerMessage) -> Result<()> {
        let text = msg.encode()?;
        self.sender
            .send(WsMessage::text(text))
            .map_err(|_| Error::TransportClosed)
    }
}
