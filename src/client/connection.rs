//! Client transport seam
//!
//! The peer client only needs a duplex, message-framed connection: a sink of
//! text frames and a stream of inbound text frames that ends (or yields
//! `TransportClosed`) when the connection goes away. `Connector` opens such
//! a pair; `WsConnector` does it over WebSocket.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt, future};
use tokio_tungstenite::connect_async;
use tracing::debug;
use tungstenite::protocol::Message as WsMessage;

use crate::utils::{Error, Result};

pub type FrameSink = Pin<Box<dyn Sink<String, Error = Error> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new physical connection.
    async fn connect(&self) -> Result<(FrameSink, FrameStream)>;
}

#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn from_host_port(host: &str, port: u16) -> Self {
        Self::new(format!("ws://{host}:{port}"))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<(FrameSink, FrameStream)> {
        let (ws_stream, _response) = connect_async(self.url.as_str()).await?;
        debug!("Opened WebSocket to {}", self.url);
        let (ws_sender, ws_receiver) = ws_stream.split();

        let sink = ws_sender
            .sink_map_err(Error::from)
            .with(|text: String| future::ok::<_, Error>(WsMessage::text(text)));

        let stream = ws_receiver.filter_map(|msg| {
            future::ready(match msg {
                Ok(WsMessage::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(WsMessage::Close(_)) => Some(Err(Error::TransportClosed)),
                Ok(_) => None,
                Err(e) => Some(Err(Error::from(e))),
            })
        });

        let sink: FrameSink = Box::pin(sink);
        let stream: FrameStream = Box::pin(stream);
        Ok((sink, stream))
    }
}
