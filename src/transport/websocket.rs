//! WebSocket transport
//!
//! This file implements the broker's WebSocket server. Responsibilities:
//! - Accept TCP/WebSocket connections, up to `max_connections` at a time
//! - Create a `Peer` for each connection and register it with the `Broker`
//! - Forward queued events to the socket from a per-connection writer task
//! - Decode frames one at a time and hand them to the broker; malformed
//!   frames are logged and dropped
//! - Remove the peer, and with it every push task, when the socket closes

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::spawn;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::{Broker, Peer};
use crate::transport::message::ClientMessage;
use crate::utils::{Error, Result};

/// Bind `addr` and serve until the listener fails.
pub async fn start_websocket_server(addr: &str, broker: Arc<Broker>) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Transport(format!("cannot bind {addr}: {e}")))?;
    serve(listener, broker).await
}

/// Serve on an already bound listener.
pub async fn serve(listener: TcpListener, broker: Arc<Broker>) -> Result<()> {
    let local = listener
        .local_addr()
        .map_err(|e| Error::Transport(e.to_string()))?;
    info!("WebSocket server listening on ws://{local}");

    loop {
        let (stream, remote) = listener
            .accept()
            .await
            .map_err(|e| Error::Transport(format!("accept failed: {e}")))?;

        if broker.peer_count() >= broker.settings().max_connections {
            warn!("Refusing {remote}: connection limit reached");
            continue;
        }

        spawn(handle_connection(stream, remote, broker.clone()));
    }
}

async fn handle_connection(stream: TcpStream, remote: SocketAddr, broker: Arc<Broker>) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake error from {remote}: {e}");
            return;
        }
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let peer = Peer::new(tx);
    let peer_id = peer.id.clone();
    broker.register_peer(peer);
    info!("{peer_id} opened from {remote}");

    let cleanup_called = Arc::new(AtomicBool::new(false));

    let do_cleanup = {
        let broker = broker.clone();
        let peer_id = peer_id.clone();
        let cleanup_called = cleanup_called.clone();

        move || {
            if !cleanup_called.swap(true, Ordering::SeqCst) {
                broker.remove_peer(&peer_id);
            }
        }
    };

    {
        let peer_id = peer_id.clone();
        let do_cleanup = do_cleanup.clone();

        spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = ws_sender.send(msg).await {
                    debug!("Failed to send message to {peer_id}: {e}");
                    break;
                }
            }

            do_cleanup();
            debug!("Send loop closed for {peer_id}");
        });
    }

    while let Some(Ok(msg)) = ws_receiver.next().await {
        let text = match msg {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => break,
            _ => continue,
        };

        match ClientMessage::decode(text.as_str()) {
            Ok(request) => {
                if let Err(e) = broker.handle_message(&peer_id, request) {
                    debug!("Request from {peer_id} not executed: {e}");
                }
            }
            Err(err) => {
                warn!(
                    "Dropped frame from {peer_id}: {err} | {}",
                    text.chars().take(100).collect::<String>()
                );
            }
        }
    }

    do_cleanup();
    info!("{peer_id} closed");
}
