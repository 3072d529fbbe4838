//! The `error` module defines the error type shared by the broker, the peer
//! client and the transport layer.
//!
//! Transient transport failures (`TransportClosed`) are retried internally by
//! the client send path; everything else is surfaced to the caller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Operation attempted after `disconnect()`, or a send without a session.
    #[error("client is not connected")]
    NotConnected,

    /// Operation ordering violation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Malformed envelope or payload.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The transport reports the connection closed.
    #[error("transport closed")]
    TransportClosed,

    /// Non-retryable transport failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The broker rejected a request from a peer that is not connected.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the client send path should re-establish the transport and retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::TransportClosed)
    }
}

impl From<tungstenite::Error> for Error {
    fn from(err: tungstenite::Error) -> Self {
        use tungstenite::error::ProtocolError;

        match err {
            tungstenite::Error::ConnectionClosed
            | tungstenite::Error::AlreadyClosed
            | tungstenite::Error::Io(_)
            | tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake)
            | tungstenite::Error::Protocol(ProtocolError::SendAfterClosing) => {
                Error::TransportClosed
            }
            other => Error::Transport(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
