//! Wire protocol
//!
//! Every frame is one JSON envelope `{"event": <kind>, "data": <payload>}`.
//! The WebSocket transport provides per-message framing, so no length prefix
//! is added. `sensor_connection_status` is used in both directions: as a
//! request it carries `{sensor_id}`, as a response `{sensor_id, connected}`.
//!
//! Decoding validates the payload against the event kind; a frame that fails
//! validation yields `Error::Protocol` and is dropped by the receiving loop.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ClientConnect,
    ClientDisconnect,
    SensorConnectionStatus,
    SubscribeSensor,
    UnsubscribeSensor,
    NewSensorData,
    Error,
}

/// Untyped envelope as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event: EventKind,
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SensorRef {
    sensor_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SensorStatus {
    sensor_id: String,
    connected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SensorData {
    sensor_id: String,
    sensor_readings: String,
}

/// Requests sent by a peer to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Connect,
    Disconnect,
    SensorStatus { sensor_id: String },
    Subscribe { sensor_id: String },
    Unsubscribe { sensor_id: String },
}

/// Responses and pushes sent by the broker to a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    SensorStatus { sensor_id: String, connected: bool },
    SensorData {
        sensor_id: String,
        sensor_readings: String,
    },
    Error { message: String },
}

impl Envelope {
    pub fn new(event: EventKind, data: Value) -> Self {
        Self { event, data }
    }

    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Protocol(format!("bad envelope: {e}")))
    }

    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn payload<T: for<'de> Deserialize<'de>>(self) -> Result<T> {
        let event = self.event;
        serde_json::from_value(self.data)
            .map_err(|e| Error::Protocol(format!("bad {event:?} payload: {e}")))
    }
}

fn to_data<T: Serialize>(payload: &T) -> Result<Value> {
    Ok(serde_json::to_value(payload)?)
}

impl ClientMessage {
    pub fn event(&self) -> EventKind {
        match self {
            ClientMessage::Connect => EventKind::ClientConnect,
            ClientMessage::Disconnect => EventKind::ClientDisconnect,
            ClientMessage::SensorStatus { .. } => EventKind::SensorConnectionStatus,
            ClientMessage::Subscribe { .. } => EventKind::SubscribeSensor,
            ClientMessage::Unsubscribe { .. } => EventKind::UnsubscribeSensor,
        }
    }

    pub fn encode(&self) -> Result<String> {
        let data = match self {
            // lifecycle events carry an empty string payload
            ClientMessage::Connect | ClientMessage::Disconnect => Value::String(String::new()),
            ClientMessage::SensorStatus { sensor_id }
            | ClientMessage::Subscribe { sensor_id }
            | ClientMessage::Unsubscribe { sensor_id } => to_data(&SensorRef {
                sensor_id: sensor_id.clone(),
            })?,
        };
        Envelope::new(self.event(), data).to_text()
    }

    pub fn decode(text: &str) -> Result<Self> {
        let envelope = Envelope::parse(text)?;
        match envelope.event {
            EventKind::ClientConnect => Ok(ClientMessage::Connect),
            EventKind::ClientDisconnect => Ok(ClientMessage::Disconnect),
            EventKind::SensorConnectionStatus => {
                let SensorRef { sensor_id } = envelope.payload()?;
                Ok(ClientMessage::SensorStatus { sensor_id })
            }
            EventKind::SubscribeSensor => {
                let SensorRef { sensor_id } = envelope.payload()?;
                Ok(ClientMessage::Subscribe { sensor_id })
            }
            EventKind::UnsubscribeSensor => {
                let SensorRef { sensor_id } = envelope.payload()?;
                Ok(ClientMessage::Unsubscribe { sensor_id })
            }
            other => Err(Error::Protocol(format!(
                "{other:?} is not a client request"
            ))),
        }
    }
}

impl ServerMessage {
    pub fn event(&self) -> EventKind {
        match self {
            ServerMessage::SensorStatus { .. } => EventKind::SensorConnectionStatus,
            ServerMessage::SensorData { .. } => EventKind::NewSensorData,
            ServerMessage::Error { .. } => EventKind::Error,
        }
    }

    pub fn encode(&self) -> Result<String> {
        let data = match self {
            ServerMessage::SensorStatus {
                sensor_id,
                connected,
            } => to_data(&SensorStatus {
                sensor_id: sensor_id.clone(),
                connected: *connected,
            })?,
            ServerMessage::SensorData {
                sensor_id,
                sensor_readings,
            } => to_data(&SensorData {
                sensor_id: sensor_id.clone(),
                sensor_readings: sensor_readings.clone(),
            })?,
            ServerMessage::Error { message } => Value::String(message.clone()),
        };
        Envelope::new(self.event(), data).to_text()
    }

    pub fn decode(text: &str) -> Result<Self> {
        let envelope = Envelope::parse(text)?;
        match envelope.event {
            EventKind::SensorConnectionStatus => {
                let SensorStatus {
                    sensor_id,
                    connected,
                } = envelope.payload()?;
                Ok(ServerMessage::SensorStatus {
                    sensor_id,
                    connected,
                })
            }
            EventKind::NewSensorData => {
                let SensorData {
                    sensor_id,
                    sensor_readings,
                } = envelope.payload()?;
                Ok(ServerMessage::SensorData {
                    sensor_id,
                    sensor_readings,
                })
            }
            EventKind::Error => {
                let message: String = envelope.payload()?;
                Ok(ServerMessage::Error { message })
            }
            other => Err(Error::Protocol(format!(
                "{other:?} is not a server event"
            ))),
        }
    }
}
