//! Broker engine
//!
//! This module contains the broker state machine responsible for:
//! - tracking the `connected` flag of every connection
//! - answering sensor status queries through a `StatusSource`
//! - running one push task per (connection, sensor) subscription
//! - cleaning up a connection's subscriptions when it disconnects or closes
//!
//! Concurrency and usage notes:
//! - The broker is shared as `Arc<Broker>`. All state sits behind internal
//!   locks that are never held across an `.await`, so the transport and the
//!   push tasks can call into it from any task.
//! - Requests from one connection are handled in order by that connection's
//!   reader; requests from different connections run concurrently.
//! - A peer whose flag is `false` never receives a status response or a
//!   `new_sensor_data` push. Requests it sends are answered with an `error`
//!   event instead.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::broker::peer::Peer;
use crate::broker::source::{DataSource, SimulatedSensors, StatusSource};
use crate::config::BrokerSettings;
use crate::registry::{ConnectionId, SubscriptionRegistry};
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::utils::{Error, Result};

pub const NOT_CONNECTED_MESSAGE: &str = "Client is not connected";

type PushKey = (ConnectionId, String);

pub struct Broker {
    peers: Mutex<HashMap<ConnectionId, Peer>>,
    subscriptions: SubscriptionRegistry,
    push_tasks: Mutex<HashMap<PushKey, AbortHandle>>,
    status: Arc<dyn StatusSource>,
    data: Arc<dyn DataSource>,
    settings: BrokerSettings,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("peers", &self.peer_count())
            .field("subscriptions", &self.subscriptions.len())
            .field("settings", &self.settings)
            .finish()
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerSettings::default())
    }
}

impl Broker {
    pub fn new(settings: BrokerSettings) -> Self {
        Self::with_sources(
            settings,
            Arc::new(SimulatedSensors),
            Arc::new(SimulatedSensors),
        )
    }

    pub fn with_sources(
        settings: BrokerSettings,
        status: Arc<dyn StatusSource>,
        data: Arc<dyn DataSource>,
    ) -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
            subscriptions: SubscriptionRegistry::new(),
            push_tasks: Mutex::new(HashMap::new()),
            status,
            data,
            settings,
        }
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    pub fn register_peer(&self, peer: Peer) {
        debug!("Registered connection {}", peer.id);
        self.peers.lock().unwrap().insert(peer.id.clone(), peer);
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub fn is_connected(&self, id: &str) -> bool {
        self.peers
            .lock()
            .unwrap()
            .get(id)
            .is_some_and(|peer| peer.connected)
    }

    /// Number of push tasks still running.
    pub fn push_task_count(&self) -> usize {
        self.push_tasks
            .lock()
            .unwrap()
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Handle one request from connection `id`.
    ///
    /// Returns `PermissionDenied` after answering with an `error` event when
    /// the connection has not sent `client_connect`.
    pub fn handle_message(self: &Arc<Self>, id: &str, msg: ClientMessage) -> Result<()> {
        match msg {
            ClientMessage::Connect => {
                self.set_connected(id, true)?;
                info!("{id} connected");
                Ok(())
            }
            ClientMessage::Disconnect => {
                self.set_connected(id, false)?;
                self.cancel_subscriptions(id);
                info!("{id} disconnected");
                Ok(())
            }
            ClientMessage::SensorStatus { sensor_id } => {
                self.require_connected(id)?;
                let connected = self.status.is_connected(&sensor_id);
                debug!("{id} queried {sensor_id}: connected={connected}");
                self.send_to_connected(
                    id,
                    &ServerMessage::SensorStatus {
                        sensor_id,
                        connected,
                    },
                )
            }
            ClientMessage::Subscribe { sensor_id } => {
                self.require_connected(id)?;
                if self.subscriptions.add(id, &sensor_id) {
                    self.spawn_push_task(id, &sensor_id);
                    info!("{id} subscribed to {sensor_id}");
                } else {
                    debug!("{id} already subscribed to {sensor_id}");
                }
                Ok(())
            }
            ClientMessage::Unsubscribe { sensor_id } => {
                self.require_connected(id)?;
                self.subscriptions.remove(id, &sensor_id);
                self.abort_push_task(id, &sensor_id);
                info!("{id} unsubscribed from {sensor_id}");
                Ok(())
            }
        }
    }

    /// Forget a closed connection and stop all of its push tasks.
    pub fn remove_peer(&self, id: &str) {
        self.peers.lock().unwrap().remove(id);
        self.cancel_subscriptions(id);
        info!("Cleaned up connection {id}");
    }

    fn set_connected(&self, id: &str, connected: bool) -> Result<()> {
        let mut peers = self.peers.lock().unwrap();
        let peer = peers
            .get_mut(id)
            .ok_or_else(|| Error::InvalidState(format!("unknown connection {id}")))?;
        peer.connected = connected;
        Ok(())
    }

    fn require_connected(&self, id: &str) -> Result<()> {
        let peers = self.peers.lock().unwrap();
        let peer = peers
            .get(id)
            .ok_or_else(|| Error::InvalidState(format!("unknown connection {id}")))?;
        if peer.connected {
            return Ok(());
        }

        warn!("Rejected request from {id}: not connected");
        let rejection = ServerMessage::Error {
            message: NOT_CONNECTED_MESSAGE.to_string(),
        };
        if let Err(e) = peer.send(&rejection) {
            debug!("Could not deliver rejection to {id}: {e}");
        }
        Err(Error::PermissionDenied(NOT_CONNECTED_MESSAGE.to_string()))
    }

    /// Checks the flag and queues the event under the same lock, so nothing
    /// reaches a peer that has just disconnected.
    fn send_to_connected(&self, id: &str, msg: &ServerMessage) -> Result<()> {
        let peers = self.peers.lock().unwrap();
        match peers.get(id) {
            Some(peer) if peer.connected => peer.send(msg),
            Some(_) => Err(Error::PermissionDenied(NOT_CONNECTED_MESSAGE.to_string())),
            None => Err(Error::TransportClosed),
        }
    }

    fn cancel_subscriptions(&self, id: &str) {
        for sensor_id in self.subscriptions.remove_all(id) {
            self.abort_push_task(id, &sensor_id);
            debug!("Unsubscribed {id} from {sensor_id}");
        }
    }

    fn spawn_push_task(self: &Arc<Self>, id: &str, sensor_id: &str) {
        let handle = tokio::spawn(push_loop(
            self.clone(),
            id.to_string(),
            sensor_id.to_string(),
        ));

        let mut tasks = self.push_tasks.lock().unwrap();
        tasks.retain(|_, task| !task.is_finished());
        tasks.insert((id.to_string(), sensor_id.to_string()), handle.abort_handle());
    }

    fn abort_push_task(&self, id: &str, sensor_id: &str) {
        let key = (id.to_string(), sensor_id.to_string());
        if let Some(handle) = self.push_tasks.lock().unwrap().remove(&key) {
            handle.abort();
        }
    }

    fn push_interval(&self) -> Duration {
        let min = self.settings.push_interval_min_ms;
        let max = self.settings.push_interval_max_ms;
        let millis = if max > min {
            rand::rng().random_range(min..=max)
        } else {
            min
        };
        Duration::from_millis(millis)
    }
}

/// Delivers `new_sensor_data` for one subscription until the entry disappears
/// from the registry or the connection can no longer be written to.
async fn push_loop(broker: Arc<Broker>, id: ConnectionId, sensor_id: String) {
    loop {
        if !broker.subscriptions.contains(&id, &sensor_id) {
            break;
        }

        let msg = ServerMessage::SensorData {
            sensor_id: sensor_id.clone(),
            sensor_readings: broker.data.readings(&sensor_id),
        };
        if let Err(e) = broker.send_to_connected(&id, &msg) {
            debug!("Push of {sensor_id} to {id} stopped: {e}");
            broker.subscriptions.remove(&id, &sensor_id);
            break;
        }

        tokio::time::sleep(broker.push_interval()).await;
    }
    debug!("Push task for {sensor_id} on {id} finished");
}
