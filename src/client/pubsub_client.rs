//! Peer client
//!
//! `Client` keeps one logical session with the broker over a `Connector`.
//! Lifecycle: `Idle -> Connecting -> Connected -> Disconnected`; a
//! disconnected client may `connect()` again.
//!
//! Sending owns the transport exclusively for the duration of one attempt.
//! When the transport reports the connection closed, the client opens a new
//! one, replays `client_connect` plus its active subscriptions (the broker
//! sees a brand new, not-yet-connected peer), and retries the frame. Attempts
//! are bounded and backed off exponentially per `ClientSettings`; running out
//! yields `ConnectionLost`.
//!
//! A background receive loop per transport resolves status queries and runs
//! callbacks. Status queries wait on a oneshot keyed by sensor id, so only
//! one query per sensor may be outstanding at a time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::callbacks::{self, CallbackRegistry};
use crate::client::connection::{Connector, FrameSink, FrameStream, WsConnector};
use crate::config::ClientSettings;
use crate::registry::SubscriptionFlags;
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::utils::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

type StatusReply = oneshot::Sender<Result<bool>>;

/// State shared between the caller-facing `Client` and its receive loop.
#[derive(Debug)]
struct Shared {
    state: Mutex<ConnectionState>,
    callbacks: Mutex<CallbackRegistry>,
    subscriptions: Mutex<SubscriptionFlags>,
    pending: Mutex<HashMap<String, StatusReply>>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = state;
    }

    fn dispatch(&self, text: &str) {
        let msg = match ServerMessage::decode(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(
                    "Dropped frame: {e} | {}",
                    text.chars().take(100).collect::<String>()
                );
                return;
            }
        };

        match msg {
            ServerMessage::SensorStatus {
                sensor_id,
                connected,
            } => {
                let waiter = self.pending.lock().unwrap().remove(&sensor_id);
                match waiter {
                    Some(reply) => {
                        let _ = reply.send(Ok(connected));
                    }
                    None => debug!("Unsolicited status for {sensor_id}"),
                }
            }
            ServerMessage::SensorData {
                sensor_id,
                sensor_readings,
            } => {
                let handlers = self.callbacks.lock().unwrap().handlers(&sensor_id);
                if handlers.is_empty() {
                    debug!("No callbacks for {sensor_id}, dropping data");
                }
                callbacks::dispatch(&handlers, &sensor_id, &sensor_readings);
            }
            ServerMessage::Error { message } => {
                warn!("Broker rejected a request: {message}");
                self.fail_pending(|| Error::PermissionDenied(message.clone()));
            }
        }
    }

    fn fail_pending(&self, make_error: impl Fn() -> Error) {
        let waiters: Vec<StatusReply> = self
            .pending
            .lock()
            .unwrap()
            .drain()
            .map(|(_, reply)| reply)
            .collect();
        for reply in waiters {
            let _ = reply.send(Err(make_error()));
        }
    }

    /// Drops the waiter for `sensor_id` if its caller has gone away.
    fn forget_query(&self, sensor_id: &str) {
        let mut pending = self.pending.lock().unwrap();
        if pending.get(sensor_id).is_some_and(|reply| reply.is_closed()) {
            pending.remove(sensor_id);
        }
    }
}

/// One physical connection: the write half plus the task draining the read half.
struct Link {
    sink: FrameSink,
    receiver: JoinHandle<()>,
    closed: Arc<AtomicBool>,
}

impl Link {
    async fn shutdown(mut self) {
        let _ = self.sink.close().await;
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}

pub struct Client {
    connector: Arc<dyn Connector>,
    settings: ClientSettings,
    link: tokio::sync::Mutex<Option<Link>>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .field("settings", &self.settings)
            .finish()
    }
}

impl Client {
    /// Client for the broker at `ws://host:port` with default settings.
    pub fn new(host: &str, port: u16) -> Self {
        Self::with_connector(
            Arc::new(WsConnector::from_host_port(host, port)),
            ClientSettings::default(),
        )
    }

    pub fn with_connector(connector: Arc<dyn Connector>, settings: ClientSettings) -> Self {
        Self {
            connector,
            settings,
            link: tokio::sync::Mutex::new(None),
            shared: Arc::new(Shared {
                state: Mutex::new(ConnectionState::Idle),
                callbacks: Mutex::new(CallbackRegistry::default()),
                subscriptions: Mutex::new(SubscriptionFlags::default()),
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_subscribed(&self, sensor_id: &str) -> bool {
        self.shared.subscriptions.lock().unwrap().contains(sensor_id)
    }

    pub fn callback_count(&self, sensor_id: &str) -> usize {
        self.shared.callbacks.lock().unwrap().count(sensor_id)
    }

    /// Open the transport, announce the session and start the receive loop.
    ///
    /// Channels that still have callbacks from an earlier session are
    /// subscribed again. A failed re-subscribe is logged and leaves the
    /// session connected with that channel unsubscribed; `is_subscribed`
    /// reports which ones made it.
    pub async fn connect(&self) -> Result<()> {
        let previous = {
            let mut state = self.shared.state.lock().unwrap();
            let previous = *state;
            match previous {
                ConnectionState::Connecting | ConnectionState::Connected => {
                    return Err(Error::InvalidState("already connected".to_string()));
                }
                ConnectionState::Idle | ConnectionState::Disconnected => {
                    *state = ConnectionState::Connecting;
                }
            }
            previous
        };

        if let Err(e) = self.send(&ClientMessage::Connect).await {
            self.shared.set_state(previous);
            return Err(e);
        }
        self.shared.set_state(ConnectionState::Connected);
        info!("Connected to broker");

        let channels = self.shared.callbacks.lock().unwrap().channels();
        for sensor_id in channels {
            if let Err(e) = self.subscribe(&sensor_id).await {
                warn!("Could not re-subscribe to {sensor_id}: {e}");
            }
        }
        Ok(())
    }

    /// End the session. A no-op unless connected.
    pub async fn disconnect(&self) -> Result<()> {
        if self.state() != ConnectionState::Connected {
            return Ok(());
        }

        let sent = self.send(&ClientMessage::Disconnect).await;
        self.shared.set_state(ConnectionState::Disconnected);
        self.shared.subscriptions.lock().unwrap().clear();

        let link = self.link.lock().await.take();
        if let Some(link) = link {
            link.shutdown().await;
        }
        self.shared.fail_pending(|| Error::NotConnected);
        info!("Disconnected from broker");
        sent
    }

    /// Ask the broker whether `sensor_id` is present, waiting at most the
    /// configured query timeout.
    pub async fn sensor_connected(&self, sensor_id: &str) -> Result<bool> {
        self.sensor_connected_within(sensor_id, self.settings.query_timeout())
            .await
    }

    pub async fn sensor_connected_within(&self, sensor_id: &str, timeout: Duration) -> Result<bool> {
        self.check_session()?;

        let (reply, response) = oneshot::channel();
        {
            let mut pending = self.shared.pending.lock().unwrap();
            if pending.get(sensor_id).is_some_and(|other| !other.is_closed()) {
                return Err(Error::InvalidState(format!(
                    "status query for {sensor_id} already pending"
                )));
            }
            pending.insert(sensor_id.to_string(), reply);
        }

        let request = ClientMessage::SensorStatus {
            sensor_id: sensor_id.to_string(),
        };
        if let Err(e) = self.send(&request).await {
            drop(response);
            self.shared.forget_query(sensor_id);
            return Err(e);
        }

        let outcome = tokio::time::timeout(timeout, response).await;
        match outcome {
            Ok(Ok(answer)) => answer,
            Ok(Err(_)) => Err(Error::ConnectionLost(format!(
                "status query for {sensor_id} abandoned"
            ))),
            Err(_) => {
                self.shared.forget_query(sensor_id);
                Err(Error::Timeout(format!("status of sensor {sensor_id}")))
            }
        }
    }

    /// Ask the broker to start pushing `sensor_id`.
    pub async fn subscribe(&self, sensor_id: &str) -> Result<()> {
        self.check_session()?;
        self.send(&ClientMessage::Subscribe {
            sensor_id: sensor_id.to_string(),
        })
        .await?;
        self.shared.subscriptions.lock().unwrap().add(sensor_id);
        Ok(())
    }

    pub async fn unsubscribe(&self, sensor_id: &str) -> Result<()> {
        self.check_session()?;
        self.send(&ClientMessage::Unsubscribe {
            sensor_id: sensor_id.to_string(),
        })
        .await?;
        self.shared.subscriptions.lock().unwrap().remove(sensor_id);
        Ok(())
    }

    /// Register `handler` to be called as `handler(sensor_id, readings, &args)`
    /// for every push on `sensor_id`, subscribing first if needed.
    /// If that subscribe fails the handler is not kept.
    ///
    /// Handlers run on the receive loop and must return promptly.
    pub async fn register_callback<F, A>(&self, sensor_id: &str, handler: F, args: A) -> Result<()>
    where
        F: Fn(&str, &str, &A) + Send + Sync + 'static,
        A: Send + Sync + 'static,
    {
        self.check_session()?;
        self.shared
            .callbacks
            .lock()
            .unwrap()
            .register(sensor_id, handler, args);

        if !self.is_subscribed(sensor_id) {
            if let Err(e) = self.subscribe(sensor_id).await {
                self.shared.callbacks.lock().unwrap().pop(sensor_id);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Remove every callback for `sensor_id` and unsubscribe from it.
    pub async fn remove_callback(&self, sensor_id: &str) -> Result<()> {
        self.check_session()?;
        let removed = self.shared.callbacks.lock().unwrap().remove(sensor_id);
        debug!("Removed {removed} callbacks for {sensor_id}");

        if self.state() == ConnectionState::Connected && self.is_subscribed(sensor_id) {
            self.unsubscribe(sensor_id).await?;
        }
        Ok(())
    }

    fn check_session(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Idle => Err(Error::InvalidState(
                "connect() has not been called".to_string(),
            )),
            ConnectionState::Connecting => {
                Err(Error::InvalidState("connection in progress".to_string()))
            }
            ConnectionState::Disconnected => Err(Error::NotConnected),
        }
    }

    async fn send(&self, msg: &ClientMessage) -> Result<()> {
        if !matches!(
            self.state(),
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return Err(Error::NotConnected);
        }
        let frame = msg.encode()?;

        let mut link = self.link.lock().await;
        if let Some(active) = link.as_mut() {
            if !active.closed.load(Ordering::SeqCst) {
                match active.sink.send(frame.clone()).await {
                    Ok(()) => return Ok(()),
                    Err(e) if e.is_retryable() => {
                        warn!("Sending {:?} failed: {e}; reconnecting", msg.event());
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        self.reconnect_and_send(&mut link, frame).await
    }

    async fn reconnect_and_send(&self, link: &mut Option<Link>, frame: String) -> Result<()> {
        let max_attempts = self.settings.max_reconnect_attempts.max(1);
        let mut last_error = Error::TransportClosed;

        for attempt in 1..=max_attempts {
            if let Some(stale) = link.take() {
                stale.shutdown().await;
            }

            match self.open_link().await {
                Ok(mut fresh) => match self.replay_session(&mut fresh, &frame).await {
                    Ok(()) => {
                        *link = Some(fresh);
                        debug!("Transport established on attempt {attempt}");
                        return Ok(());
                    }
                    Err(e) if e.is_retryable() => last_error = e,
                    Err(e) => return Err(e),
                },
                Err(e) if e.is_retryable() => last_error = e,
                Err(e) => return Err(e),
            }

            warn!("Connection attempt {attempt}/{max_attempts} failed: {last_error}");
            if attempt < max_attempts {
                tokio::time::sleep(self.settings.backoff_for_attempt(attempt)).await;
            }
        }

        Err(Error::ConnectionLost(format!(
            "gave up after {max_attempts} attempts: {last_error}"
        )))
    }

    async fn open_link(&self) -> Result<Link> {
        let (sink, stream) = self.connector.connect().await?;
        let closed = Arc::new(AtomicBool::new(false));
        let receiver = tokio::spawn(receive_loop(self.shared.clone(), stream, closed.clone()));
        Ok(Link {
            sink,
            receiver,
            closed,
        })
    }

    /// A new transport is a new, unconnected peer to the broker: re-announce
    /// the session and its subscriptions before sending `frame`.
    async fn replay_session(&self, link: &mut Link, frame: &str) -> Result<()> {
        let mut frames = Vec::new();
        if self.state() == ConnectionState::Connected {
            frames.push(ClientMessage::Connect.encode()?);
            let active = self.shared.subscriptions.lock().unwrap().active();
            for sensor_id in active {
                frames.push(ClientMessage::Subscribe { sensor_id }.encode()?);
            }
        }
        frames.push(frame.to_string());

        for frame in frames {
            link.sink.send(frame).await?;
        }
        Ok(())
    }
}

async fn receive_loop(shared: Arc<Shared>, mut stream: FrameStream, closed: Arc<AtomicBool>) {
    let reason = loop {
        match stream.next().await {
            Some(Ok(text)) => shared.dispatch(&text),
            Some(Err(e)) => break e.to_string(),
            None => break "stream ended".to_string(),
        }
    };
    closed.store(true, Ordering::SeqCst);

    if shared.state() == ConnectionState::Connected {
        warn!("Connection to broker lost: {reason}");
        shared.fail_pending(|| Error::ConnectionLost(reason.clone()));
    } else {
        debug!("Receive loop stopped: {reason}");
    }
}
