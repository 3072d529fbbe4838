use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tungstenite::protocol::Message as WsMessage;

use super::engine::NOT_CONNECTED_MESSAGE;
use super::{Broker, Peer};
use crate::config::BrokerSettings;
use crate::registry::ConnectionId;
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::utils::Error;

const PUSH_MS: u64 = 20;

fn test_broker() -> Arc<Broker> {
    let settings = BrokerSettings {
        max_connections: 10,
        push_interval_min_ms: PUSH_MS,
        push_interval_max_ms: PUSH_MS,
    };
    Arc::new(Broker::with_sources(
        settings,
        Arc::new(|_: &str| true),
        Arc::new(|sensor_id: &str| format!("reading-{sensor_id}")),
    ))
}

fn add_peer(broker: &Broker) -> (ConnectionId, UnboundedReceiver<WsMessage>) {
    let (tx, rx) = mpsc::unbounded_channel::<WsMessage>();
    let peer = Peer::new(tx);
    let id = peer.id.clone();
    broker.register_peer(peer);
    (id, rx)
}

fn connected_peer(broker: &Arc<Broker>) -> (ConnectionId, UnboundedReceiver<WsMessage>) {
    let (id, rx) = add_peer(broker);
    broker.handle_message(&id, ClientMessage::Connect).unwrap();
    (id, rx)
}

fn decode(msg: WsMessage) -> ServerMessage {
    match msg {
        WsMessage::Text(text) => ServerMessage::decode(text.as_str()).unwrap(),
        other => panic!("Expected a text message, got {other:?}"),
    }
}

fn drain(rx: &mut UnboundedReceiver<WsMessage>) -> Vec<ServerMessage> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(decode(msg));
    }
    out
}

fn subscribe(sensor_id: &str) -> ClientMessage {
    ClientMessage::Subscribe {
        sensor_id: sensor_id.to_string(),
    }
}

#[test]
fn test_peer_new() {
    let (tx, _) = mpsc::unbounded_channel::<WsMessage>();
    let a = Peer::new(tx.clone());
    let b = Peer::new(tx);
    assert!(!a.id.is_empty());
    assert_ne!(a.id, b.id);
    assert!(!a.connected);
}

#[tokio::test]
async fn test_connect_and_disconnect_flip_flag() {
    let broker = test_broker();
    let (id, _rx) = add_peer(&broker);
    assert!(!broker.is_connected(&id));

    broker.handle_message(&id, ClientMessage::Connect).unwrap();
    assert!(broker.is_connected(&id));

    broker.handle_message(&id, ClientMessage::Disconnect).unwrap();
    assert!(!broker.is_connected(&id));
}

#[tokio::test]
async fn test_unknown_connection_is_invalid_state() {
    let broker = test_broker();
    let result = broker.handle_message("ghost", ClientMessage::Connect);
    assert!(matches!(result, Err(Error::InvalidState(_))));
}

#[tokio::test]
async fn test_requests_before_connect_are_rejected() {
    let broker = test_broker();
    let (id, mut rx) = add_peer(&broker);

    let requests = [
        ClientMessage::SensorStatus {
            sensor_id: "ABC".to_string(),
        },
        subscribe("ABC"),
        ClientMessage::Unsubscribe {
            sensor_id: "ABC".to_string(),
        },
    ];
    for request in requests {
        let result = broker.handle_message(&id, request);
        assert!(matches!(result, Err(Error::PermissionDenied(_))));
    }

    let replies = drain(&mut rx);
    assert_eq!(replies.len(), 3);
    for reply in replies {
        assert_eq!(
            reply,
            ServerMessage::Error {
                message: NOT_CONNECTED_MESSAGE.to_string()
            }
        );
    }
    assert!(broker.subscriptions().is_empty());
    assert_eq!(broker.push_task_count(), 0);
}

#[tokio::test]
async fn test_status_query_uses_status_source() {
    let broker = test_broker();
    let (id, mut rx) = connected_peer(&broker);

    broker
        .handle_message(
            &id,
            ClientMessage::SensorStatus {
                sensor_id: "ABC".to_string(),
            },
        )
        .unwrap();

    let reply = decode(rx.try_recv().unwrap());
    assert_eq!(
        reply,
        ServerMessage::SensorStatus {
            sensor_id: "ABC".to_string(),
            connected: true
        }
    );
}

#[tokio::test]
async fn test_duplicate_subscribe_runs_one_push_task() {
    let broker = test_broker();
    let (id, mut rx) = connected_peer(&broker);

    broker.handle_message(&id, subscribe("ABC")).unwrap();
    broker.handle_message(&id, subscribe("ABC")).unwrap();
    assert_eq!(broker.push_task_count(), 1);
    assert_eq!(broker.subscriptions().len(), 1);

    let first = rx.recv().await.unwrap();
    assert_eq!(
        decode(first),
        ServerMessage::SensorData {
            sensor_id: "ABC".to_string(),
            sensor_readings: "reading-ABC".to_string()
        }
    );
}

#[tokio::test]
async fn test_unsubscribe_stops_pushes() {
    let broker = test_broker();
    let (id, mut rx) = connected_peer(&broker);

    broker.handle_message(&id, subscribe("ABC")).unwrap();
    rx.recv().await.unwrap();

    broker
        .handle_message(
            &id,
            ClientMessage::Unsubscribe {
                sensor_id: "ABC".to_string(),
            },
        )
        .unwrap();
    assert!(!broker.subscriptions().contains(&id, "ABC"));

    drain(&mut rx);
    tokio::time::sleep(Duration::from_millis(PUSH_MS * 4)).await;
    assert!(drain(&mut rx).is_empty());
    assert_eq!(broker.push_task_count(), 0);
}

#[tokio::test]
async fn test_disconnect_cancels_subscriptions() {
    let broker = test_broker();
    let (id, mut rx) = connected_peer(&broker);

    broker.handle_message(&id, subscribe("ABC")).unwrap();
    broker.handle_message(&id, subscribe("DEF")).unwrap();
    assert_eq!(broker.push_task_count(), 2);

    broker.handle_message(&id, ClientMessage::Disconnect).unwrap();
    assert!(broker.subscriptions().is_empty());

    drain(&mut rx);
    tokio::time::sleep(Duration::from_millis(PUSH_MS * 4)).await;
    assert!(drain(&mut rx).is_empty());
    assert_eq!(broker.push_task_count(), 0);
}

#[tokio::test]
async fn test_remove_peer_cleans_up() {
    let broker = test_broker();
    let (id, _rx) = connected_peer(&broker);
    let (other, _other_rx) = connected_peer(&broker);

    broker.handle_message(&id, subscribe("ABC")).unwrap();
    broker.handle_message(&other, subscribe("ABC")).unwrap();

    broker.remove_peer(&id);
    assert_eq!(broker.peer_count(), 1);
    assert!(!broker.subscriptions().contains(&id, "ABC"));
    assert!(broker.subscriptions().contains(&other, "ABC"));

    tokio::time::sleep(Duration::from_millis(PUSH_MS)).await;
    assert_eq!(broker.push_task_count(), 1);
}

#[tokio::test]
async fn test_push_task_ends_when_writer_is_gone() {
    let broker = test_broker();
    let (id, rx) = connected_peer(&broker);

    // Drop the receiver to close the channel
    drop(rx);
    broker.handle_message(&id, subscribe("ABC")).unwrap();

    tokio::time::sleep(Duration::from_millis(PUSH_MS * 3)).await;
    assert!(!broker.subscriptions().contains(&id, "ABC"));
    assert_eq!(broker.push_task_count(), 0);
}

#[tokio::test]
async fn test_pushes_only_reach_the_subscriber() {
    let broker = test_broker();
    let (subscriber, mut sub_rx) = connected_peer(&broker);
    let (_bystander, mut other_rx) = connected_peer(&broker);

    broker.handle_message(&subscriber, subscribe("ABC")).unwrap();
    sub_rx.recv().await.unwrap();

    tokio::time::sleep(Duration::from_millis(PUSH_MS * 2)).await;
    assert!(drain(&mut other_rx).is_empty());
}
