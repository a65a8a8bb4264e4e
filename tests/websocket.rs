//! End-to-end tests: real listener, real websocket clients.

use futures::{SinkExt, StreamExt};
use sensor_relay::{
    create_router, Broadcaster, BroadcasterSettings, Gateway, GatewaySettings, MemoryStore, Reading,
    SensorId, SubscriptionRegistry,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestRelay {
    addr: SocketAddr,
    store: Arc<MemoryStore>,
    gateway: Arc<Gateway>,
    _stop: watch::Sender<bool>,
}

async fn start_relay() -> TestRelay {
    let store = Arc::new(MemoryStore::with_readings([(
        SensorId::parse("S1").unwrap(),
        Reading::new(42.0),
    )]));
    let gateway = Arc::new(Gateway::new(
        Arc::new(SubscriptionRegistry::new()),
        store.clone(),
        GatewaySettings::default(),
    ));
    let broadcaster = Broadcaster::new(
        gateway.clone(),
        store.clone(),
        BroadcasterSettings {
            interval: Duration::from_millis(100),
            ..BroadcasterSettings::default()
        },
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move { broadcaster.run(stop_rx).await });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_router(gateway.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestRelay {
        addr,
        store,
        gateway,
        _stop: stop_tx,
    }
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{}/ws", addr))
        .await
        .expect("Failed to connect");
    ws
}

async fn send(ws: &mut Client, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

/// next json frame, skipping control frames
async fn next_json(ws: &mut Client) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let msg = ws.next().await.expect("stream ended").expect("ws error");
            if msg.is_text() {
                return serde_json::from_str(msg.to_text().unwrap()).unwrap();
            }
        }
    })
    .await
    .expect("timed out waiting for a message")
}

async fn wait_until<F: Fn() -> bool>(check: F) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn two_clients_on_same_sensor_both_get_the_value() {
    let relay = start_relay().await;
    let mut a = connect(relay.addr).await;
    let mut b = connect(relay.addr).await;

    for ws in [&mut a, &mut b] {
        send(ws, json!({"type": "subscribe", "sensor_id": "S1"})).await;
        assert_eq!(next_json(ws).await, json!({"type": "subscribed", "sensor_id": "S1"}));
        // eager answer, then cycle updates
        for _ in 0..2 {
            assert_eq!(
                next_json(ws).await,
                json!({"type": "reading", "sensor_id": "S1", "value": 42.0})
            );
        }
    }

    assert_eq!(relay.gateway.registry().distinct_sensors(), 1);
}

#[tokio::test]
async fn unknown_sensor_gets_notice_and_later_data() {
    let relay = start_relay().await;
    let mut ws = connect(relay.addr).await;

    send(&mut ws, json!({"type": "subscribe", "sensor_id": "S9"})).await;
    next_json(&mut ws).await;
    assert_eq!(
        next_json(&mut ws).await,
        json!({"type": "error", "message": "No data found for sensorId: S9"})
    );

    relay.store.record(SensorId::parse("S9").unwrap(), Reading::new(0.5));
    assert_eq!(
        next_json(&mut ws).await,
        json!({"type": "reading", "sensor_id": "S9", "value": 0.5})
    );
}

#[tokio::test]
async fn bad_requests_get_advisory_notices() {
    let relay = start_relay().await;
    let mut ws = connect(relay.addr).await;

    send(&mut ws, json!({"type": "subscribe", "sensor_id": ""})).await;
    assert_eq!(next_json(&mut ws).await["type"], "error");

    ws.send(Message::text("not json".to_string())).await.unwrap();
    assert_eq!(next_json(&mut ws).await["type"], "error");

    send(&mut ws, json!({"type": "ping"})).await;
    assert_eq!(next_json(&mut ws).await, json!({"type": "pong"}));
    assert!(relay.gateway.registry().is_empty());
}

#[tokio::test]
async fn unsubscribe_stops_updates() {
    let relay = start_relay().await;
    let mut ws = connect(relay.addr).await;

    send(&mut ws, json!({"type": "subscribe", "sensor_id": "S1"})).await;
    next_json(&mut ws).await;
    send(&mut ws, json!({"type": "unsubscribe"})).await;

    loop {
        if next_json(&mut ws).await["type"] == "unsubscribed" {
            break;
        }
    }
    assert!(relay.gateway.registry().is_empty());
    assert_eq!(relay.gateway.connection_count(), 1);
}

#[tokio::test]
async fn closing_the_socket_clears_registry_and_health() {
    let relay = start_relay().await;
    let mut ws = connect(relay.addr).await;
    send(&mut ws, json!({"type": "subscribe", "sensor_id": "S1"})).await;
    next_json(&mut ws).await;
    // the eager reading follows the registry write
    assert_eq!(next_json(&mut ws).await["type"], "reading");

    let health: Value = reqwest::get(format!("http://{}/health", relay.addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["connections"], 1);
    assert_eq!(health["subscriptions"], 1);

    ws.close(None).await.unwrap();
    drop(ws);

    let gateway = relay.gateway.clone();
    wait_until(move || gateway.connection_count() == 0).await;
    assert!(relay.gateway.registry().is_empty());
}
