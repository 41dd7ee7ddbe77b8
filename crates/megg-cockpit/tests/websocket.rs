//! Real WebSocket round trips against a hub on an ephemeral port.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use megg_cockpit::{ConnectionHub, HubConfig};
use megg_hal::{Link, SimSettings};
use megg_kernel::{MessageTable, WorkConfig};
use megg_middleware::EventBus;
use megg_runtime::{Coordinator, CoordinatorService};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_hub(rate_limit_per_sec: u32) -> SocketAddr {
    let link = Link::simulated(&SimSettings {
        latency: Duration::ZERO,
        seed: Some(9),
        good_rate: 0.95,
    });
    let coordinator = Coordinator::new(link, MessageTable::default(), WorkConfig::default());
    let (handle, _task) =
        CoordinatorService::spawn(coordinator, EventBus::default(), Duration::from_millis(20));

    let hub = ConnectionHub::new(
        handle,
        HubConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            rate_limit_per_sec,
            ..HubConfig::default()
        },
    );
    let listener = hub.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(hub.serve(listener, std::future::pending()));
    addr
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();
    ws
}

async fn next_json(ws: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("message within deadline")
            .expect("stream open")
            .expect("valid frame");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Skip messages until one of type `kind` arrives.
async fn next_of(ws: &mut Client, kind: &str) -> Value {
    loop {
        let value = next_json(ws).await;
        if value["type"] == kind {
            return value;
        }
    }
}

async fn send(ws: &mut Client, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Connect and consume the greeting.
async fn joined(addr: SocketAddr) -> Client {
    let mut ws = connect(addr).await;
    assert_eq!(next_json(&mut ws).await["type"], "connection");
    assert_eq!(next_json(&mut ws).await["type"], "status");
    ws
}

#[tokio::test]
async fn new_client_gets_connection_then_status() {
    let addr = start_hub(20).await;
    let mut ws = connect(addr).await;

    let hello = next_json(&mut ws).await;
    assert_eq!(hello["type"], "connection");
    assert_eq!(hello["payload"]["components"].as_array().unwrap().len(), 5);
    assert!(hello["timestamp"].is_string());

    let status = next_json(&mut ws).await;
    assert_eq!(status["type"], "status");
    assert_eq!(status["payload"]["link"]["mode"], "simulated");
    assert_eq!(status["payload"]["work_process"]["phase"], "idle");
}

#[tokio::test]
async fn ping_pong_and_protocol_errors() {
    let addr = start_hub(20).await;
    let mut ws = joined(addr).await;

    send(&mut ws, json!({"type": "ping", "payload": {}})).await;
    assert_eq!(next_json(&mut ws).await["type"], "pong");

    ws.send(Message::Text("{not json".into())).await.unwrap();
    let err = next_json(&mut ws).await;
    assert_eq!(err["type"], "error");
    assert_eq!(err["payload"]["code"], "invalid_json");

    send(&mut ws, json!({"type": "self_destruct", "payload": {}})).await;
    let err = next_json(&mut ws).await;
    assert_eq!(err["payload"]["code"], "unknown_command");

    // The connection survives protocol errors.
    send(&mut ws, json!({"type": "get_status"})).await;
    assert_eq!(next_json(&mut ws).await["type"], "status");
}

#[tokio::test]
async fn start_batch_while_uncalibrated_is_rejected() {
    let addr = start_hub(20).await;
    let mut ws = joined(addr).await;

    send(
        &mut ws,
        json!({"type": "work_process", "payload": {"action": "start_batch"}}),
    )
    .await;
    let err = next_of(&mut ws, "error").await;
    assert_eq!(err["payload"]["code"], "components_not_calibrated");
    assert!(err["payload"]["message"].as_str().unwrap().contains("load-cell"));
}

#[tokio::test]
async fn broadcasts_survive_another_client_leaving() {
    let addr = start_hub(20).await;
    let mut a = joined(addr).await;
    let mut b = joined(addr).await;

    send(
        &mut a,
        json!({"type": "calibration_request", "payload": {"component": "load-cell"}}),
    )
    .await;

    // A sees the first two updates, then leaves.
    let mut seen_by_a = Vec::new();
    for _ in 0..2 {
        let update = next_of(&mut a, "calibration_update").await;
        seen_by_a.push(update["payload"]["progress"].as_u64().unwrap());
    }
    a.close(None).await.unwrap();
    drop(a);

    let mut seen_by_b = Vec::new();
    loop {
        let update = next_of(&mut b, "calibration_update").await;
        seen_by_b.push(update["payload"]["progress"].as_u64().unwrap());
        assert_eq!(update["payload"]["component"], "load-cell");
        if update["payload"]["status"] == "complete" {
            break;
        }
    }
    assert_eq!(seen_by_b, vec![0, 25, 50, 75, 100]);
    assert_eq!(seen_by_a, seen_by_b[..2]);
}

#[tokio::test]
async fn excess_messages_are_rate_limited() {
    let addr = start_hub(2).await;
    let mut ws = joined(addr).await;

    for _ in 0..6 {
        send(&mut ws, json!({"type": "ping"})).await;
    }
    let mut codes = Vec::new();
    for _ in 0..6 {
        let reply = next_json(&mut ws).await;
        codes.push(match reply["type"].as_str().unwrap() {
            "pong" => "pong".to_string(),
            _ => reply["payload"]["code"].as_str().unwrap().to_string(),
        });
    }
    assert!(codes.iter().any(|c| c == "rate_limited"), "{codes:?}");
    assert_eq!(codes[0], "pong");
}

#[tokio::test]
async fn plain_http_gets_json_health() {
    let addr = start_hub(20).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();

    let mut response = String::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_string(&mut response))
        .await
        .unwrap()
        .unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK"));
    let body = response.split("\r\n\r\n").nth(1).unwrap();
    let value: Value = serde_json::from_str(body).unwrap();
    assert_eq!(value["service"], "megg");
    assert_eq!(value["status"]["link"]["mode"], "simulated");
}
