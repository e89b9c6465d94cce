//! Integration tests for WebSocket connection, ping/pong, protocol
//! dispatch, and the HTTP surface. Boots the real server on an ephemeral
//! port and drives it with tungstenite clients.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

/// Start the server on a random port and return its address.
async fn start_test_server() -> SocketAddr {
    let state = roomcast_server::state::AppState::new();
    let app = roomcast_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

/// Read protocol events until a text frame arrives, skipping control frames.
async fn next_event(read: &mut WsRead) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
            .await
            .expect("Timed out waiting for event")
            .expect("Stream ended unexpectedly")
            .expect("WebSocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).expect("Server sent invalid JSON");
        }
    }
}

/// Assert that no protocol event arrives within a short window.
async fn expect_silence(read: &mut WsRead) {
    let result = tokio::time::timeout(Duration::from_millis(300), read.next()).await;
    assert!(result.is_err(), "Expected no event, got: {:?}", result);
}

async fn send(write: &mut WsWrite, payload: Value) {
    write
        .send(Message::Text(payload.to_string().into()))
        .await
        .expect("Failed to send");
}

/// Connect a client, consume the welcome, and return its connection id.
async fn connect(addr: SocketAddr) -> (WsWrite, WsRead, String) {
    let (ws_stream, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
        .await
        .expect("Failed to connect to WebSocket");
    let (write, mut read) = ws_stream.split();

    let welcome = next_event(&mut read).await;
    assert_eq!(welcome["event"], "welcome");
    let conn_id = welcome["author"]
        .as_str()
        .expect("welcome must carry the connection id")
        .to_string();

    (write, read, conn_id)
}

#[tokio::test]
async fn test_ws_welcome_and_lazy_room_join() {
    let addr = start_test_server().await;
    let (mut write, mut read, conn_id) = connect(addr).await;
    assert!(!conn_id.is_empty());

    send(&mut write, json!({"method": "join", "room": "lobby"})).await;
    let event = next_event(&mut read).await;
    assert_eq!(event["event"], "welcome-to-room");
    assert_eq!(event["room"], "lobby");
    assert_eq!(event["data"], Value::Null);
}

#[tokio::test]
async fn test_ws_broadcast_reaches_others_not_sender() {
    let addr = start_test_server().await;
    let (mut write_a, mut read_a, id_a) = connect(addr).await;
    let (mut write_b, mut read_b, _id_b) = connect(addr).await;
    let (mut write_c, mut read_c, _id_c) = connect(addr).await;

    send(&mut write_a, json!({"method": "join", "room": "lobby"})).await;
    next_event(&mut read_a).await; // welcome-to-room

    send(&mut write_b, json!({"method": "join", "room": "lobby"})).await;
    next_event(&mut read_b).await; // welcome-to-room
    next_event(&mut read_a).await; // new-room-client (b)

    send(&mut write_c, json!({"method": "join", "room": "lobby"})).await;
    next_event(&mut read_c).await; // welcome-to-room
    next_event(&mut read_a).await; // new-room-client (c)
    next_event(&mut read_b).await; // new-room-client (c)

    send(
        &mut write_a,
        json!({"method": "broadcast", "room": "lobby", "data": {"text": "hello"}}),
    )
    .await;

    for read in [&mut read_b, &mut read_c] {
        let event = next_event(read).await;
        assert_eq!(event["event"], "broadcast-from");
        assert_eq!(event["author"], id_a);
        assert_eq!(event["room"], "lobby");
        assert_eq!(event["data"], json!({"text": "hello"}));
    }
    expect_silence(&mut read_a).await;
}

#[tokio::test]
async fn test_ws_end_to_end_lobby_scenario() {
    let addr = start_test_server().await;

    // A joins "lobby"; the room is created lazily with no metadata.
    let (mut write_a, mut read_a, id_a) = connect(addr).await;
    send(&mut write_a, json!({"method": "join", "room": "lobby"})).await;
    let event = next_event(&mut read_a).await;
    assert_eq!(event["event"], "welcome-to-room");
    assert_eq!(event["data"], Value::Null);

    // B joins; A hears about it.
    let (mut write_b, mut read_b, id_b) = connect(addr).await;
    send(&mut write_b, json!({"method": "join", "room": "lobby"})).await;
    next_event(&mut read_b).await; // welcome-to-room
    let event = next_event(&mut read_a).await;
    assert_eq!(event["event"], "new-room-client");
    assert_eq!(event["author"], id_b);

    // B sets its metadata; A sees the update.
    send(
        &mut write_b,
        json!({"method": "set-client-metadata", "data": {"name": "bob"}}),
    )
    .await;
    let event = next_event(&mut read_a).await;
    assert_eq!(event["event"], "client-metadata-update");
    assert_eq!(event["author"], id_b);
    assert_eq!(event["data"], json!({"name": "bob"}));

    // B drops its connection; A gets the departure notice.
    drop(write_b);
    drop(read_b);
    let event = next_event(&mut read_a).await;
    assert_eq!(event["event"], "client-left");
    assert_eq!(event["author"], id_b);
    assert_eq!(event["room"], "lobby");

    // Only A remains in the room.
    send(&mut write_a, json!({"method": "get-users", "room": "lobby"})).await;
    let event = next_event(&mut read_a).await;
    assert_eq!(event["event"], "room-users");
    assert_eq!(event["data"], json!({ id_a.clone(): null }));
}

#[tokio::test]
async fn test_ws_room_metadata_update_includes_setter() {
    let addr = start_test_server().await;
    let (mut write_a, mut read_a, _id_a) = connect(addr).await;
    let (mut write_b, mut read_b, _id_b) = connect(addr).await;

    send(&mut write_a, json!({"method": "join", "room": "lobby"})).await;
    next_event(&mut read_a).await;
    send(&mut write_b, json!({"method": "join", "room": "lobby"})).await;
    next_event(&mut read_b).await;
    next_event(&mut read_a).await; // new-room-client

    send(
        &mut write_a,
        json!({"method": "set-room-metadata", "room": "lobby", "data": {"topic": "rust"}}),
    )
    .await;
    for read in [&mut read_a, &mut read_b] {
        let event = next_event(read).await;
        assert_eq!(event["event"], "room-metadata-update");
        assert_eq!(event["room"], "lobby");
        assert_eq!(event["data"], json!({"topic": "rust"}));
    }

    // The next joiner receives the stored metadata in its ack.
    let (mut write_c, mut read_c, _id_c) = connect(addr).await;
    send(&mut write_c, json!({"method": "join", "room": "lobby"})).await;
    let event = next_event(&mut read_c).await;
    assert_eq!(event["event"], "welcome-to-room");
    assert_eq!(event["data"], json!({"topic": "rust"}));
}

#[tokio::test]
async fn test_ws_error_notices_go_to_sender_only() {
    let addr = start_test_server().await;
    let (mut write_a, mut read_a, _id_a) = connect(addr).await;
    let (mut write_b, mut read_b, _id_b) = connect(addr).await;
    send(&mut write_b, json!({"method": "join", "room": "lobby"})).await;
    next_event(&mut read_b).await;

    // Empty room name is rejected without creating anything.
    send(&mut write_a, json!({"method": "join", "room": ""})).await;
    let event = next_event(&mut read_a).await;
    assert_eq!(event["event"], "error");

    // Leave of a room the client is not in.
    send(&mut write_a, json!({"method": "leave", "room": "lobby"})).await;
    let event = next_event(&mut read_a).await;
    assert_eq!(event["event"], "error");

    // Unknown method.
    send(&mut write_a, json!({"method": "teleport"})).await;
    let event = next_event(&mut read_a).await;
    assert_eq!(event["event"], "error");
    assert_eq!(event["data"], "unknown-method");

    // None of it leaked to the other connection, which still works.
    expect_silence(&mut read_b).await;
    send(&mut write_b, json!({"method": "ping"})).await;
    let event = next_event(&mut read_b).await;
    assert_eq!(event["event"], "pong");
}

#[tokio::test]
async fn test_ws_protocol_ping_and_stats() {
    let addr = start_test_server().await;
    let (mut write, mut read, _id) = connect(addr).await;

    send(&mut write, json!({"method": "ping"})).await;
    let event = next_event(&mut read).await;
    assert_eq!(event, json!({"event": "pong"}));

    send(&mut write, json!({"method": "join", "room": "lobby"})).await;
    next_event(&mut read).await;
    send(&mut write, json!({"method": "stats"})).await;
    let event = next_event(&mut read).await;
    assert_eq!(event["event"], "statistics");
    assert_eq!(event["data"], json!({"clients": 1, "rooms": 1}));
}

#[tokio::test]
async fn test_ws_frame_ping_pong() {
    let addr = start_test_server().await;
    let (mut write, mut read, _id) = connect(addr).await;

    // Send a client ping frame
    write
        .send(Message::Ping(vec![42, 43, 44].into()))
        .await
        .expect("Failed to send ping");

    // We should receive a pong back
    let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
        .await
        .expect("Expected pong within timeout");

    match msg {
        Some(Ok(Message::Pong(data))) => {
            assert_eq!(data.as_ref(), &[42, 43, 44], "Pong data should match ping");
        }
        other => {
            panic!("Expected Pong message, got: {:?}", other);
        }
    }
}

#[tokio::test]
async fn test_http_health_and_stats() {
    let addr = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("http://{}/health", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ok");

    // Populate some state, then read the counters.
    let (mut write, mut read, _id) = connect(addr).await;
    send(&mut write, json!({"method": "join", "room": "lobby"})).await;
    next_event(&mut read).await;

    let resp = client
        .get(format!("http://{}/api/stats", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"clients": 1, "rooms": 1}));
}

#[tokio::test]
async fn test_ws_connection_cleanup_on_close_frame() {
    let addr = start_test_server().await;
    let (mut write_a, mut read_a, _id_a) = connect(addr).await;
    let (mut write_b, mut read_b, id_b) = connect(addr).await;
    send(&mut write_a, json!({"method": "join", "room": "lobby"})).await;
    next_event(&mut read_a).await;
    send(&mut write_b, json!({"method": "join", "room": "lobby"})).await;
    next_event(&mut read_b).await;
    next_event(&mut read_a).await; // new-room-client

    // B closes politely.
    write_b
        .send(Message::Close(None))
        .await
        .expect("Failed to send close");

    let event = next_event(&mut read_a).await;
    assert_eq!(event["event"], "client-left");
    assert_eq!(event["author"], id_b);

    // The registry reflects the cleanup.
    send(&mut write_a, json!({"method": "stats"})).await;
    let event = next_event(&mut read_a).await;
    assert_eq!(event["data"]["clients"], 1);
}
