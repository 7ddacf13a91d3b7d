mod common;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use common::*;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(addr: SocketAddr) -> Ws {
    let (ws, _) = connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("failed to connect");
    ws
}

async fn send(ws: &mut Ws, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

async fn recv(ws: &mut Ws) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("receive error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Collects events up to and including `interaction_completed` or an error.
async fn recv_turn(ws: &mut Ws) -> Vec<Value> {
    let mut events = Vec::new();
    loop {
        let event = recv(ws).await;
        let done = event["type"] == "interaction_completed" || event["type"] == "error";
        events.push(event);
        if done {
            return events;
        }
    }
}

fn types(events: &[Value]) -> Vec<&str> {
    events.iter().map(|e| e["type"].as_str().unwrap()).collect()
}

async fn initialize(ws: &mut Ws) -> String {
    send(ws, json!({"type": "initialize_session"})).await;
    let event = recv(ws).await;
    assert_eq!(event["type"], "session_initialized");
    event["session_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn ping_pong() {
    let h = Harness::healthy();
    let mut ws = connect(h.spawn().await).await;
    send(&mut ws, json!({"type": "ping"})).await;
    assert_eq!(recv(&mut ws).await, json!({"type": "pong"}));
}

#[tokio::test]
async fn submissions_before_initialization_are_rejected() {
    let h = Harness::healthy();
    let mut ws = connect(h.spawn().await).await;

    send(&mut ws, json!({"type": "text_message", "text": "hi"})).await;
    let event = recv(&mut ws).await;
    assert_eq!(event["type"], "error");
    assert_eq!(event["error_code"], "session_not_initialized");

    send(&mut ws, json!({"type": "end_audio"})).await;
    assert_eq!(recv(&mut ws).await["error_code"], "session_not_initialized");
}

#[tokio::test]
async fn unknown_or_malformed_messages_get_an_error() {
    let h = Harness::healthy();
    let mut ws = connect(h.spawn().await).await;

    send(&mut ws, json!({"type": "dance"})).await;
    let event = recv(&mut ws).await;
    assert_eq!(event["type"], "error");
    assert_eq!(event["error_code"], "validation_error");

    // The connection survives.
    send(&mut ws, json!({"type": "ping"})).await;
    assert_eq!(recv(&mut ws).await["type"], "pong");
}

#[tokio::test]
async fn text_turn_streams_progress_events() {
    let h = Harness::healthy();
    let app = h.router();
    let mut ws = connect(h.spawn().await).await;
    let session_id = initialize(&mut ws).await;

    send(&mut ws, json!({"type": "text_message", "text": "hello"})).await;
    let events = recv_turn(&mut ws).await;
    assert_eq!(
        types(&events),
        ["response_generation_started", "text_response", "interaction_completed"]
    );
    assert_eq!(events[1]["text"], "You said: hello");

    let (_, messages) = call(&app, get(&format!("/sessions/{session_id}/messages"))).await;
    let messages = messages.as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1]["message_id"], events[1]["message_id"]);
}

#[tokio::test]
async fn text_turn_with_audio_sends_audio_response() {
    let h = Harness::healthy();
    let mut ws = connect(h.spawn().await).await;
    initialize(&mut ws).await;

    send(
        &mut ws,
        json!({"type": "text_message", "text": "say it", "include_audio": true, "voice": "alloy"}),
    )
    .await;
    let events = recv_turn(&mut ws).await;
    assert_eq!(
        types(&events),
        [
            "response_generation_started",
            "text_response",
            "audio_generation_started",
            "audio_response",
            "interaction_completed"
        ]
    );
    assert_eq!(events[3]["format"], "mp3");
    let audio = BASE64.decode(events[3]["audio_data"].as_str().unwrap()).unwrap();
    assert_eq!(audio, FAKE_AUDIO);
}

#[tokio::test]
async fn audio_chunks_are_buffered_until_final() {
    let h = Harness::healthy();
    let app = h.router();
    let mut ws = connect(h.spawn().await).await;
    let session_id = initialize(&mut ws).await;

    let clip = wav_clip();
    let (head, tail) = clip.split_at(clip.len() / 2);

    send(&mut ws, json!({"type": "audio_chunk", "audio_data": BASE64.encode(head)})).await;
    let ack = recv(&mut ws).await;
    assert_eq!(ack, json!({"type": "audio_chunk_received", "chunk_number": 1, "is_final": false}));

    send(
        &mut ws,
        json!({"type": "audio_chunk", "audio_data": BASE64.encode(tail), "is_final": true}),
    )
    .await;
    let events = recv_turn(&mut ws).await;
    assert_eq!(
        types(&events),
        [
            "audio_chunk_received",
            "transcription_started",
            "transcription_completed",
            "response_generation_started",
            "text_response",
            "audio_generation_started",
            "audio_response",
            "interaction_completed"
        ]
    );
    assert_eq!(events[0]["chunk_number"], 2);
    assert_eq!(events[2]["text"], "hello there");
    assert_eq!(events[4]["text"], "You said: hello there");

    let (_, messages) = call(&app, get(&format!("/sessions/{session_id}/messages"))).await;
    let messages = messages.as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(events[2]["message_id"], messages[0]["message_id"]);
    assert!(messages[1]["audio_url"].as_str().unwrap().ends_with(".mp3"));
}

#[tokio::test]
async fn end_audio_processes_buffer_and_rejects_empty() {
    let h = Harness::healthy();
    let mut ws = connect(h.spawn().await).await;
    initialize(&mut ws).await;

    send(&mut ws, json!({"type": "end_audio"})).await;
    assert_eq!(recv(&mut ws).await["error_code"], "validation_error");

    send(&mut ws, json!({"type": "audio_chunk", "audio_data": BASE64.encode(wav_clip())})).await;
    assert_eq!(recv(&mut ws).await["type"], "audio_chunk_received");

    send(&mut ws, json!({"type": "end_audio"})).await;
    let events = recv_turn(&mut ws).await;
    assert_eq!(events.first().unwrap()["type"], "transcription_started");
    assert_eq!(events.last().unwrap()["type"], "interaction_completed");
}

#[tokio::test]
async fn transcription_failure_is_reported_and_connection_recovers() {
    let h = Harness::new(
        FakeTranscriber::failing(),
        FakeSynthesizer::working(),
        FakeChat::echo(),
    );
    let app = h.router();
    let mut ws = connect(h.spawn().await).await;
    let session_id = initialize(&mut ws).await;

    send(
        &mut ws,
        json!({"type": "audio_chunk", "audio_data": BASE64.encode(wav_clip()), "is_final": true}),
    )
    .await;
    let events = recv_turn(&mut ws).await;
    let last = events.last().unwrap();
    assert_eq!(last["type"], "error");
    assert_eq!(last["error_code"], "transcription_failed");

    let (_, messages) = call(&app, get(&format!("/sessions/{session_id}/messages"))).await;
    assert!(messages.as_array().unwrap().is_empty());

    // Back to idle: a text turn works.
    send(&mut ws, json!({"type": "text_message", "text": "typed instead"})).await;
    let events = recv_turn(&mut ws).await;
    assert_eq!(events.last().unwrap()["type"], "interaction_completed");
}

#[tokio::test]
async fn submission_while_busy_is_rejected_not_dropped() {
    let h = Harness::new(
        FakeTranscriber::says("unused"),
        FakeSynthesizer::working(),
        FakeChat::slow(Duration::from_millis(400)),
    );
    let app = h.router();
    let mut ws = connect(h.spawn().await).await;
    let session_id = initialize(&mut ws).await;

    send(&mut ws, json!({"type": "text_message", "text": "first"})).await;
    send(&mut ws, json!({"type": "text_message", "text": "second"})).await;

    let mut events = Vec::new();
    loop {
        let event = recv(&mut ws).await;
        let done = event["type"] == "interaction_completed";
        events.push(event);
        if done {
            break;
        }
    }

    let busy: Vec<&Value> = events.iter().filter(|e| e["type"] == "error").collect();
    assert_eq!(busy.len(), 1);
    assert_eq!(busy[0]["error_code"], "session_busy");
    let replies: Vec<&Value> = events.iter().filter(|e| e["type"] == "text_response").collect();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0]["text"], "You said: first");

    let (_, messages) = call(&app, get(&format!("/sessions/{session_id}/messages"))).await;
    assert_eq!(messages.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn initialize_with_existing_or_unknown_session() {
    let h = Harness::healthy();
    let app = h.router();
    let existing = create_session(&app).await;
    let mut ws = connect(h.spawn().await).await;

    send(&mut ws, json!({"type": "initialize_session", "session_id": "nope"})).await;
    let event = recv(&mut ws).await;
    assert_eq!(event["type"], "error");
    assert_eq!(event["error_code"], "not_found");

    send(&mut ws, json!({"type": "initialize_session", "session_id": existing})).await;
    let event = recv(&mut ws).await;
    assert_eq!(event["type"], "session_initialized");
    assert_eq!(event["session_id"], existing.as_str());
}

#[tokio::test]
async fn stats_track_connections_and_sessions() {
    let h = Harness::healthy();
    let addr = h.spawn().await;
    let app = h.router();

    let mut first = connect(addr).await;
    let mut second = connect(addr).await;
    initialize(&mut first).await;
    // Round-trip on the unbound connection so it is registered before reading stats.
    send(&mut second, json!({"type": "ping"})).await;
    recv(&mut second).await;

    let (_, stats) = call(&app, get("/ws/stats")).await;
    assert_eq!(stats, json!({"active_connections": 2, "active_sessions": 1}));

    first.close(None).await.unwrap();
    second.close(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let (_, stats) = call(&app, get("/ws/stats")).await;
    assert_eq!(stats["active_connections"], 0);
}
