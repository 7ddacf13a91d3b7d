//! Realtime channel: WebSocket handler and connection bookkeeping.

use crate::api_sessions::bind_session;
use crate::error::ServiceError;
use crate::orchestrator::{TurnInput, TurnOptions, TurnProgress};
use crate::ws_state::{ConnectionMachine, ConnectionState};
use crate::AppState;
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        Extension, WebSocketUpgrade,
    },
    response::{IntoResponse, Json},
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::future::OptionFuture;
use futures_util::{SinkExt, StreamExt};
use parley_types::AudioFormat;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Incoming WebSocket message types.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IncomingMessage {
    InitializeSession {
        session_id: Option<String>,
    },
    TextMessage {
        text: String,
        #[serde(default)]
        include_audio: bool,
        voice: Option<String>,
    },
    AudioChunk {
        audio_data: String,
        #[serde(default)]
        is_final: bool,
    },
    EndAudio,
    Ping,
}

/// Outgoing WebSocket message types.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingMessage {
    SessionInitialized {
        session_id: String,
    },
    AudioChunkReceived {
        chunk_number: usize,
        is_final: bool,
    },
    TranscriptionStarted,
    TranscriptionCompleted {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        confidence: Option<f32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        message_id: String,
    },
    ResponseGenerationStarted,
    TextResponse {
        text: String,
        message_id: String,
    },
    AudioGenerationStarted,
    AudioResponse {
        audio_data: String,
        format: AudioFormat,
    },
    InteractionCompleted,
    Pong,
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<String>,
    },
}

impl From<TurnProgress> for OutgoingMessage {
    fn from(p: TurnProgress) -> Self {
        match p {
            TurnProgress::TranscriptionStarted => Self::TranscriptionStarted,
            TurnProgress::TranscriptionCompleted {
                transcription,
                message_id,
            } => Self::TranscriptionCompleted {
                text: transcription.text,
                confidence: transcription.confidence,
                language: transcription.language,
                message_id,
            },
            TurnProgress::ResponseGenerationStarted => Self::ResponseGenerationStarted,
            TurnProgress::ResponseReady { text, message_id } => {
                Self::TextResponse { text, message_id }
            }
            TurnProgress::AudioGenerationStarted => Self::AudioGenerationStarted,
        }
    }
}

impl OutgoingMessage {
    fn error(message: impl Into<String>, code: &str) -> Self {
        Self::Error {
            message: message.into(),
            error_code: Some(code.to_string()),
        }
    }

    fn from_service_error(e: &ServiceError) -> Self {
        Self::error(e.detail(), e.code())
    }
}

/// Snapshot returned by `GET /ws/stats`.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ConnectionStats {
    pub active_connections: usize,
    pub active_sessions: usize,
}

/// Tracks open connections and the session each one is bound to.
#[derive(Clone, Default)]
pub struct ConnectionManager {
    connections: Arc<RwLock<HashMap<Uuid, Option<String>>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new connection and returns its identifier.
    pub async fn register(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.connections.write().await.insert(id, None);
        id
    }

    pub async fn bind(&self, connection_id: Uuid, session_id: String) {
        if let Some(slot) = self.connections.write().await.get_mut(&connection_id) {
            *slot = Some(session_id);
        }
    }

    pub async fn remove(&self, connection_id: Uuid) {
        self.connections.write().await.remove(&connection_id);
    }

    /// Counts connections and the distinct sessions they are bound to.
    pub async fn stats(&self) -> ConnectionStats {
        let connections = self.connections.read().await;
        let mut sessions: Vec<&String> = connections.values().flatten().collect();
        sessions.sort();
        sessions.dedup();
        ConnectionStats {
            active_connections: connections.len(),
            active_sessions: sessions.len(),
        }
    }
}

/// GET /ws/stats
pub async fn ws_stats_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<ConnectionStats> {
    Json(state.connection_manager.stats().await)
}

/// GET /ws
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    // Base64 inflates payloads by 4/3; leave room for the JSON envelope.
    let frame_limit = state.max_audio_bytes / 3 * 4 + 64 * 1024;
    ws.max_message_size(frame_limit)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Serializes and queues an event for the client.
fn send_event(tx: &mpsc::Sender<String>, event: &OutgoingMessage) {
    match serde_json::to_string(event) {
        Ok(json) => {
            if let Err(e) = tx.try_send(json) {
                tracing::warn!("failed to queue WebSocket event: {}", e);
            }
        }
        Err(e) => tracing::error!("failed to serialize WebSocket event: {}", e),
    }
}

/// Serializes an event and waits for room in the outgoing queue, so turn
/// events are never dropped under backpressure.
async fn deliver(tx: &mpsc::Sender<String>, event: &OutgoingMessage) {
    match serde_json::to_string(event) {
        Ok(json) => {
            if tx.send(json).await.is_err() {
                tracing::debug!("connection closed before event was delivered");
            }
        }
        Err(e) => tracing::error!("failed to serialize WebSocket event: {}", e),
    }
}

/// Mutable state of one connection's receive loop.
struct Connection {
    id: Uuid,
    machine: ConnectionMachine,
    session_id: Option<String>,
    audio: Vec<u8>,
    chunks: usize,
    turn: Option<JoinHandle<()>>,
    tx: mpsc::Sender<String>,
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(256);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(AxumMessage::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    let mut conn = Connection {
        id: state.connection_manager.register().await,
        machine: ConnectionMachine::new(),
        session_id: None,
        audio: Vec::new(),
        chunks: 0,
        turn: None,
        tx,
    };
    if let Err(e) = conn.machine.transition(ConnectionState::Open) {
        tracing::error!(connection_id = %conn.id, "{}", e);
    }
    tracing::info!(connection_id = %conn.id, "realtime connection opened");

    loop {
        let turn_running = conn.turn.is_some();
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(AxumMessage::Text(text))) => {
                        handle_text(&state, &mut conn, text.as_str()).await;
                    }
                    Some(Ok(AxumMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(connection_id = %conn.id, "WebSocket receive error: {}", e);
                        break;
                    }
                }
            }
            Some(joined) = OptionFuture::from(conn.turn.as_mut()), if turn_running => {
                conn.turn = None;
                if let Err(e) = joined {
                    tracing::error!(connection_id = %conn.id, "turn task failed: {}", e);
                    send_event(&conn.tx, &OutgoingMessage::error("internal server error", "internal_error"));
                }
                if let Err(e) = conn.machine.transition(ConnectionState::Idle) {
                    tracing::error!(connection_id = %conn.id, "{}", e);
                }
            }
        }
    }

    // A turn already in flight still commits its messages; only the socket goes away.
    if let Err(e) = conn.machine.transition(ConnectionState::Closed) {
        tracing::warn!(connection_id = %conn.id, "{}", e);
    }
    state.connection_manager.remove(conn.id).await;
    send_task.abort();
    tracing::info!(connection_id = %conn.id, "realtime connection closed");
}

async fn handle_text(state: &Arc<AppState>, conn: &mut Connection, text: &str) {
    let incoming = match serde_json::from_str::<IncomingMessage>(text) {
        Ok(m) => m,
        Err(e) => {
            send_event(
                &conn.tx,
                &OutgoingMessage::error(format!("invalid message: {e}"), "validation_error"),
            );
            return;
        }
    };

    match incoming {
        IncomingMessage::Ping => send_event(&conn.tx, &OutgoingMessage::Pong),
        IncomingMessage::InitializeSession { session_id } => {
            if conn.machine.current() == ConnectionState::Busy {
                send_event(
                    &conn.tx,
                    &OutgoingMessage::error("a turn is still in progress", "session_busy"),
                );
                return;
            }
            match bind_session(&state.pool, session_id).await {
                Ok(id) => {
                    if let Err(e) = conn.machine.transition(ConnectionState::Idle) {
                        tracing::error!(connection_id = %conn.id, "{}", e);
                        return;
                    }
                    state.connection_manager.bind(conn.id, id.clone()).await;
                    conn.session_id = Some(id.clone());
                    conn.audio.clear();
                    conn.chunks = 0;
                    tracing::info!(connection_id = %conn.id, session_id = %id, "session bound");
                    send_event(&conn.tx, &OutgoingMessage::SessionInitialized { session_id: id });
                }
                Err(e) => send_event(&conn.tx, &OutgoingMessage::from_service_error(&e)),
            }
        }
        IncomingMessage::TextMessage {
            text,
            include_audio,
            voice,
        } => {
            if reject_submission(conn) {
                return;
            }
            let options = TurnOptions {
                synthesize: include_audio,
                voice,
                language: None,
            };
            start_turn(state, conn, TurnInput::Text(text), options);
        }
        IncomingMessage::AudioChunk {
            audio_data,
            is_final,
        } => {
            if reject_submission(conn) {
                return;
            }
            let chunk = match BASE64.decode(audio_data.as_bytes()) {
                Ok(bytes) if !bytes.is_empty() => bytes,
                Ok(_) => {
                    send_event(&conn.tx, &OutgoingMessage::error("no audio data provided", "validation_error"));
                    return;
                }
                Err(e) => {
                    send_event(
                        &conn.tx,
                        &OutgoingMessage::error(format!("audio_data is not valid base64: {e}"), "validation_error"),
                    );
                    return;
                }
            };
            if conn.audio.len() + chunk.len() > state.max_audio_bytes {
                conn.audio.clear();
                conn.chunks = 0;
                send_event(
                    &conn.tx,
                    &OutgoingMessage::error(
                        format!("buffered audio exceeds {} bytes", state.max_audio_bytes),
                        "validation_error",
                    ),
                );
                return;
            }
            conn.audio.extend_from_slice(&chunk);
            conn.chunks += 1;
            send_event(
                &conn.tx,
                &OutgoingMessage::AudioChunkReceived {
                    chunk_number: conn.chunks,
                    is_final,
                },
            );
            if is_final {
                start_audio_turn(state, conn);
            }
        }
        IncomingMessage::EndAudio => {
            if reject_submission(conn) {
                return;
            }
            if conn.audio.is_empty() {
                send_event(&conn.tx, &OutgoingMessage::error("no audio buffered", "validation_error"));
                return;
            }
            start_audio_turn(state, conn);
        }
    }
}

/// Sends the rejection event and returns true when no submission may start.
fn reject_submission(conn: &Connection) -> bool {
    let Some(code) = conn.machine.submission_blocker() else {
        return false;
    };
    let message = match code {
        "session_busy" => "a turn is still in progress for this session",
        "session_not_initialized" => "send initialize_session first",
        _ => "connection is closing",
    };
    send_event(&conn.tx, &OutgoingMessage::error(message, code));
    true
}

fn start_audio_turn(state: &Arc<AppState>, conn: &mut Connection) {
    let data = std::mem::take(&mut conn.audio);
    conn.chunks = 0;
    let input = TurnInput::Audio {
        data,
        format: AudioFormat::Wav,
        language: None,
    };
    let options = TurnOptions {
        synthesize: true,
        ..TurnOptions::default()
    };
    start_turn(state, conn, input, options);
}

/// Moves the connection to busy and runs the turn on its own task.
fn start_turn(state: &Arc<AppState>, conn: &mut Connection, input: TurnInput, options: TurnOptions) {
    let Some(session_id) = conn.session_id.clone() else {
        send_event(&conn.tx, &OutgoingMessage::error("send initialize_session first", "session_not_initialized"));
        return;
    };
    if let Err(e) = conn.machine.transition(ConnectionState::Busy) {
        tracing::error!(connection_id = %conn.id, "{}", e);
        return;
    }

    let orchestrator = state.orchestrator.clone();
    let tx = conn.tx.clone();
    conn.turn = Some(tokio::spawn(async move {
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<TurnProgress>();
        let forward_tx = tx.clone();
        let forward = async move {
            while let Some(p) = progress_rx.recv().await {
                deliver(&forward_tx, &OutgoingMessage::from(p)).await;
            }
        };
        let sid = session_id.clone();
        let turn = async move {
            let progress = move |p: TurnProgress| {
                let _ = progress_tx.send(p);
            };
            orchestrator.run_turn(&sid, input, &options, &progress).await
        };
        let (result, ()) = tokio::join!(turn, forward);

        match result {
            Ok(outcome) => {
                if let Some(audio) = outcome.audio {
                    deliver(
                        &tx,
                        &OutgoingMessage::AudioResponse {
                            audio_data: BASE64.encode(&audio.data),
                            format: audio.format,
                        },
                    )
                    .await;
                }
                deliver(&tx, &OutgoingMessage::InteractionCompleted).await;
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "realtime turn failed");
                deliver(&tx, &OutgoingMessage::from_service_error(&e)).await;
            }
        }
    }));
}
