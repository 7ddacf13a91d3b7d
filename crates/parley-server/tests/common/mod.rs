//! Shared fixtures: scripted adapters and an in-memory application state.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use parley_server::config::Config;
use parley_server::providers::Providers;
use parley_server::AppState;
use parley_types::AudioFormat;
use parley_voice::{
    ChatEngine, ChatRole, ChatTurn, Completion, HealthStatus, SpeechRequest, SynthesizedAudio,
    Synthesizer, Transcriber, Transcription, VoiceError,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tower::ServiceExt;

/// Transcriber returning a fixed text, or failing when `text` is `None`.
pub struct FakeTranscriber {
    pub text: Option<String>,
    pub calls: AtomicU32,
}

impl FakeTranscriber {
    pub fn says(text: &str) -> Arc<Self> {
        Arc::new(Self {
            text: Some(text.to_string()),
            calls: AtomicU32::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            text: None,
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    fn name(&self) -> &str {
        "fake-stt"
    }

    async fn transcribe(
        &self,
        _audio: &[u8],
        _format: AudioFormat,
        language: Option<&str>,
    ) -> Result<Transcription, VoiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.text {
            Some(text) => Ok(Transcription {
                text: text.clone(),
                confidence: Some(0.9),
                language: Some(language.unwrap_or("en").to_string()),
                duration_secs: Some(1.5),
            }),
            None => Err(VoiceError::Transport("connection reset".to_string())),
        }
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus::Healthy
    }
}

/// Synthesizer that fails its first `failures` calls with `error`.
pub struct FakeSynthesizer {
    failures: AtomicU32,
    error: fn() -> VoiceError,
    pub calls: AtomicU32,
}

pub const FAKE_AUDIO: &[u8] = b"ID3-fake-mp3";

impl FakeSynthesizer {
    pub fn working() -> Arc<Self> {
        Self::failing_first(0, || VoiceError::Transport("unused".to_string()))
    }

    pub fn failing_first(failures: u32, error: fn() -> VoiceError) -> Arc<Self> {
        Arc::new(Self {
            failures: AtomicU32::new(failures),
            error,
            calls: AtomicU32::new(0),
        })
    }

    pub fn broken() -> Arc<Self> {
        Self::failing_first(u32::MAX, || VoiceError::Rejected("400: bad voice".to_string()))
    }
}

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    fn name(&self) -> &str {
        "fake-tts"
    }

    fn voices(&self) -> Vec<String> {
        vec!["alloy".to_string()]
    }

    async fn synthesize(&self, request: &SpeechRequest) -> Result<SynthesizedAudio, VoiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err((self.error)());
        }
        Ok(SynthesizedAudio {
            data: FAKE_AUDIO.to_vec(),
            format: AudioFormat::Mp3,
            voice: request.voice.clone().unwrap_or_else(|| "alloy".to_string()),
        })
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus::Healthy
    }
}

/// Chat engine that answers `You said: <last user turn>`.
pub struct FakeChat {
    pub fail: bool,
    pub delay: Duration,
    pub healthy: bool,
    pub calls: AtomicU32,
    pub last_turns: Mutex<Vec<ChatTurn>>,
}

impl FakeChat {
    pub fn echo() -> Arc<Self> {
        Self::build(false, Duration::ZERO, true)
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Self::build(false, delay, true)
    }

    pub fn failing() -> Arc<Self> {
        Self::build(true, Duration::ZERO, true)
    }

    pub fn unhealthy() -> Arc<Self> {
        Self::build(false, Duration::ZERO, false)
    }

    fn build(fail: bool, delay: Duration, healthy: bool) -> Arc<Self> {
        Arc::new(Self {
            fail,
            delay,
            healthy,
            calls: AtomicU32::new(0),
            last_turns: Mutex::new(Vec::new()),
        })
    }

    pub fn last_turns(&self) -> Vec<ChatTurn> {
        self.last_turns.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatEngine for FakeChat {
    fn name(&self) -> &str {
        "fake-chat"
    }

    async fn complete(&self, turns: &[ChatTurn]) -> Result<Completion, VoiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_turns.lock().unwrap() = turns.to_vec();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(VoiceError::Rejected("500: model overloaded".to_string()));
        }
        let last_user = turns
            .iter()
            .rev()
            .find(|t| t.role == ChatRole::User)
            .map(|t| t.content.as_str())
            .unwrap_or_default();
        Ok(Completion {
            text: format!("You said: {last_user}"),
            model: "fake-model".to_string(),
            tokens_used: Some(12),
        })
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus::from_ok(self.healthy)
    }
}

pub struct Harness {
    pub state: AppState,
    pub transcriber: Arc<FakeTranscriber>,
    pub synthesizer: Arc<FakeSynthesizer>,
    pub chat: Arc<FakeChat>,
    pub audio_dir: TempDir,
}

impl Harness {
    pub fn new(
        transcriber: Arc<FakeTranscriber>,
        synthesizer: Arc<FakeSynthesizer>,
        chat: Arc<FakeChat>,
    ) -> Self {
        let audio_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.audio.storage_dir = audio_dir.path().to_string_lossy().into_owned();
        config.audio.max_size_mb = 1;

        let pool =
            parley_db::create_pool(":memory:", parley_db::DbRuntimeSettings::default()).unwrap();
        {
            let conn = pool.get().unwrap();
            parley_db::run_migrations(&conn).unwrap();
        }

        let providers = Providers {
            transcriber: transcriber.clone(),
            synthesizer: synthesizer.clone(),
            chat: chat.clone(),
        };
        Self {
            state: AppState::new(pool, providers, &config),
            transcriber,
            synthesizer,
            chat,
            audio_dir,
        }
    }

    /// Working adapters everywhere.
    pub fn healthy() -> Self {
        Self::new(
            FakeTranscriber::says("hello there"),
            FakeSynthesizer::working(),
            FakeChat::echo(),
        )
    }

    pub fn router(&self) -> Router {
        parley_server::app(self.state.clone())
    }

    /// Serves the app on an ephemeral port.
    pub async fn spawn(&self) -> SocketAddr {
        let app = self.router();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }
}

/// Sends one request through the router and decodes the JSON body.
pub async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, json)
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Creates a session and returns its id.
pub async fn create_session(app: &Router) -> String {
    let request = Request::builder()
        .method("POST")
        .uri("/sessions")
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(app, request).await;
    assert_eq!(status, StatusCode::CREATED);
    body["session_id"].as_str().unwrap().to_string()
}

pub const BOUNDARY: &str = "parley-test-boundary";

/// Builds a multipart/form-data request with text fields and an optional file.
pub fn post_multipart(
    uri: &str,
    fields: &[(&str, &str)],
    file: Option<(&str, &str, &[u8])>,
) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((name, file_name, data)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

/// A short silent 16 kHz mono recording.
pub fn wav_clip() -> Vec<u8> {
    parley_voice::wav::encode_pcm16(&[0u8; 3200], 16_000, 1).expect("encode wav")
}
