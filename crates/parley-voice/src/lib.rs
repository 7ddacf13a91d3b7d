//! Speech and conversation providers for Parley.
//!
//! Three capabilities sit behind object-safe traits so the server can hold
//! them as `Arc<dyn _>` chosen once at startup:
//!
//! - [`Transcriber`] turns recorded audio into text,
//! - [`Synthesizer`] renders reply text as audio,
//! - [`ChatEngine`] produces the assistant reply from the conversation so far.
//!
//! Two bindings are provided. The `openai` binding talks to any
//! OpenAI-compatible HTTP API. The `local` binding runs `whisper.cpp` and
//! `piper`/`espeak-ng` as child processes and uses a local model server
//! (Ollama) for completions.

use async_trait::async_trait;
use parley_types::{AudioFormat, Role};
use serde::{Deserialize, Serialize};

pub mod config;
pub mod confidence;
pub mod error;
pub mod fallback;
pub mod openai;
pub mod prompt;
pub mod stt;
pub mod tts;
pub mod wav;

pub use config::{CompletionConfig, OpenAiConfig, ProviderKind, SynthesisConfig, TranscriptionConfig};
pub use error::VoiceError;
pub use fallback::FallbackChatEngine;
pub use openai::{OpenAiChat, OpenAiSynthesizer, OpenAiTranscriber};
pub use stt::WhisperCppTranscriber;
pub use tts::LocalSynthesizer;

/// Maximum number of characters accepted for one synthesis request.
pub const MAX_SPEECH_CHARS: usize = 4096;

/// Voices offered by the OpenAI speech endpoint.
pub const OPENAI_VOICES: [&str; 6] = ["alloy", "echo", "fable", "onyx", "nova", "shimmer"];

/// Result of a transcription call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
}

/// A synthesis request after the caller has picked the text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeechRequest {
    pub text: String,
    /// Requested voice; unknown names fall back to the provider default.
    pub voice: Option<String>,
    pub language: Option<String>,
}

impl SpeechRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Synthesized audio and the container it is encoded in.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAudio {
    pub data: Vec<u8>,
    pub format: AudioFormat,
    /// Voice actually used, after fallback.
    pub voice: String,
}

/// Speaker of a turn handed to the conversational model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl From<Role> for ChatRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => Self::User,
            Role::Assistant => Self::Assistant,
        }
    }
}

/// One entry of the prompt sent to the conversational model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Reply produced by the conversational model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
}

/// Coarse provider health reported on the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    pub fn from_ok(ok: bool) -> Self {
        if ok {
            Self::Healthy
        } else {
            Self::Unhealthy
        }
    }
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    fn name(&self) -> &str;

    /// Transcribes one complete audio payload.
    async fn transcribe(
        &self,
        audio: &[u8],
        format: AudioFormat,
        language: Option<&str>,
    ) -> Result<Transcription, VoiceError>;

    async fn health(&self) -> HealthStatus;
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    fn name(&self) -> &str;

    /// Voices this synthesizer accepts by name.
    fn voices(&self) -> Vec<String>;

    async fn synthesize(&self, request: &SpeechRequest) -> Result<SynthesizedAudio, VoiceError>;

    async fn health(&self) -> HealthStatus;
}

#[async_trait]
pub trait ChatEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Produces the next assistant turn for the given prompt.
    async fn complete(&self, turns: &[ChatTurn]) -> Result<Completion, VoiceError>;

    async fn health(&self) -> HealthStatus;
}

/// Checks text submitted for synthesis.
pub fn validate_speech_text(text: &str) -> Result<(), VoiceError> {
    if text.trim().is_empty() {
        return Err(VoiceError::InvalidInput("text must not be blank".to_string()));
    }
    let chars = text.chars().count();
    if chars > MAX_SPEECH_CHARS {
        return Err(VoiceError::InvalidInput(format!(
            "text is {chars} characters (limit: {MAX_SPEECH_CHARS})"
        )));
    }
    Ok(())
}

/// Picks the voice to use: the requested one when available, otherwise
/// `default`.
pub fn resolve_voice(requested: Option<&str>, available: &[String], default: &str) -> String {
    match requested {
        Some(v) if available.iter().any(|a| a == v) => v.to_string(),
        Some(v) => {
            tracing::warn!(requested = v, fallback = default, "unknown voice, using default");
            default.to_string()
        }
        None => default.to_string(),
    }
}
