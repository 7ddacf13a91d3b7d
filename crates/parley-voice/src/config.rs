use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Which binding backs a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProviderKind {
    /// OpenAI-compatible HTTP API.
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    /// Offline binaries and a local OpenAI-compatible server.
    #[serde(rename = "local")]
    Local,
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

/// Credentials and endpoint for the OpenAI-compatible API.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_openai_base_url(),
        }
    }
}

impl fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Speech-to-text settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub provider: ProviderKind,
    /// Model name sent to the API.
    pub model: String,
    pub timeout_secs: u64,
    /// whisper.cpp executable used by the local binding.
    pub whisper_binary: String,
    /// GGML model file used by the local binding.
    pub whisper_model: String,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            model: "whisper-1".to_string(),
            timeout_secs: 60,
            whisper_binary: "whisper-cli".to_string(),
            whisper_model: "models/ggml-base.en.bin".to_string(),
        }
    }
}

impl TranscriptionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Text-to-speech settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub provider: ProviderKind,
    pub model: String,
    /// Voice used when a request names none, or names one the provider lacks.
    pub voice: String,
    /// Playback speed multiplier, clamped to 0.25..=4.0.
    pub speed: f32,
    pub timeout_secs: u64,
    /// Extra attempts after a transient failure.
    pub max_retries: u32,
    pub piper_binary: String,
    /// Piper voice model. When unset the local binding uses espeak-ng.
    pub piper_model: Option<String>,
    /// Output sample rate of the configured piper voice.
    pub piper_sample_rate: u32,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            speed: 1.0,
            timeout_secs: 60,
            max_retries: 1,
            piper_binary: "piper".to_string(),
            piper_model: None,
            piper_sample_rate: 22_050,
        }
    }
}

impl SynthesisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

fn default_local_base_url() -> String {
    "http://localhost:11434/v1".to_string()
}

/// Conversational model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
    /// OpenAI-compatible endpoint of the local model server.
    pub local_base_url: String,
    pub local_model: String,
    /// Retry a failed local completion against the OpenAI binding.
    pub fallback_to_openai: bool,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            model: "gpt-4o-mini".to_string(),
            max_tokens: 300,
            temperature: 0.7,
            timeout_secs: 120,
            local_base_url: default_local_base_url(),
            local_model: "gpt-oss:20b".to_string(),
            fallback_to_openai: false,
        }
    }
}

impl CompletionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}
