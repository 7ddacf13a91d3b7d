//! Bindings for OpenAI-compatible HTTP APIs.
//!
//! The same chat binding serves both the hosted API and a local model server
//! such as Ollama, which exposes the `/chat/completions` route without
//! requiring a key.

use async_trait::async_trait;
use parley_types::AudioFormat;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::config::{CompletionConfig, OpenAiConfig, SynthesisConfig, TranscriptionConfig};
use crate::confidence::estimate_confidence;
use crate::{
    resolve_voice, validate_speech_text, wav, ChatEngine, ChatTurn, Completion, HealthStatus,
    SpeechRequest, SynthesizedAudio, Synthesizer, Transcriber, Transcription, VoiceError,
    OPENAI_VOICES,
};

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared HTTP plumbing: base URL, optional bearer key, bounded timeout.
#[derive(Clone)]
struct Endpoint {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    requires_key: bool,
    timeout: Duration,
}

impl Endpoint {
    fn new(
        base_url: &str,
        api_key: Option<String>,
        requires_key: bool,
        timeout: Duration,
    ) -> Result<Self, VoiceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VoiceError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            requires_key,
            timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn has_credentials(&self) -> bool {
        !self.requires_key || self.api_key.is_some()
    }

    fn authorize(&self, rb: RequestBuilder) -> Result<RequestBuilder, VoiceError> {
        match &self.api_key {
            Some(key) => Ok(rb.bearer_auth(key)),
            None if self.requires_key => {
                Err(VoiceError::Config("OpenAI API key is not configured".to_string()))
            }
            None => Ok(rb),
        }
    }

    fn post(&self, path: &str) -> Result<RequestBuilder, VoiceError> {
        self.authorize(self.client.post(self.url(path)))
    }

    async fn send(&self, rb: RequestBuilder) -> Result<Response, VoiceError> {
        let response = rb
            .send()
            .await
            .map_err(|e| VoiceError::from_reqwest(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, body = %body, "provider returned an error status");
            return Err(VoiceError::from_status(status, &body));
        }
        Ok(response)
    }

    async fn json<T: serde::de::DeserializeOwned>(&self, response: Response) -> Result<T, VoiceError> {
        response
            .json::<T>()
            .await
            .map_err(|e| VoiceError::from_reqwest(e, self.timeout))
    }

    /// Checks `GET {base}/models`, which every OpenAI-compatible server serves.
    async fn reachable(&self) -> bool {
        let rb = match self.authorize(self.client.get(self.url("models"))) {
            Ok(rb) => rb.timeout(HEALTH_CHECK_TIMEOUT),
            Err(_) => return false,
        };
        match rb.send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, base_url = %self.base_url, "health check failed");
                false
            }
        }
    }
}

// ── Transcription ──

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

/// `POST /audio/transcriptions` with `verbose_json` output.
#[derive(Clone)]
pub struct OpenAiTranscriber {
    endpoint: Endpoint,
    model: String,
}

impl OpenAiTranscriber {
    pub fn new(openai: &OpenAiConfig, config: &TranscriptionConfig) -> Result<Self, VoiceError> {
        Ok(Self {
            endpoint: Endpoint::new(&openai.base_url, openai.api_key.clone(), true, config.timeout())?,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Transcriber for OpenAiTranscriber {
    fn name(&self) -> &str {
        "openai-transcription"
    }

    async fn transcribe(
        &self,
        audio: &[u8],
        format: AudioFormat,
        language: Option<&str>,
    ) -> Result<Transcription, VoiceError> {
        if audio.is_empty() {
            return Err(VoiceError::InvalidInput("audio payload is empty".to_string()));
        }

        let file = Part::bytes(audio.to_vec())
            .file_name(format!("audio.{}", format.extension()))
            .mime_str(format.mime_type())
            .map_err(|e| VoiceError::InvalidInput(e.to_string()))?;
        let mut form = Form::new()
            .part("file", file)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json");
        if let Some(lang) = language {
            form = form.text("language", lang.to_string());
        }

        let rb = self.endpoint.post("audio/transcriptions")?.multipart(form);
        let response = self.endpoint.send(rb).await?;
        let body: VerboseTranscription = self.endpoint.json(response).await?;

        let features = match format {
            AudioFormat::Wav => wav::features(audio),
            _ => None,
        };
        let text = body.text.trim().to_string();

        tracing::debug!(chars = text.len(), language = ?body.language, "transcription received");

        Ok(Transcription {
            confidence: Some(estimate_confidence(&text, features.as_ref())),
            language: body.language.or_else(|| language.map(str::to_string)),
            duration_secs: body.duration.or(features.map(|f| f.duration_secs)),
            text,
        })
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus::from_ok(self.endpoint.has_credentials())
    }
}

// ── Synthesis ──

/// `POST /audio/speech`, returning MP3.
#[derive(Clone)]
pub struct OpenAiSynthesizer {
    endpoint: Endpoint,
    model: String,
    default_voice: String,
    speed: f32,
}

impl OpenAiSynthesizer {
    pub fn new(openai: &OpenAiConfig, config: &SynthesisConfig) -> Result<Self, VoiceError> {
        Ok(Self {
            endpoint: Endpoint::new(&openai.base_url, openai.api_key.clone(), true, config.timeout())?,
            model: config.model.clone(),
            default_voice: config.voice.clone(),
            speed: config.speed.clamp(0.25, 4.0),
        })
    }
}

#[async_trait]
impl Synthesizer for OpenAiSynthesizer {
    fn name(&self) -> &str {
        "openai-speech"
    }

    fn voices(&self) -> Vec<String> {
        OPENAI_VOICES.iter().map(|v| v.to_string()).collect()
    }

    async fn synthesize(&self, request: &SpeechRequest) -> Result<SynthesizedAudio, VoiceError> {
        validate_speech_text(&request.text)?;
        let voice = resolve_voice(request.voice.as_deref(), &self.voices(), &self.default_voice);

        let payload = json!({
            "model": self.model,
            "input": request.text,
            "voice": voice,
            "response_format": "mp3",
            "speed": self.speed,
        });
        let rb = self.endpoint.post("audio/speech")?.json(&payload);
        let response = self.endpoint.send(rb).await?;
        let data = response
            .bytes()
            .await
            .map_err(|e| VoiceError::from_reqwest(e, self.endpoint.timeout))?;

        if data.is_empty() {
            return Err(VoiceError::InvalidResponse("empty audio body".to_string()));
        }

        Ok(SynthesizedAudio {
            data: data.to_vec(),
            format: AudioFormat::Mp3,
            voice,
        })
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus::from_ok(self.endpoint.has_credentials())
    }
}

// ── Completion ──

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    total_tokens: u32,
}

/// `POST /chat/completions` against the hosted API or a local server.
#[derive(Clone)]
pub struct OpenAiChat {
    name: &'static str,
    endpoint: Endpoint,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiChat {
    /// Hosted OpenAI-compatible API; requires a key.
    pub fn new(openai: &OpenAiConfig, config: &CompletionConfig) -> Result<Self, VoiceError> {
        Ok(Self {
            name: "openai-chat",
            endpoint: Endpoint::new(&openai.base_url, openai.api_key.clone(), true, config.timeout())?,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    /// Local model server (Ollama) at `local_base_url`; no key.
    pub fn local(config: &CompletionConfig) -> Result<Self, VoiceError> {
        Ok(Self {
            name: "ollama-chat",
            endpoint: Endpoint::new(&config.local_base_url, None, false, config.timeout())?,
            model: config.local_model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    /// Whether this binding talks to a local model server.
    pub fn is_local(&self) -> bool {
        !self.endpoint.requires_key
    }
}

#[async_trait]
impl ChatEngine for OpenAiChat {
    fn name(&self) -> &str {
        self.name
    }

    async fn complete(&self, turns: &[ChatTurn]) -> Result<Completion, VoiceError> {
        if turns.is_empty() {
            return Err(VoiceError::InvalidInput("no conversation turns".to_string()));
        }

        let payload = json!({
            "model": self.model,
            "messages": turns,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });
        let rb = self.endpoint.post("chat/completions")?.json(&payload);
        let response = self.endpoint.send(rb).await?;
        let body: ChatResponse = self.endpoint.json(response).await?;

        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| VoiceError::InvalidResponse("completion has no content".to_string()))?;

        Ok(Completion {
            text,
            model: body.model.unwrap_or_else(|| self.model.clone()),
            tokens_used: body.usage.map(|u| u.total_tokens),
        })
    }

    async fn health(&self) -> HealthStatus {
        if self.is_local() {
            HealthStatus::from_ok(self.endpoint.reachable().await)
        } else {
            HealthStatus::from_ok(self.endpoint.has_credentials())
        }
    }
}
