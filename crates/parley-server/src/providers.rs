//! Resolves the configured provider bindings once at startup.

use crate::config::Config;
use parley_voice::{
    ChatEngine, FallbackChatEngine, HealthStatus, LocalSynthesizer, OpenAiChat,
    OpenAiSynthesizer, OpenAiTranscriber, ProviderKind, Synthesizer, Transcriber, VoiceError,
    WhisperCppTranscriber,
};
use serde::Serialize;
use std::sync::Arc;

/// The three capabilities the orchestrator drives.
#[derive(Clone)]
pub struct Providers {
    pub transcriber: Arc<dyn Transcriber>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub chat: Arc<dyn ChatEngine>,
}

/// One line of the health report.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub name: String,
    pub status: HealthStatus,
}

impl Providers {
    /// Builds the bindings selected by `transcription.provider`,
    /// `synthesis.provider` and `completion.provider`.
    pub fn from_config(config: &Config) -> Result<Self, VoiceError> {
        let transcriber: Arc<dyn Transcriber> = match config.transcription.provider {
            ProviderKind::OpenAi => {
                Arc::new(OpenAiTranscriber::new(&config.openai, &config.transcription)?)
            }
            ProviderKind::Local => Arc::new(WhisperCppTranscriber::new(&config.transcription)),
        };

        let synthesizer: Arc<dyn Synthesizer> = match config.synthesis.provider {
            ProviderKind::OpenAi => Arc::new(OpenAiSynthesizer::new(&config.openai, &config.synthesis)?),
            ProviderKind::Local => Arc::new(LocalSynthesizer::new(&config.synthesis)),
        };

        let chat: Arc<dyn ChatEngine> = match config.completion.provider {
            ProviderKind::OpenAi => Arc::new(OpenAiChat::new(&config.openai, &config.completion)?),
            ProviderKind::Local => {
                let local: Arc<dyn ChatEngine> = Arc::new(OpenAiChat::local(&config.completion)?);
                if config.completion.fallback_to_openai {
                    let hosted: Arc<dyn ChatEngine> =
                        Arc::new(OpenAiChat::new(&config.openai, &config.completion)?);
                    Arc::new(FallbackChatEngine::new(local, hosted))
                } else {
                    local
                }
            }
        };

        tracing::info!(
            transcriber = transcriber.name(),
            synthesizer = synthesizer.name(),
            chat = chat.name(),
            "providers configured"
        );

        Ok(Self {
            transcriber,
            synthesizer,
            chat,
        })
    }

    /// Queries every provider's health concurrently.
    pub async fn health(&self) -> Vec<ServiceHealth> {
        let (stt, tts, chat) = tokio::join!(
            self.transcriber.health(),
            self.synthesizer.health(),
            self.chat.health()
        );
        vec![
            ServiceHealth {
                name: self.transcriber.name().to_string(),
                status: stt,
            },
            ServiceHealth {
                name: self.synthesizer.name().to_string(),
                status: tts,
            },
            ServiceHealth {
                name: self.chat.name().to_string(),
                status: chat,
            },
        ]
    }
}
