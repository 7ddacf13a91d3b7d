//! Server events of the realtime channel, as seen by a client.

use crate::state::{Action, ChatEntry};
use parley_types::Role;
use serde::Deserialize;

/// Events the server sends on `/ws`, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
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
        #[serde(default)]
        confidence: Option<f32>,
        #[serde(default)]
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
        format: String,
    },
    InteractionCompleted,
    Pong,
    Error {
        message: String,
        #[serde(default)]
        error_code: Option<String>,
    },
}

impl ServerEvent {
    /// Parses one text frame.
    pub fn parse(frame: &str) -> serde_json::Result<Self> {
        serde_json::from_str(frame)
    }

    /// The view update this event implies, if any.
    pub fn action(self) -> Option<Action> {
        match self {
            Self::SessionInitialized { session_id } => Some(Action::CreateSession { session_id }),
            Self::TranscriptionCompleted { text, message_id, .. } => {
                Some(Action::ReceiveMessage(ChatEntry {
                    id: message_id,
                    role: Role::User,
                    content: text,
                    audio_url: None,
                    pending: false,
                }))
            }
            Self::ResponseGenerationStarted => Some(Action::SetTyping(true)),
            Self::TextResponse { text, message_id } => Some(Action::ReceiveMessage(ChatEntry {
                id: message_id,
                role: Role::Assistant,
                content: text,
                audio_url: None,
                pending: false,
            })),
            Self::InteractionCompleted | Self::Error { .. } => Some(Action::SetTyping(false)),
            _ => None,
        }
    }
}
