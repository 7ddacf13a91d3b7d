//! Text chat and standalone text-to-speech endpoints.

use crate::api_sessions::bind_session;
use crate::error::{ApiJson, ServiceError};
use crate::orchestrator::{ignore_progress, TurnInput, TurnOptions};
use crate::AppState;
use axum::{
    extract::Extension,
    http::header,
    response::{IntoResponse, Json},
};
use parley_voice::SpeechRequest;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(alias = "message")]
    pub text: String,
    pub session_id: Option<String>,
    #[serde(default)]
    pub synthesize: bool,
    pub voice: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply_text: String,
    pub session_id: String,
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SpeechBody {
    pub text: String,
    pub voice: Option<String>,
    pub language: Option<String>,
}

/// POST /chat
pub async fn chat_handler(
    Extension(state): Extension<Arc<AppState>>,
    ApiJson(payload): ApiJson<ChatRequest>,
) -> Result<Json<ChatResponse>, ServiceError> {
    if payload.text.trim().is_empty() {
        return Err(ServiceError::Validation("text must not be blank".to_string()));
    }

    let session_id = bind_session(&state.pool, payload.session_id).await?;
    let options = TurnOptions {
        synthesize: payload.synthesize,
        voice: payload.voice,
        language: payload.language,
    };
    let outcome = state
        .orchestrator
        .run_turn(&session_id, TurnInput::Text(payload.text), &options, &ignore_progress)
        .await?;

    Ok(Json(ChatResponse {
        reply_text: outcome.assistant_message.content,
        session_id: outcome.session_id,
        message_id: outcome.assistant_message.message_id,
        audio_url: outcome.audio.map(|a| a.url),
    }))
}

/// POST /text-to-speech
pub async fn text_to_speech_handler(
    Extension(state): Extension<Arc<AppState>>,
    ApiJson(payload): ApiJson<SpeechBody>,
) -> Result<impl IntoResponse, ServiceError> {
    parley_voice::validate_speech_text(&payload.text)
        .map_err(|e| ServiceError::Validation(e.to_string()))?;

    let request = SpeechRequest {
        text: payload.text,
        voice: payload.voice,
        language: payload.language,
    };
    let audio = state
        .orchestrator
        .synthesize_with_retry(&request)
        .await
        .map_err(ServiceError::synthesis)?;

    tracing::debug!(voice = %audio.voice, bytes = audio.data.len(), "speech synthesized");
    Ok(([(header::CONTENT_TYPE, audio.format.mime_type())], audio.data))
}
