//! Multipart audio endpoints: transcription only, and full voice turns.

use crate::api_sessions::bind_session;
use crate::audio::validate_upload;
use crate::error::ServiceError;
use crate::orchestrator::{ignore_progress, TurnInput, TurnOptions};
use crate::AppState;
use axum::{
    extract::{Extension, Multipart},
    response::Json,
};
use parley_voice::Transcription;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Name of the multipart field carrying the recording.
const AUDIO_FIELD: &str = "audio_file";

/// A parsed upload: the recording plus any plain text fields.
struct AudioForm {
    data: Vec<u8>,
    file_name: Option<String>,
    fields: HashMap<String, String>,
}

impl AudioForm {
    /// Non-blank value of a text field.
    fn field(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }
}

async fn read_form(mut multipart: Multipart) -> Result<AudioForm, ServiceError> {
    let mut audio: Option<(Vec<u8>, Option<String>)> = None;
    let mut fields = HashMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServiceError::Validation(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == AUDIO_FIELD {
            let file_name = field.file_name().map(str::to_string);
            let data = field
                .bytes()
                .await
                .map_err(|e| ServiceError::Validation(e.body_text()))?;
            audio = Some((data.to_vec(), file_name));
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| ServiceError::Validation(e.body_text()))?;
            fields.insert(name, value);
        }
    }

    let (data, file_name) = audio.ok_or_else(|| {
        ServiceError::Validation(format!("missing multipart field `{AUDIO_FIELD}`"))
    })?;
    Ok(AudioForm {
        data,
        file_name,
        fields,
    })
}

#[derive(Debug, Serialize)]
pub struct TranscriptionResponse {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl From<Transcription> for TranscriptionResponse {
    fn from(t: Transcription) -> Self {
        Self {
            text: t.text,
            confidence: t.confidence,
            language: t.language,
            duration: t.duration_secs,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VoiceInteractionResponse {
    pub transcription: TranscriptionResponse,
    pub reply_text: String,
    pub session_id: String,
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
}

/// POST /speech-to-text
pub async fn speech_to_text_handler(
    Extension(state): Extension<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<TranscriptionResponse>, ServiceError> {
    let form = read_form(multipart).await?;
    let format = validate_upload(&form.data, form.file_name.as_deref(), state.max_audio_bytes)?;
    let language = form.field("language");

    let transcription = state
        .orchestrator
        .providers()
        .transcriber
        .transcribe(&form.data, format, language.as_deref())
        .await
        .map_err(ServiceError::transcription)?;
    if transcription.text.trim().is_empty() {
        return Err(ServiceError::TranscriptionFailed("transcript is empty".to_string()));
    }

    tracing::info!(
        bytes = form.data.len(),
        format = %format,
        chars = transcription.text.len(),
        "audio transcribed"
    );
    Ok(Json(transcription.into()))
}

/// POST /voice-interaction
pub async fn voice_interaction_handler(
    Extension(state): Extension<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<VoiceInteractionResponse>, ServiceError> {
    let form = read_form(multipart).await?;
    let format = validate_upload(&form.data, form.file_name.as_deref(), state.max_audio_bytes)?;

    let session_id = bind_session(&state.pool, form.field("session_id")).await?;
    let language = form.field("language");
    let options = TurnOptions {
        synthesize: true,
        voice: form.field("voice"),
        language: language.clone(),
    };
    let input = TurnInput::Audio {
        data: form.data,
        format,
        language,
    };

    let outcome = state
        .orchestrator
        .run_turn(&session_id, input, &options, &ignore_progress)
        .await?;

    let transcription = match outcome.transcription {
        Some(t) => TranscriptionResponse::from(t),
        None => TranscriptionResponse {
            text: outcome.user_message.content,
            confidence: None,
            language: None,
            duration: None,
        },
    };
    Ok(Json(VoiceInteractionResponse {
        transcription,
        reply_text: outcome.assistant_message.content,
        session_id: outcome.session_id,
        message_id: outcome.assistant_message.message_id,
        audio_url: outcome.audio.map(|a| a.url),
    }))
}
