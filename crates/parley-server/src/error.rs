//! Service error type and its HTTP mapping.

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use parley_sessions::SessionError;
use parley_voice::VoiceError;
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by the REST and realtime APIs.
///
/// The payload of the upstream and internal variants is diagnostic text for
/// the server log; clients only ever see the generic [`ServiceError::detail`].
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),
    #[error("completion failed: {0}")]
    CompletionFailed(String),
    #[error("synthesis failed: {0}")]
    SynthesisFailed(String),
    #[error("session busy: {0}")]
    SessionBusy(String),
    #[error("upstream timeout: {0}")]
    UpstreamTimeout(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error body: `{detail, error_code}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
    pub error_code: &'static str,
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::TranscriptionFailed(_) | Self::CompletionFailed(_) | Self::SynthesisFailed(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::SessionBusy(_) => StatusCode::CONFLICT,
            Self::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code, shared by HTTP and WebSocket errors.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation_error",
            Self::TranscriptionFailed(_) => "transcription_failed",
            Self::CompletionFailed(_) => "completion_failed",
            Self::SynthesisFailed(_) => "synthesis_failed",
            Self::SessionBusy(_) => "session_busy",
            Self::UpstreamTimeout(_) => "upstream_timeout",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Client-facing message. Not-found and validation messages describe the
    /// request itself and are passed through; everything else is generic.
    pub fn detail(&self) -> String {
        match self {
            Self::NotFound(msg) | Self::Validation(msg) => msg.clone(),
            Self::TranscriptionFailed(_) => "speech transcription failed".to_string(),
            Self::CompletionFailed(_) => "response generation failed".to_string(),
            Self::SynthesisFailed(_) => "speech synthesis failed".to_string(),
            Self::SessionBusy(id) => format!("session {id} is already processing a request"),
            Self::UpstreamTimeout(_) => "upstream provider timed out".to_string(),
            Self::Internal(_) => "internal server error".to_string(),
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            detail: self.detail(),
            error_code: self.code(),
        }
    }

    /// Maps a transcription adapter failure.
    pub fn transcription(e: VoiceError) -> Self {
        match e {
            VoiceError::Timeout(d) => Self::UpstreamTimeout(format!("transcription after {d:?}")),
            VoiceError::InvalidInput(msg) => Self::Validation(msg),
            other => Self::TranscriptionFailed(other.to_string()),
        }
    }

    /// Maps a conversation engine failure.
    pub fn completion(e: VoiceError) -> Self {
        match e {
            VoiceError::Timeout(d) => Self::UpstreamTimeout(format!("completion after {d:?}")),
            VoiceError::InvalidInput(msg) => Self::Validation(msg),
            other => Self::CompletionFailed(other.to_string()),
        }
    }

    /// Maps a synthesis adapter failure.
    pub fn synthesis(e: VoiceError) -> Self {
        match e {
            VoiceError::Timeout(d) => Self::UpstreamTimeout(format!("synthesis after {d:?}")),
            VoiceError::InvalidInput(msg) => Self::Validation(msg),
            other => Self::SynthesisFailed(other.to_string()),
        }
    }
}

impl From<SessionError> for ServiceError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotFound(id) => Self::NotFound(format!("session not found: {id}")),
            SessionError::MessageNotFound(id) => Self::NotFound(format!("message not found: {id}")),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "request failed");
        } else {
            tracing::debug!(error = %self, code = self.code(), "request rejected");
        }
        (status, Json(self.body())).into_response()
    }
}

/// `Json` extractor whose rejection uses the service error body.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ServiceError::Validation(rejection.body_text())),
        }
    }
}
