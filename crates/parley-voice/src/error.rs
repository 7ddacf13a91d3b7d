use std::time::Duration;
use thiserror::Error;

/// Failure of a transcription, synthesis or completion call.
///
/// Provider-specific failures are translated into these variants at the
/// adapter boundary. The payloads carry diagnostic text for server logs and
/// must not be forwarded to clients.
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider rejected the request: {0}")]
    Rejected(String),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl VoiceError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transport(_))
    }

    pub(crate) fn from_reqwest(e: reqwest::Error, timeout: Duration) -> Self {
        if e.is_timeout() {
            Self::Timeout(timeout)
        } else if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else if e.is_builder() {
            Self::Config(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }

    /// Maps a non-success HTTP status. Rate limiting and server errors are
    /// transient; any other status is a rejection.
    pub(crate) fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let detail = format!("{status}: {}", truncate(body, 512));
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Self::Transport(detail)
        } else {
            Self::Rejected(detail)
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn only_timeout_and_transport_are_transient() {
        assert!(VoiceError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(VoiceError::Transport("reset".into()).is_transient());
        assert!(!VoiceError::Rejected("401".into()).is_transient());
        assert!(!VoiceError::InvalidInput("blank".into()).is_transient());
        assert!(!VoiceError::InvalidResponse("bad json".into()).is_transient());
        assert!(!VoiceError::Config("no key".into()).is_transient());
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            VoiceError::from_status(StatusCode::BAD_REQUEST, "nope"),
            VoiceError::Rejected(_)
        ));
        assert!(matches!(
            VoiceError::from_status(StatusCode::SERVICE_UNAVAILABLE, ""),
            VoiceError::Transport(_)
        ));
        assert!(VoiceError::from_status(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
