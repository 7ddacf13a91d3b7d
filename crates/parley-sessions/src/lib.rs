//! Session store and message log for Parley.
//!
//! A session is a conversation scope; messages are the turns inside it.
//! Both live in SQLite and every function here takes a borrowed
//! [`rusqlite::Connection`] so callers decide pooling and threading.
//!
//! The message log is append-only. Ordering inside a session is the
//! insertion sequence (`seq`), never the wall clock, so two turns written in
//! the same microsecond still replay in the order they were appended. The
//! only mutation a stored message accepts is attaching the URL of its
//! synthesized audio, exactly once.

use chrono::{SecondsFormat, Utc};
use thiserror::Error;

mod insights;
mod messages;
mod sessions;

pub use insights::{conversation_insights, ConversationInsights};
pub use messages::{
    append_message, attach_audio_url, get_message, list_messages, recent_messages, Message,
    NewMessage,
};
pub use sessions::{
    create_session, delete_session, expire_idle_sessions, get_session, list_sessions,
    session_stats, set_session_status, Session, SessionStats,
};

/// Errors that can occur during session and message operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("message not found: {0}")]
    MessageNotFound(String),
    #[error("audio already attached to message {0}")]
    AudioAlreadyAttached(String),
    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Current UTC time in the fixed-width RFC 3339 form stored in every
/// timestamp column. Fixed width keeps lexical and chronological order equal.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Converts a label-parse failure in column `idx` into a rusqlite conversion error.
fn conversion_error(idx: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}
