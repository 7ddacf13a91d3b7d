use parley_types::Role;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{conversion_error, now_timestamp, SessionError};

/// A stored conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Insertion sequence; the replay order within a session.
    #[serde(skip)]
    pub seq: i64,
    pub message_id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: String,
    /// Free-form structured metadata (transcription details, voice used, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Retrieval path of synthesized audio, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
}

/// Parameters for appending a message.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub metadata: Option<serde_json::Value>,
}

impl NewMessage {
    pub fn new(session_id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            role,
            content: content.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

const MESSAGE_COLUMNS: &str =
    "seq, message_id, session_id, role, content, metadata_json, audio_url, created_at";

/// Appends a message to a session's log.
///
/// The session row is touched in the same transaction: `updated_at` moves to
/// the message timestamp and an inactive session becomes active again.
pub fn append_message(conn: &Connection, msg: &NewMessage) -> Result<Message, SessionError> {
    let metadata_json = msg
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let message_id = Uuid::new_v4().to_string();
    let now = now_timestamp();

    // IMMEDIATE takes the write lock up front; a deferred read-then-write
    // upgrade can fail with SQLITE_BUSY under WAL.
    let tx = rusqlite::Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    let touched = tx.execute(
        "UPDATE sessions SET updated_at = ?1, status = 'active' WHERE session_id = ?2",
        params![now, msg.session_id],
    )?;
    if touched == 0 {
        return Err(SessionError::NotFound(msg.session_id.clone()));
    }

    let message = tx.query_row(
        &format!(
            "INSERT INTO messages (message_id, session_id, role, content, metadata_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             RETURNING {MESSAGE_COLUMNS}"
        ),
        params![
            message_id,
            msg.session_id,
            msg.role.as_str(),
            msg.content,
            metadata_json,
            now,
        ],
        map_row_to_message,
    )?;

    tx.commit()?;

    tracing::debug!(
        session_id = %message.session_id,
        message_id = %message.message_id,
        role = %message.role,
        "message appended"
    );
    Ok(message)
}

/// Retrieves a single message by ID.
pub fn get_message(conn: &Connection, message_id: &str) -> Result<Message, SessionError> {
    conn.query_row(
        &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE message_id = ?1"),
        [message_id],
        map_row_to_message,
    )
    .optional()?
    .ok_or_else(|| SessionError::MessageNotFound(message_id.to_string()))
}

/// Lists every message in a session in append order.
///
/// Fails with [`SessionError::NotFound`] when the session does not exist,
/// so an empty session and a missing one are distinguishable.
pub fn list_messages(conn: &Connection, session_id: &str) -> Result<Vec<Message>, SessionError> {
    ensure_session_exists(conn, session_id)?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE session_id = ?1
         ORDER BY seq ASC"
    ))?;
    let rows = stmt.query_map([session_id], map_row_to_message)?;

    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}

/// Returns the last `window` messages of a session, oldest first.
///
/// This is the history handed to the completion engine on every turn.
pub fn recent_messages(
    conn: &Connection,
    session_id: &str,
    window: usize,
) -> Result<Vec<Message>, SessionError> {
    ensure_session_exists(conn, session_id)?;
    if window == 0 {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM (
             SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE session_id = ?1
             ORDER BY seq DESC
             LIMIT ?2
         ) ORDER BY seq ASC"
    ))?;
    let limit = i64::try_from(window).unwrap_or(i64::MAX);
    let rows = stmt.query_map(params![session_id, limit], map_row_to_message)?;

    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}

/// Records the audio URL of a message. A message accepts this once.
pub fn attach_audio_url(
    conn: &Connection,
    message_id: &str,
    audio_url: &str,
) -> Result<(), SessionError> {
    let count = conn.execute(
        "UPDATE messages SET audio_url = ?1 WHERE message_id = ?2 AND audio_url IS NULL",
        params![audio_url, message_id],
    )?;
    if count == 1 {
        return Ok(());
    }

    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM messages WHERE message_id = ?1)",
        [message_id],
        |row| row.get(0),
    )?;
    if exists {
        Err(SessionError::AudioAlreadyAttached(message_id.to_string()))
    } else {
        Err(SessionError::MessageNotFound(message_id.to_string()))
    }
}

fn ensure_session_exists(conn: &Connection, session_id: &str) -> Result<(), SessionError> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sessions WHERE session_id = ?1)",
        [session_id],
        |row| row.get(0),
    )?;
    if exists {
        Ok(())
    } else {
        Err(SessionError::NotFound(session_id.to_string()))
    }
}

fn map_row_to_message(row: &Row) -> rusqlite::Result<Message> {
    let role_str: String = row.get(3)?;
    let role = role_str
        .parse::<Role>()
        .map_err(|e| conversion_error(3, e))?;

    let metadata = match row.get::<_, Option<String>>(5)? {
        Some(raw) => Some(serde_json::from_str(&raw).map_err(|e| conversion_error(5, e))?),
        None => None,
    };

    Ok(Message {
        seq: row.get(0)?,
        message_id: row.get(1)?,
        session_id: row.get(2)?,
        role,
        content: row.get(4)?,
        metadata,
        audio_url: row.get(6)?,
        created_at: row.get(7)?,
    })
}
