use parley_types::SessionStatus;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{conversion_error, now_timestamp, SessionError};

/// A conversation session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    /// Opaque public identifier (UUID v4).
    pub session_id: String,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Creation timestamp (RFC 3339, UTC).
    pub created_at: String,
    /// Last activity timestamp (RFC 3339, UTC).
    pub updated_at: String,
}

/// Aggregate counts reported by the statistics endpoint.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionStats {
    pub total_sessions: u64,
    pub active_sessions: u64,
    pub inactive_sessions: u64,
    pub total_messages: u64,
}

const SESSION_COLUMNS: &str = "session_id, status, created_at, updated_at";

/// Creates a new active session with a fresh identifier.
pub fn create_session(conn: &Connection) -> Result<Session, SessionError> {
    let session_id = Uuid::new_v4().to_string();
    let now = now_timestamp();

    let session = conn.query_row(
        &format!(
            "INSERT INTO sessions (session_id, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             RETURNING {SESSION_COLUMNS}"
        ),
        params![session_id, SessionStatus::Active.as_str(), now],
        map_row_to_session,
    )?;

    tracing::debug!(session_id = %session.session_id, "session created");
    Ok(session)
}

/// Retrieves a session by its public ID.
pub fn get_session(conn: &Connection, session_id: &str) -> Result<Session, SessionError> {
    conn.query_row(
        &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?1"),
        [session_id],
        map_row_to_session,
    )
    .optional()?
    .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
}

/// Lists sessions, most recently active first.
pub fn list_sessions(conn: &Connection, limit: u32) -> Result<Vec<Session>, SessionError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SESSION_COLUMNS} FROM sessions
         ORDER BY updated_at DESC, id DESC
         LIMIT ?1"
    ))?;

    let rows = stmt.query_map([limit], map_row_to_session)?;
    let mut sessions = Vec::new();
    for row in rows {
        sessions.push(row?);
    }
    Ok(sessions)
}

/// Sets the status of a session and bumps `updated_at`.
pub fn set_session_status(
    conn: &Connection,
    session_id: &str,
    status: SessionStatus,
) -> Result<(), SessionError> {
    let count = conn.execute(
        "UPDATE sessions SET status = ?1, updated_at = ?2 WHERE session_id = ?3",
        params![status.as_str(), now_timestamp(), session_id],
    )?;
    if count == 0 {
        return Err(SessionError::NotFound(session_id.to_string()));
    }
    Ok(())
}

/// Deletes a session together with every message it owns.
///
/// Messages are removed explicitly inside the same transaction as the
/// session row, so no orphan survives even on a connection opened without
/// `PRAGMA foreign_keys`.
pub fn delete_session(conn: &Connection, session_id: &str) -> Result<(), SessionError> {
    let tx = rusqlite::Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    let removed_messages = tx.execute("DELETE FROM messages WHERE session_id = ?1", [session_id])?;
    let count = tx.execute("DELETE FROM sessions WHERE session_id = ?1", [session_id])?;
    if count == 0 {
        // Dropping the transaction rolls it back.
        return Err(SessionError::NotFound(session_id.to_string()));
    }
    tx.commit()?;

    tracing::info!(session_id, removed_messages, "session deleted");
    Ok(())
}

/// Marks every active session whose last activity is older than `cutoff`
/// (an RFC 3339 timestamp) as inactive.
///
/// Returns the IDs of the sessions that changed status.
pub fn expire_idle_sessions(conn: &Connection, cutoff: &str) -> Result<Vec<String>, SessionError> {
    let mut stmt = conn.prepare(
        "UPDATE sessions SET status = 'inactive'
         WHERE status = 'active' AND updated_at < ?1
         RETURNING session_id",
    )?;

    let rows = stmt.query_map([cutoff], |row| row.get::<_, String>(0))?;
    let mut expired = Vec::new();
    for row in rows {
        expired.push(row?);
    }
    Ok(expired)
}

/// Counts sessions by status and the total number of stored messages.
pub fn session_stats(conn: &Connection) -> Result<SessionStats, SessionError> {
    let mut stats = SessionStats::default();

    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM sessions GROUP BY status")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
    for row in rows {
        let (status, count) = row?;
        let count = count.max(0) as u64;
        stats.total_sessions += count;
        match status.parse::<SessionStatus>() {
            Ok(SessionStatus::Active) => stats.active_sessions += count,
            Ok(SessionStatus::Inactive) => stats.inactive_sessions += count,
            Err(e) => tracing::warn!(error = %e, "unexpected session status in store"),
        }
    }

    let messages: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
    stats.total_messages = messages.max(0) as u64;

    Ok(stats)
}

fn map_row_to_session(row: &Row) -> rusqlite::Result<Session> {
    let status_str: String = row.get(1)?;
    let status = status_str
        .parse::<SessionStatus>()
        .map_err(|e| conversion_error(1, e))?;

    Ok(Session {
        session_id: row.get(0)?,
        status,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::setup_db;

    #[test]
    fn create_then_get() {
        let conn = setup_db();
        let created = create_session(&conn).unwrap();
        assert_eq!(created.status, SessionStatus::Active);
        assert_eq!(created.created_at, created.updated_at);
        assert!(Uuid::parse_str(&created.session_id).is_ok());

        let fetched = get_session(&conn, &created.session_id).unwrap();
        assert_eq!(fetched, created);
    }

    #[test]
    fn get_missing_is_not_found() {
        let conn = setup_db();
        match get_session(&conn, "nope") {
            Err(SessionError::NotFound(id)) => assert_eq!(id, "nope"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn delete_missing_is_not_found() {
        let conn = setup_db();
        assert!(matches!(
            delete_session(&conn, "nope"),
            Err(SessionError::NotFound(_))
        ));
    }

    #[test]
    fn status_transitions() {
        let conn = setup_db();
        let s = create_session(&conn).unwrap();
        set_session_status(&conn, &s.session_id, SessionStatus::Inactive).unwrap();
        assert_eq!(
            get_session(&conn, &s.session_id).unwrap().status,
            SessionStatus::Inactive
        );
        assert!(matches!(
            set_session_status(&conn, "missing", SessionStatus::Active),
            Err(SessionError::NotFound(_))
        ));
    }

    #[test]
    fn expire_only_touches_stale_active_sessions() {
        let conn = setup_db();
        let stale = create_session(&conn).unwrap();
        let fresh = create_session(&conn).unwrap();
        conn.execute(
            "UPDATE sessions SET updated_at = '2020-01-01T00:00:00.000000Z' WHERE session_id = ?1",
            [&stale.session_id],
        )
        .unwrap();

        let expired = expire_idle_sessions(&conn, "2021-01-01T00:00:00.000000Z").unwrap();
        assert_eq!(expired, vec![stale.session_id.clone()]);
        assert_eq!(
            get_session(&conn, &fresh.session_id).unwrap().status,
            SessionStatus::Active
        );

        // Second sweep finds nothing new.
        assert!(expire_idle_sessions(&conn, "2021-01-01T00:00:00.000000Z")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn list_orders_by_recent_activity() {
        let conn = setup_db();
        let older = create_session(&conn).unwrap();
        let newer = create_session(&conn).unwrap();
        conn.execute(
            "UPDATE sessions SET updated_at = '2020-01-01T00:00:00.000000Z' WHERE session_id = ?1",
            [&older.session_id],
        )
        .unwrap();

        let listed = list_sessions(&conn, 10).unwrap();
        let ids: Vec<_> = listed.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(ids, vec![newer.session_id.as_str(), older.session_id.as_str()]);

        assert_eq!(list_sessions(&conn, 1).unwrap().len(), 1);
    }

    #[test]
    fn stats_count_by_status() {
        let conn = setup_db();
        let a = create_session(&conn).unwrap();
        create_session(&conn).unwrap();
        set_session_status(&conn, &a.session_id, SessionStatus::Inactive).unwrap();

        let stats = session_stats(&conn).unwrap();
        assert_eq!(
            stats,
            SessionStats {
                total_sessions: 2,
                active_sessions: 1,
                inactive_sessions: 1,
                total_messages: 0,
            }
        );
    }
}
