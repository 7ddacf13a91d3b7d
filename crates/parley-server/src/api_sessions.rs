//! Session endpoints.

use crate::error::ServiceError;
use crate::{with_conn, AppState};
use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::Json,
};
use parley_db::DbPool;
use parley_sessions::{
    conversation_insights, create_session, delete_session, get_session, list_messages,
    list_sessions, session_stats, ConversationInsights, Message, Session, SessionStats,
};
use parley_types::SessionStatus;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Default and ceiling for `GET /sessions?limit=`.
const DEFAULT_LIST_LIMIT: u32 = 20;
const MAX_LIST_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct CreatedSession {
    pub session_id: String,
    pub status: SessionStatus,
}

#[derive(Debug, Serialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub session: Session,
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
pub struct SessionInsights {
    pub session_id: String,
    #[serde(flatten)]
    pub insights: ConversationInsights,
}

/// Returns `requested` if that session exists, otherwise creates a new one
/// when nothing was requested.
pub(crate) async fn bind_session(
    pool: &DbPool,
    requested: Option<String>,
) -> Result<String, ServiceError> {
    match requested {
        Some(id) => {
            let session = with_conn(pool, move |conn| get_session(conn, &id)).await?;
            Ok(session.session_id)
        }
        None => {
            let session = with_conn(pool, create_session).await?;
            tracing::info!(session_id = %session.session_id, "session created");
            Ok(session.session_id)
        }
    }
}

/// POST /sessions
pub async fn create_session_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<(StatusCode, Json<CreatedSession>), ServiceError> {
    let session = with_conn(&state.pool, create_session).await?;
    tracing::info!(session_id = %session.session_id, "session created");
    Ok((
        StatusCode::CREATED,
        Json(CreatedSession {
            session_id: session.session_id,
            status: session.status,
        }),
    ))
}

/// GET /sessions
pub async fn list_sessions_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Session>>, ServiceError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    let sessions = with_conn(&state.pool, move |conn| list_sessions(conn, limit)).await?;
    Ok(Json(sessions))
}

/// GET /sessions/{session_id}
pub async fn get_session_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionDetail>, ServiceError> {
    let detail = with_conn(&state.pool, move |conn| {
        let session = get_session(conn, &session_id)?;
        let messages = list_messages(conn, &session_id)?;
        Ok(SessionDetail { session, messages })
    })
    .await?;
    Ok(Json(detail))
}

/// GET /sessions/{session_id}/messages
pub async fn list_messages_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<Vec<Message>>, ServiceError> {
    let messages = with_conn(&state.pool, move |conn| list_messages(conn, &session_id)).await?;
    Ok(Json(messages))
}

/// DELETE /sessions/{session_id}
pub async fn delete_session_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ServiceError> {
    // Held until the rows are gone so no turn can start on the session meanwhile.
    let Some(_guard) = state.orchestrator.locks().try_acquire(&session_id) else {
        return Err(ServiceError::SessionBusy(session_id));
    };
    let id = session_id.clone();
    with_conn(&state.pool, move |conn| delete_session(conn, &id)).await?;
    tracing::info!(session_id = %session_id, "session deleted");
    Ok(Json(json!({ "status": "deleted" })))
}

/// GET /sessions/{session_id}/summary
pub async fn summary_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ServiceError> {
    let summary = state.orchestrator.summarize(&session_id).await?;
    Ok(Json(json!({ "session_id": session_id, "summary": summary })))
}

/// GET /sessions/{session_id}/insights
pub async fn insights_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionInsights>, ServiceError> {
    let id = session_id.clone();
    let messages = with_conn(&state.pool, move |conn| list_messages(conn, &id)).await?;
    Ok(Json(SessionInsights {
        session_id,
        insights: conversation_insights(&messages),
    }))
}

/// GET /stats
pub async fn stats_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<SessionStats>, ServiceError> {
    let stats = with_conn(&state.pool, session_stats).await?;
    Ok(Json(stats))
}
