//! Parley server library logic.

pub mod api_audio;
pub mod api_chat;
pub mod api_sessions;
pub mod api_ws;
pub mod audio;
pub mod background;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod providers;
pub mod ws_state;

use crate::audio::{AudioStore, AUDIO_URL_PREFIX};
use crate::config::Config;
use crate::error::ServiceError;
use crate::orchestrator::Orchestrator;
use crate::providers::{Providers, ServiceHealth};
use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{get, post},
    Extension, Json, Router,
};
use parley_db::DbPool;
use parley_sessions::SessionError;
use parley_voice::HealthStatus;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// Turn pipeline over the configured providers.
    pub orchestrator: Orchestrator,
    /// Connection manager for WebSockets.
    pub connection_manager: api_ws::ConnectionManager,
    /// Where synthesized replies are written and served from.
    pub audio: AudioStore,
    /// Largest accepted audio payload, in bytes.
    pub max_audio_bytes: usize,
    /// Allowed CORS origins; empty allows any.
    pub cors_origins: Vec<String>,
}

impl AppState {
    pub fn new(pool: DbPool, providers: Providers, config: &Config) -> Self {
        let audio = AudioStore::new(&config.audio.storage_dir);
        let orchestrator = Orchestrator::new(
            pool.clone(),
            providers,
            audio.clone(),
            config.session.history_window,
            config.synthesis.max_retries,
        );
        Self {
            pool,
            orchestrator,
            connection_manager: api_ws::ConnectionManager::new(),
            audio,
            max_audio_bytes: config.audio.max_bytes(),
            cors_origins: config.server.cors_origins.clone(),
        }
    }
}

/// Runs blocking store work on the blocking pool with a pooled connection.
pub(crate) async fn with_conn<T, F>(pool: &DbPool, f: F) -> Result<T, ServiceError>
where
    F: FnOnce(&rusqlite::Connection) -> Result<T, SessionError> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let conn = pool
            .get()
            .map_err(|e| ServiceError::Internal(format!("connection pool: {e}")))?;
        f(&conn).map_err(ServiceError::from)
    })
    .await
    .map_err(|e| ServiceError::Internal(format!("blocking task failed: {e}")))?
}

/// Maximum request body size (2 MiB) outside the audio upload routes.
const MAX_REQUEST_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Headroom on audio routes for multipart framing and text fields.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub version: &'static str,
    pub services: Vec<ServiceHealth>,
}

/// Health check handler. Always 200; the body carries the verdict.
async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<HealthReport> {
    let db_ok = with_conn(&state.pool, |conn| {
        conn.query_row("SELECT 1", [], |_| Ok(()))
            .map_err(SessionError::from)
    })
    .await
    .is_ok();

    let mut services = vec![ServiceHealth {
        name: "database".to_string(),
        status: HealthStatus::from_ok(db_ok),
    }];
    services.extend(state.orchestrator.providers().health().await);

    let status = HealthStatus::from_ok(services.iter().all(|s| s.status == HealthStatus::Healthy));
    if status == HealthStatus::Unhealthy {
        let down: Vec<&str> = services
            .iter()
            .filter(|s| s.status == HealthStatus::Unhealthy)
            .map(|s| s.name.as_str())
            .collect();
        tracing::warn!(services = ?down, "health check reports unhealthy services");
    }

    Json(HealthReport {
        status,
        version: env!("CARGO_PKG_VERSION"),
        services,
    })
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(parsed))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let audio_routes = Router::new()
        .route("/speech-to-text", post(api_audio::speech_to_text_handler))
        .route("/voice-interaction", post(api_audio::voice_interaction_handler))
        .layer(DefaultBodyLimit::max(
            state.max_audio_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES),
        ));

    let router = Router::new()
        .route("/health", get(health))
        .route(
            "/sessions",
            post(api_sessions::create_session_handler).get(api_sessions::list_sessions_handler),
        )
        .route(
            "/sessions/{session_id}",
            get(api_sessions::get_session_handler).delete(api_sessions::delete_session_handler),
        )
        .route(
            "/sessions/{session_id}/messages",
            get(api_sessions::list_messages_handler),
        )
        .route(
            "/sessions/{session_id}/summary",
            get(api_sessions::summary_handler),
        )
        .route(
            "/sessions/{session_id}/insights",
            get(api_sessions::insights_handler),
        )
        .route("/stats", get(api_sessions::stats_handler))
        .route("/chat", post(api_chat::chat_handler))
        .route("/text-to-speech", post(api_chat::text_to_speech_handler))
        .route("/ws", get(api_ws::ws_handler))
        .route("/ws/stats", get(api_ws::ws_stats_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .merge(audio_routes)
        .nest_service(AUDIO_URL_PREFIX, ServeDir::new(state.audio.dir()));

    let cors = cors_layer(&state.cors_origins);

    router
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(Extension(Arc::new(state)))
}
