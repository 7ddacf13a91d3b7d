//! Background tasks for the Parley server.
//!
//! Includes:
//! - Marking idle sessions inactive.

use crate::{with_conn, AppState};
use chrono::{SecondsFormat, Utc};
use parley_sessions::expire_idle_sessions;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Cutoff timestamp for sessions idle longer than `timeout`.
fn idle_cutoff(timeout: Duration) -> String {
    let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
    let cutoff = Utc::now()
        .checked_sub_signed(timeout)
        .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
    cutoff.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Runs one sweep and returns the ids of sessions marked inactive.
pub async fn sweep_idle_sessions(
    state: &AppState,
    timeout: Duration,
) -> Result<Vec<String>, crate::error::ServiceError> {
    let cutoff = idle_cutoff(timeout);
    with_conn(&state.pool, move |conn| expire_idle_sessions(conn, &cutoff)).await
}

/// Starts the session expiry task.
///
/// Runs indefinitely, marking sessions without activity for
/// `timeout_minutes` as inactive every `interval`.
pub async fn start_expiry_task(state: Arc<AppState>, timeout_minutes: u64, interval: Duration) {
    if timeout_minutes == 0 {
        tracing::warn!("session expiry disabled (timeout_minutes=0)");
        return;
    }
    let timeout = Duration::from_secs(timeout_minutes.saturating_mul(60));

    tracing::info!(
        timeout_minutes,
        interval_secs = interval.as_secs(),
        "starting session expiry task"
    );

    loop {
        sleep(interval).await;

        match sweep_idle_sessions(&state, timeout).await {
            Ok(expired) => {
                if !expired.is_empty() {
                    tracing::info!(count = expired.len(), "marked idle sessions inactive");
                    for session_id in expired {
                        tracing::debug!(session_id = %session_id, "session expired");
                    }
                }
            }
            Err(e) => {
                tracing::error!("failed to expire idle sessions: {}", e);
            }
        }
    }
}
