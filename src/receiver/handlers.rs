use super::ledger::{Delivery, ReceiverStats};
use super::state::ReceiverState;
use crate::dispatch::ChunkPayload;
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: ReceiverStats,
    pub active_sessions: usize,
    /// Milliseconds since the history was last reset
    pub uptime: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    uptime: i64,
    total_sessions: u64,
    total_chunks: u64,
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl MessageResponse {
    fn message(text: &str) -> Json<Self> {
        Json(Self {
            message: Some(text.to_string()),
            error: None,
        })
    }

    fn error(text: &str) -> Json<Self> {
        Json(Self {
            message: None,
            error: Some(text.to_string()),
        })
    }
}

fn delivery(headers: &HeaderMap) -> Delivery {
    Delivery {
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        content_length: headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok()),
    }
}

fn uptime_ms(stats: &ReceiverStats) -> i64 {
    (Utc::now() - stats.server_start_time).num_milliseconds()
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /webhook/meeting-audio
pub async fn receive_chunk(
    State(state): State<ReceiverState>,
    headers: HeaderMap,
    Json(payload): Json<ChunkPayload>,
) -> impl IntoResponse {
    if payload.recording_session_id.is_empty() {
        warn!("Rejected chunk without a session id");
        return (
            StatusCode::BAD_REQUEST,
            MessageResponse::error("recordingSessionId is required"),
        )
            .into_response();
    }

    let receipt = state.ledger.write().await.record(&payload, delivery(&headers));

    let position = if payload.is_first_chunk {
        "first"
    } else if payload.is_last_chunk {
        "last"
    } else {
        "middle"
    };
    info!(
        "Chunk {} received for {} ({}, {} chars, {})",
        payload.chunk_index,
        payload.recording_session_id,
        payload.meeting_id,
        payload.audio.len(),
        position
    );

    (StatusCode::OK, Json(receipt)).into_response()
}

/// GET /api/stats
pub async fn get_stats(State(state): State<ReceiverState>) -> impl IntoResponse {
    let ledger = state.ledger.read().await;
    let stats = ledger.stats().clone();
    Json(StatsResponse {
        active_sessions: ledger.active_sessions(),
        uptime: uptime_ms(&stats),
        stats,
    })
}

/// GET /api/sessions
pub async fn list_sessions(State(state): State<ReceiverState>) -> impl IntoResponse {
    Json(state.ledger.read().await.sessions())
}

/// GET /api/chunks?limit=N (default 50)
pub async fn list_chunks(State(state): State<ReceiverState>, Query(query): Query<LimitQuery>) -> impl IntoResponse {
    let limit = query.limit.filter(|&n| n > 0).unwrap_or(50);
    Json(state.ledger.read().await.chunks(limit))
}

/// GET /api/webhook-attempts?limit=N (default 20)
pub async fn list_attempts(
    State(state): State<ReceiverState>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    let limit = query.limit.filter(|&n| n > 0).unwrap_or(20);
    Json(state.ledger.read().await.attempts(limit))
}

/// GET /api/session/:session_id
pub async fn get_session(State(state): State<ReceiverState>, Path(session_id): Path<String>) -> impl IntoResponse {
    match state.ledger.read().await.session(&session_id) {
        Some(detail) => (StatusCode::OK, Json(detail)).into_response(),
        None => (StatusCode::NOT_FOUND, MessageResponse::error("Session not found")).into_response(),
    }
}

/// POST /api/reset
pub async fn reset(State(state): State<ReceiverState>) -> impl IntoResponse {
    state.ledger.write().await.reset();
    info!("Receiver history reset");
    MessageResponse::message("Dashboard data reset successfully")
}

/// GET /health
pub async fn health_check(State(state): State<ReceiverState>) -> impl IntoResponse {
    let ledger = state.ledger.read().await;
    let stats = ledger.stats();
    Json(HealthResponse {
        status: "healthy",
        uptime: uptime_ms(stats),
        total_sessions: stats.total_sessions,
        total_chunks: stats.total_chunks,
    })
}
