use super::state::AppState;
use crate::audio::SourceDescriptor;
use crate::coordinator::{CoordinatorError, RecordingStatus, SetupRequest, StopOutcome};
use crate::error::ErrorCategory;
use crate::session::{OriginContext, SessionError, SessionId, SessionProgress, SessionSummary};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupRecordingRequest {
    /// microphone | system | combined (default: microphone)
    #[serde(default = "default_source")]
    pub source: SourceDescriptor,

    /// Webhook endpoint (default: configured webhook url)
    pub endpoint: Option<String>,

    /// URL of the page being recorded
    #[serde(default)]
    pub url: String,

    /// Page title
    pub title: Option<String>,
}

fn default_source() -> SourceDescriptor {
    SourceDescriptor::Microphone
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    #[serde(flatten)]
    pub status: RecordingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<SessionProgress>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRecordingResponse {
    pub session_id: SessionId,
    pub status: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopRecordingResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<SessionSummary>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub category: ErrorCategory,
}

fn error_response(e: &CoordinatorError) -> Response {
    let status = match e {
        CoordinatorError::NotSetUp => StatusCode::PRECONDITION_FAILED,
        CoordinatorError::Session(SessionError::AlreadyRecording { .. }) => StatusCode::CONFLICT,
        CoordinatorError::Session(SessionError::NotRecording) => StatusCode::NOT_FOUND,
        CoordinatorError::Session(SessionError::InvalidEndpoint { .. }) => StatusCode::BAD_REQUEST,
        _ => match e.category() {
            ErrorCategory::Permission => StatusCode::FORBIDDEN,
            ErrorCategory::Device => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCategory::Network => StatusCode::BAD_GATEWAY,
            ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        },
    };

    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
            category: e.category(),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /recording/status
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    match state.coordinator.status().await {
        Ok(status) => {
            let progress = state.coordinator.progress().await;
            (StatusCode::OK, Json(StatusResponse { status, progress })).into_response()
        }
        Err(e) => {
            error!("Failed to read recording status: {}", e);
            error_response(&e)
        }
    }
}

/// POST /recording/setup
/// Prepare the next session
pub async fn setup_recording(
    State(state): State<AppState>,
    Json(req): Json<SetupRecordingRequest>,
) -> impl IntoResponse {
    let request = SetupRequest {
        source: req.source,
        endpoint: req.endpoint.unwrap_or_else(|| state.default_endpoint.clone()),
        origin: OriginContext::from_page(&req.url, req.title.as_deref()),
    };

    info!("Setup requested: {} audio from {:?}", request.source, req.url);

    match state.coordinator.setup(request).await {
        Ok(response) if response.ready => (StatusCode::OK, Json(response)).into_response(),
        Ok(response) if response.session_id.is_some() => (StatusCode::CONFLICT, Json(response)).into_response(),
        Ok(response) => (StatusCode::UNPROCESSABLE_ENTITY, Json(response)).into_response(),
        Err(e) => {
            error!("Setup failed: {}", e);
            error_response(&e)
        }
    }
}

/// POST /recording/start
/// Start the prepared session
pub async fn start_recording(State(state): State<AppState>) -> impl IntoResponse {
    match state.coordinator.start().await {
        Ok(session_id) => {
            info!("Recording started: {}", session_id);
            (
                StatusCode::OK,
                Json(StartRecordingResponse {
                    session_id,
                    status: "recording".to_string(),
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!("Failed to start recording: {}", e);
            error_response(&e)
        }
    }
}

/// POST /recording/stop
/// Stop the live session, or clear a stale recording flag
pub async fn stop_recording(State(state): State<AppState>) -> impl IntoResponse {
    match state.coordinator.stop_requested().await {
        Ok(StopOutcome::Stopped(summary)) => (
            StatusCode::OK,
            Json(StopRecordingResponse {
                status: "stopped".to_string(),
                session_id: Some(summary.session_id.clone()),
                summary: Some(summary),
            }),
        )
            .into_response(),
        Ok(StopOutcome::StaleCleared(session_id)) => (
            StatusCode::OK,
            Json(StopRecordingResponse {
                status: "stale-cleared".to_string(),
                session_id,
                summary: None,
            }),
        )
            .into_response(),
        Ok(StopOutcome::Stopping(session_id)) => (
            StatusCode::ACCEPTED,
            Json(StopRecordingResponse {
                status: "stopping".to_string(),
                session_id: Some(session_id),
                summary: None,
            }),
        )
            .into_response(),
        Ok(StopOutcome::NotRecording) => (
            StatusCode::OK,
            Json(StopRecordingResponse {
                status: "not-recording".to_string(),
                session_id: None,
                summary: None,
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to stop recording: {}", e);
            error_response(&e)
        }
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
