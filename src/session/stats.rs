use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::controller::SessionState;
use super::model::SessionId;

/// Final accounting for a completed session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: SessionId,

    /// Chunks acknowledged by the endpoint
    pub chunks_delivered: u64,

    /// Chunks dropped after retries or a permanent rejection
    pub chunks_abandoned: u64,

    /// Encoded audio bytes delivered
    pub bytes_sent: u64,

    pub started_at: DateTime<Utc>,

    /// Total duration in seconds
    pub duration_secs: f64,

    /// Index carried by the final chunk
    pub last_index: Option<u64>,
}

/// Live view of a running session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProgress {
    pub session_id: SessionId,
    pub state: SessionState,
    pub sequence_counter: u64,
    pub chunks_delivered: u64,
    pub chunks_abandoned: u64,
    pub bytes_sent: u64,
    pub started_at: DateTime<Utc>,
}
