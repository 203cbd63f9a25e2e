use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::dispatch::ChunkPayload;
use crate::session::UNTITLED;

#[derive(Debug, Clone, Copy)]
pub struct LedgerLimits {
    pub max_chunks: usize,
    pub max_attempts: usize,
    pub max_sessions_listed: usize,
}

impl Default for LedgerLimits {
    fn default() -> Self {
        Self {
            max_chunks: 100,
            max_attempts: 50,
            max_sessions_listed: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRecord {
    /// `<session id>-<chunk index>`
    pub id: String,
    pub recording_session_id: String,
    pub meeting_id: String,
    pub meeting_url: String,
    pub chunk_index: u64,
    pub is_first_chunk: bool,
    pub is_last_chunk: bool,
    pub timestamp: String,
    pub received_at: DateTime<Utc>,
    pub duration: f64,
    pub format: String,
    pub audio_size_chars: usize,
    pub audio_size_bytes: u64,
    pub status: String,
    pub source: String,
    pub recording_type: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub meeting_id: String,
    pub meeting_url: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub chunk_count: u64,
    pub total_audio_size: u64,
    pub status: SessionStatus,
    pub first_chunk_received: DateTime<Utc>,
    pub last_chunk_received: DateTime<Utc>,
    pub source: String,
    pub recording_type: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAttempt {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub user_agent: String,
    pub content_length: u64,
    pub meeting_id: String,
    pub chunk_index: u64,
    pub recording_session_id: String,
    pub audio_size_bytes: u64,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiverStats {
    pub total_sessions: u64,
    pub total_chunks: u64,
    pub total_audio_size: u64,
    pub total_webhook_attempts: u64,
    pub successful_webhook_attempts: u64,
    pub server_start_time: DateTime<Utc>,
    pub last_activity: Option<DateTime<Utc>>,
}

impl ReceiverStats {
    fn new() -> Self {
        Self {
            total_sessions: 0,
            total_chunks: 0,
            total_audio_size: 0,
            total_webhook_attempts: 0,
            successful_webhook_attempts: 0,
            server_start_time: Utc::now(),
            last_activity: None,
        }
    }
}

/// Acknowledgement returned to the sender
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub success: bool,
    pub chunk_id: String,
    pub session_id: String,
    pub chunk_index: u64,
    pub total_chunks: u64,
    pub webhook_attempt_id: String,
    /// This index had already been accepted for the session
    pub duplicate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetail {
    pub session: SessionRecord,
    /// Retained chunks of this session, ordered by index
    pub chunks: Vec<ChunkRecord>,
    /// Indices below the highest one seen that never arrived
    pub missing_indices: Vec<u64>,
}

/// Request metadata captured alongside each delivery
#[derive(Debug, Clone, Default)]
pub struct Delivery {
    pub user_agent: Option<String>,
    pub content_length: Option<u64>,
}

/// In-memory history of everything the receiver has accepted
#[derive(Debug)]
pub struct Ledger {
    limits: LedgerLimits,
    sessions: HashMap<String, SessionRecord>,
    chunks: VecDeque<ChunkRecord>,
    attempts: VecDeque<WebhookAttempt>,
    /// Every index accepted per session, independent of the chunk history bound
    received: HashMap<String, BTreeSet<u64>>,
    stats: ReceiverStats,
}

impl Ledger {
    pub fn new(limits: LedgerLimits) -> Self {
        Self {
            limits,
            sessions: HashMap::new(),
            chunks: VecDeque::new(),
            attempts: VecDeque::new(),
            received: HashMap::new(),
            stats: ReceiverStats::new(),
        }
    }

    pub fn record(&mut self, payload: &ChunkPayload, delivery: Delivery) -> Receipt {
        let received_at = Utc::now();
        let audio_size_chars = payload.audio.len();
        let audio_size_bytes = (audio_size_chars as f64 * 0.75).round() as u64;
        let source = non_empty(&payload.source, "unknown");
        let recording_type = non_empty(&payload.recording_type, "general-audio");
        let title = non_empty(&payload.title, UNTITLED);
        let duplicate = !self
            .received
            .entry(payload.recording_session_id.clone())
            .or_default()
            .insert(payload.chunk_index);

        let attempt = WebhookAttempt {
            id: attempt_id(),
            timestamp: received_at,
            user_agent: delivery.user_agent.unwrap_or_else(|| "unknown".to_string()),
            content_length: delivery.content_length.unwrap_or(0),
            meeting_id: payload.meeting_id.clone(),
            chunk_index: payload.chunk_index,
            recording_session_id: payload.recording_session_id.clone(),
            audio_size_bytes,
            status: if duplicate { "duplicate" } else { "processed" }.to_string(),
        };
        let attempt_id = attempt.id.clone();
        self.attempts.push_front(attempt);
        self.attempts.truncate(self.limits.max_attempts);
        self.stats.total_webhook_attempts += 1;
        self.stats.successful_webhook_attempts += 1;

        let chunk_id = format!("{}-{}", payload.recording_session_id, payload.chunk_index);
        let chunk = ChunkRecord {
            id: chunk_id.clone(),
            recording_session_id: payload.recording_session_id.clone(),
            meeting_id: payload.meeting_id.clone(),
            meeting_url: payload.meeting_url.clone(),
            chunk_index: payload.chunk_index,
            is_first_chunk: payload.is_first_chunk,
            is_last_chunk: payload.is_last_chunk,
            timestamp: payload.timestamp.clone(),
            received_at,
            duration: payload.duration,
            format: payload.format.clone(),
            audio_size_chars,
            audio_size_bytes,
            status: "processed".to_string(),
            source: source.clone(),
            recording_type: recording_type.clone(),
            title: title.clone(),
        };
        // A redelivered chunk replaces its earlier record
        self.chunks.retain(|c| c.id != chunk_id);
        self.chunks.push_front(chunk);
        self.chunks.truncate(self.limits.max_chunks);

        let start_time = DateTime::parse_from_rfc3339(&payload.timestamp)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(received_at);
        let stats = &mut self.stats;
        let session = self
            .sessions
            .entry(payload.recording_session_id.clone())
            .or_insert_with(|| {
                stats.total_sessions += 1;
                SessionRecord {
                    session_id: payload.recording_session_id.clone(),
                    meeting_id: payload.meeting_id.clone(),
                    meeting_url: payload.meeting_url.clone(),
                    start_time,
                    end_time: None,
                    chunk_count: 0,
                    total_audio_size: 0,
                    status: SessionStatus::Active,
                    first_chunk_received: received_at,
                    last_chunk_received: received_at,
                    source,
                    recording_type,
                    title,
                }
            });

        if !duplicate {
            session.chunk_count += 1;
            session.total_audio_size += audio_size_bytes;
        }
        session.last_chunk_received = received_at;
        if payload.is_last_chunk {
            session.status = SessionStatus::Completed;
            session.end_time = Some(received_at);
        }
        let total_chunks = session.chunk_count;

        if !duplicate {
            self.stats.total_chunks += 1;
            self.stats.total_audio_size += audio_size_bytes;
        }
        self.stats.last_activity = Some(received_at);

        Receipt {
            success: true,
            chunk_id,
            session_id: payload.recording_session_id.clone(),
            chunk_index: payload.chunk_index,
            total_chunks,
            webhook_attempt_id: attempt_id,
            duplicate,
        }
    }

    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions
            .values()
            .filter(|s| s.status == SessionStatus::Active)
            .count()
    }

    /// Most recently started sessions first
    pub fn sessions(&self) -> Vec<SessionRecord> {
        let mut sessions: Vec<SessionRecord> = self.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        sessions.truncate(self.limits.max_sessions_listed);
        sessions
    }

    pub fn chunks(&self, limit: usize) -> Vec<ChunkRecord> {
        self.chunks.iter().take(limit).cloned().collect()
    }

    pub fn attempts(&self, limit: usize) -> Vec<WebhookAttempt> {
        self.attempts.iter().take(limit).cloned().collect()
    }

    pub fn session(&self, session_id: &str) -> Option<SessionDetail> {
        let session = self.sessions.get(session_id)?.clone();

        let mut chunks: Vec<ChunkRecord> = self
            .chunks
            .iter()
            .filter(|c| c.recording_session_id == session_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);

        let missing_indices = match self.received.get(session_id) {
            Some(seen) => match seen.iter().next_back() {
                Some(&highest) => (0..highest).filter(|i| !seen.contains(i)).collect(),
                None => Vec::new(),
            },
            None => Vec::new(),
        };

        Some(SessionDetail {
            session,
            chunks,
            missing_indices,
        })
    }

    pub fn reset(&mut self) {
        self.sessions.clear();
        self.chunks.clear();
        self.attempts.clear();
        self.received.clear();
        self.stats = ReceiverStats::new();
    }
}

fn non_empty(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

fn attempt_id() -> String {
    let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(9).collect();
    format!("webhook_{}_{}", Utc::now().timestamp_millis(), suffix)
}
