use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::origin::OriginContext;
use crate::audio::SourceDescriptor;
use crate::recording::Segment;

/// Session identifier: `session_<unix-millis>_<9 random chars>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(9).collect();
        Self(format!("session_{}_{}", Utc::now().timestamp_millis(), suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mutable state of one recording session, owned by the controller
#[derive(Debug, Clone)]
pub struct RecordingSession {
    pub session_id: SessionId,
    /// Capability actually recorded (after any fallback)
    pub source: SourceDescriptor,
    pub origin: OriginContext,
    pub endpoint: String,
    /// Index of the next chunk; advances only on delivery (or on drop with
    /// the advancing drop policy)
    pub sequence_counter: u64,
    /// Cleared after the first successful delivery
    pub is_first: bool,
    /// Set once the final chunk has been produced
    pub is_complete: bool,
    pub started_at: DateTime<Utc>,
}

impl RecordingSession {
    pub fn new(source: SourceDescriptor, origin: OriginContext, endpoint: String) -> Self {
        Self {
            session_id: SessionId::generate(),
            source,
            origin,
            endpoint,
            sequence_counter: 0,
            is_first: true,
            is_complete: false,
            started_at: Utc::now(),
        }
    }

    /// Turn a finalized segment into the next chunk in sequence
    pub fn chunk_from(&self, segment: Segment, is_last: bool, format: &str) -> Chunk {
        Chunk {
            index: self.sequence_counter,
            is_first: self.is_first && self.sequence_counter == 0,
            is_last,
            captured_at: segment.finalized_at,
            audio_ms: segment.audio_ms,
            format: format.to_string(),
            payload: segment.payload,
        }
    }

    pub fn chunk_metadata(&self) -> ChunkMetadata {
        ChunkMetadata {
            session_id: self.session_id.clone(),
            meeting_id: self.origin.meeting_id.clone(),
            meeting_url: self.origin.url.clone(),
            platform: self.origin.platform.as_str().to_string(),
            recording_type: self.origin.recording_type.as_str().to_string(),
            title: self.origin.title.clone(),
        }
    }
}

/// One finalized, ordered segment of encoded audio
#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: u64,
    pub payload: Vec<u8>,
    pub is_first: bool,
    pub is_last: bool,
    pub captured_at: DateTime<Utc>,
    pub audio_ms: u64,
    pub format: String,
}

impl Chunk {
    /// Seconds of audio covered, 0 for an empty payload
    pub fn duration_secs(&self) -> f64 {
        if self.payload.is_empty() {
            0.0
        } else {
            self.audio_ms as f64 / 1000.0
        }
    }
}

/// Session-level envelope fields sent with every chunk
#[derive(Debug, Clone)]
pub struct ChunkMetadata {
    pub session_id: SessionId,
    pub meeting_id: String,
    pub meeting_url: String,
    pub platform: String,
    pub recording_type: String,
    pub title: String,
}
