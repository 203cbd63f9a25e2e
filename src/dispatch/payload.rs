use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

use crate::session::{Chunk, ChunkMetadata};

/// JSON body POSTed to the webhook for every chunk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChunkPayload {
    /// Base64 audio, empty for an empty final chunk
    pub audio: String,
    /// ISO-8601 finalization time
    pub timestamp: String,
    /// Seconds of audio covered
    pub duration: f64,
    pub format: String,
    pub recording_session_id: String,
    pub meeting_id: String,
    pub meeting_url: String,
    pub chunk_index: u64,
    pub is_first_chunk: bool,
    pub is_last_chunk: bool,
    /// Detected platform
    pub source: String,
    pub recording_type: String,
    pub title: String,
    pub user_agent: String,
}

impl ChunkPayload {
    pub fn build(chunk: &Chunk, metadata: &ChunkMetadata, user_agent: &str) -> Self {
        Self {
            audio: BASE64.encode(&chunk.payload),
            timestamp: chunk.captured_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            duration: chunk.duration_secs(),
            format: chunk.format.clone(),
            recording_session_id: metadata.session_id.to_string(),
            meeting_id: metadata.meeting_id.clone(),
            meeting_url: metadata.meeting_url.clone(),
            chunk_index: chunk.index,
            is_first_chunk: chunk.is_first,
            is_last_chunk: chunk.is_last,
            source: metadata.platform.clone(),
            recording_type: metadata.recording_type.clone(),
            title: metadata.title.clone(),
            user_agent: user_agent.to_string(),
        }
    }

    pub fn decode_audio(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(&self.audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SourceDescriptor;
    use crate::session::{OriginContext, RecordingSession};
    use chrono::{TimeZone, Utc};

    fn session() -> RecordingSession {
        RecordingSession::new(
            SourceDescriptor::System,
            OriginContext::from_page("https://meet.google.com/abc-defg-hij", Some("Design review")),
            "http://localhost:3000/webhook/meeting-audio".to_string(),
        )
    }

    #[test]
    fn test_payload_field_names() {
        let session = session();
        let chunk = Chunk {
            index: 2,
            payload: vec![1, 2, 3],
            is_first: false,
            is_last: true,
            captured_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            audio_ms: 4200,
            format: "wav".to_string(),
        };

        let payload = ChunkPayload::build(&chunk, &session.chunk_metadata(), "meeting-audio-capture/test");
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["audio"], "AQID");
        assert_eq!(json["timestamp"], "2024-05-01T12:00:00.000Z");
        assert_eq!(json["duration"], 4.2);
        assert_eq!(json["chunkIndex"], 2);
        assert_eq!(json["isFirstChunk"], false);
        assert_eq!(json["isLastChunk"], true);
        assert_eq!(json["recordingSessionId"], session.session_id.as_str());
        assert_eq!(json["meetingId"], "meet_abc-defg-hij");
        assert_eq!(json["meetingUrl"], "https://meet.google.com/abc-defg-hij");
        assert_eq!(json["source"], "google-meet");
        assert_eq!(json["recordingType"], "meeting-audio");
        assert_eq!(json["title"], "Design review");
        assert_eq!(json["userAgent"], "meeting-audio-capture/test");
        assert_eq!(payload.decode_audio().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_empty_final_chunk_has_zero_duration() {
        let session = session();
        let chunk = Chunk {
            index: 0,
            payload: Vec::new(),
            is_first: true,
            is_last: true,
            captured_at: Utc::now(),
            audio_ms: 20,
            format: "wav".to_string(),
        };
        let payload = ChunkPayload::build(&chunk, &session.chunk_metadata(), "ua");
        assert_eq!(payload.audio, "");
        assert_eq!(payload.duration, 0.0);
        assert!(payload.is_first_chunk && payload.is_last_chunk);
    }

    #[test]
    fn test_lenient_deserialization() {
        let payload: ChunkPayload =
            serde_json::from_str(r#"{"recordingSessionId":"s1","chunkIndex":3}"#).unwrap();
        assert_eq!(payload.chunk_index, 3);
        assert!(payload.audio.is_empty());
    }
}
