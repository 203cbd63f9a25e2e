// Persisted session snapshot
//
// Layout on disk: `{ "version": 1, "isRecording": bool, "recordingData": {...} }`.
// Files without a `version` field use the extension's original layout and are
// upgraded on load; any other version is rejected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StoreError;
use crate::audio::SourceDescriptor;
use crate::session::{OriginContext, Platform, RecordingSession, RecordingType, SessionId, UNTITLED};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PersistedState {
    pub version: u32,
    pub is_recording: bool,
    pub recording_data: Option<RecordingData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingData {
    pub session_id: SessionId,
    pub source_descriptor: SourceDescriptor,
    #[serde(flatten)]
    pub origin: OriginContext,
    pub sequence_counter: u64,
    pub is_first: bool,
    pub started_at: DateTime<Utc>,
}

impl PersistedState {
    pub fn recording(session: &RecordingSession) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            is_recording: true,
            recording_data: Some(RecordingData::from(session)),
        }
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.recording_data.as_ref().map(|data| &data.session_id)
    }

    /// Decode any supported layout, upgrading the legacy one
    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;

        match value.get("version") {
            None => {
                let legacy: LegacyState = serde_json::from_value(value)?;
                legacy.upgrade()
            }
            Some(version) => match version.as_u64() {
                Some(v) if v == SNAPSHOT_VERSION as u64 => Ok(serde_json::from_value(value)?),
                _ => Err(StoreError::UnsupportedVersion(version.to_string())),
            },
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

impl From<&RecordingSession> for RecordingData {
    fn from(session: &RecordingSession) -> Self {
        Self {
            session_id: session.session_id.clone(),
            source_descriptor: session.source,
            origin: session.origin.clone(),
            sequence_counter: session.sequence_counter,
            is_first: session.is_first,
            started_at: session.started_at,
        }
    }
}

/// Unversioned layout written by the browser extension
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyState {
    #[serde(default)]
    is_recording: bool,
    recording_data: Option<LegacyRecordingData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyRecordingData {
    recording_session_id: String,
    #[serde(default)]
    meeting_id: String,
    #[serde(default)]
    meeting_url: String,
    #[serde(default)]
    chunk_counter: u64,
    #[serde(default)]
    is_first_chunk: bool,
    page_title: Option<String>,
    start_time: Option<DateTime<Utc>>,
    audio_source: Option<SourceDescriptor>,
}

impl LegacyState {
    fn upgrade(self) -> Result<PersistedState, StoreError> {
        let recording_data = match self.recording_data {
            None if self.is_recording => {
                return Err(StoreError::Corrupt("legacy state is recording but has no session data".into()))
            }
            None => None,
            Some(legacy) => {
                if legacy.recording_session_id.is_empty() {
                    return Err(StoreError::Corrupt("legacy session id is empty".into()));
                }
                let url = legacy.meeting_url;
                Some(RecordingData {
                    session_id: SessionId::from(legacy.recording_session_id),
                    source_descriptor: legacy.audio_source.unwrap_or(SourceDescriptor::Microphone),
                    origin: OriginContext {
                        title: legacy.page_title.unwrap_or_else(|| UNTITLED.to_string()),
                        meeting_id: legacy.meeting_id,
                        platform: Platform::detect(&url),
                        recording_type: RecordingType::detect(&url),
                        url,
                    },
                    sequence_counter: legacy.chunk_counter,
                    is_first: legacy.is_first_chunk,
                    started_at: legacy.start_time.unwrap_or_else(Utc::now),
                })
            }
        };

        Ok(PersistedState {
            version: SNAPSHOT_VERSION,
            is_recording: self.is_recording,
            recording_data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_layout() {
        let session = RecordingSession::new(
            SourceDescriptor::Combined,
            OriginContext::from_page("https://zoom.us/j/42", Some("Retro")),
            "http://localhost:3000/webhook/meeting-audio".to_string(),
        );
        let state = PersistedState::recording(&session);
        let json = serde_json::to_value(&state).unwrap();

        assert_eq!(json["version"], 1);
        assert_eq!(json["isRecording"], true);
        assert_eq!(json["recordingData"]["sessionId"], session.session_id.as_str());
        assert_eq!(json["recordingData"]["sourceDescriptor"], "combined");
        assert_eq!(json["recordingData"]["meetingId"], "zoom_42");
        assert_eq!(json["recordingData"]["sequenceCounter"], 0);
        assert_eq!(json["recordingData"]["isFirst"], true);

        let decoded = PersistedState::decode(&state.encode().unwrap()).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn test_legacy_layout_is_upgraded() {
        let legacy = br#"{
            "isRecording": true,
            "recordingData": {
                "meetingId": "meet_abc",
                "meetingUrl": "https://meet.google.com/abc",
                "recordingSessionId": "session_1700000000000_k3j4h5g6f",
                "chunkCounter": 7,
                "isFirstChunk": false,
                "pageTitle": "Planning",
                "startTime": "2024-01-02T03:04:05.000Z",
                "audioSource": "both"
            }
        }"#;

        let state = PersistedState::decode(legacy).unwrap();
        let data = state.recording_data.unwrap();
        assert_eq!(state.version, SNAPSHOT_VERSION);
        assert_eq!(data.session_id.as_str(), "session_1700000000000_k3j4h5g6f");
        assert_eq!(data.source_descriptor, SourceDescriptor::Combined);
        assert_eq!(data.sequence_counter, 7);
        assert_eq!(data.origin.platform, Platform::GoogleMeet);
        assert_eq!(data.origin.title, "Planning");
    }

    #[test]
    fn test_unknown_versions_are_rejected() {
        let err = PersistedState::decode(br#"{"version": 2, "isRecording": false, "recordingData": null}"#)
            .unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedVersion(v) if v == "2"));

        let err = PersistedState::decode(br#"{"version": 1, "isRecording": false, "extra": 1}"#).unwrap_err();
        assert!(matches!(err, StoreError::Json(_)));

        let err = PersistedState::decode(br#"{"isRecording": true}"#).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }
}
