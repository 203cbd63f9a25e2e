// Shared fixtures for the session and coordinator tests

#![allow(dead_code)]

use meeting_audio_capture::audio::{AudioBackendConfig, AudioSource, AudioSourceProvider, ConfiguredBackends};
use meeting_audio_capture::dispatch::{ChunkDispatcher, ChunkPayload, DispatchConfig, Transport, TransportError, TransportResponse};
use meeting_audio_capture::session::{SessionConfig, SessionController, SessionEvent};
use meeting_audio_capture::store::{MemoryStateStore, SessionStateStore};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

pub const ENDPOINT: &str = "http://localhost:3000/webhook/meeting-audio";
pub const MEET_URL: &str = "https://meet.google.com/abc-defg-hij";

/// Answers per chunk index from a script, 200 once a script runs out,
/// and records every payload it sees
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<u64, VecDeque<u16>>>,
    seen: Mutex<Vec<(ChunkPayload, u16)>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Respond to attempts at `index` with `statuses`, in order
    pub fn script(self: &Arc<Self>, index: u64, statuses: &[u16]) -> Arc<Self> {
        self.scripts
            .lock()
            .unwrap()
            .insert(index, statuses.iter().copied().collect());
        Arc::clone(self)
    }

    /// Every attempt, in order
    pub fn attempts(&self) -> Vec<ChunkPayload> {
        self.seen.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
    }

    /// Payloads that were answered with a 2xx, in order
    pub fn delivered(&self) -> Vec<ChunkPayload> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, status)| (200..300).contains(status))
            .map(|(p, _)| p.clone())
            .collect()
    }

    pub fn attempts_for(&self, index: u64) -> usize {
        self.attempts().iter().filter(|p| p.chunk_index == index).count()
    }
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    async fn post_json(&self, _endpoint: &str, payload: &ChunkPayload) -> Result<TransportResponse, TransportError> {
        let status = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&payload.chunk_index)
            .and_then(|script| script.pop_front())
            .unwrap_or(200);
        self.seen.lock().unwrap().push((payload.clone(), status));

        Ok(TransportResponse {
            status,
            body: String::new(),
        })
    }
}

pub fn provider(microphone: AudioSource, system: AudioSource) -> AudioSourceProvider {
    let config = AudioBackendConfig::default();
    let backends = Arc::new(ConfiguredBackends {
        microphone,
        system,
        config: config.clone(),
    });
    AudioSourceProvider::new(backends, config)
}

pub fn tone() -> AudioSource {
    AudioSource::Tone { frequency_hz: 440.0 }
}

pub fn controller_with(
    config: SessionConfig,
    provider: AudioSourceProvider,
    transport: Arc<ScriptedTransport>,
    store: MemoryStateStore,
) -> SessionController {
    let dispatcher = ChunkDispatcher::new(DispatchConfig::default(), transport);
    SessionController::new(config, provider, dispatcher, Arc::new(store) as Arc<dyn SessionStateStore>)
}

pub fn controller(transport: Arc<ScriptedTransport>, store: MemoryStateStore) -> SessionController {
    controller_with(
        SessionConfig::default(),
        provider(tone(), AudioSource::Silence),
        transport,
        store,
    )
}

pub fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}
