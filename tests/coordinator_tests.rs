// Integration tests for the recording coordinator
//
// The coordinator is the single entry point for control surfaces; these tests
// drive it the way the HTTP API does and check that the state store, not the
// coordinator's memory, decides whether a recording is in progress.

mod common;

use common::*;
use meeting_audio_capture::audio::{AudioSource, SourceDescriptor};
use meeting_audio_capture::coordinator::{CoordinatorError, RecordingCoordinator, SessionServices, SetupRequest, StopOutcome};
use meeting_audio_capture::dispatch::{ChunkDispatcher, DispatchConfig};
use meeting_audio_capture::session::{OriginContext, RecordingSession, SessionConfig, SessionError};
use meeting_audio_capture::store::{MemoryStateStore, PersistedState, SessionStateStore};
use std::sync::Arc;
use std::time::Duration;

fn services(transport: Arc<ScriptedTransport>, store: MemoryStateStore) -> SessionServices {
    SessionServices {
        provider: provider(tone(), AudioSource::Silence),
        dispatcher: ChunkDispatcher::new(DispatchConfig::default(), transport),
        store: Arc::new(store),
        session_config: SessionConfig::default(),
        encoder: None,
    }
}

fn setup_request(source: SourceDescriptor, url: &str) -> SetupRequest {
    SetupRequest {
        source,
        endpoint: ENDPOINT.to_string(),
        origin: OriginContext::from_page(url, Some("Standup")),
    }
}

#[tokio::test(start_paused = true)]
async fn test_start_requires_setup() {
    let coordinator = RecordingCoordinator::new(services(ScriptedTransport::new(), MemoryStateStore::new()));

    let err = coordinator.start().await.unwrap_err();
    assert!(matches!(err, CoordinatorError::NotSetUp));

    // A setup is consumed by the start it prepares
    assert!(coordinator.setup(setup_request(SourceDescriptor::Microphone, MEET_URL)).await.unwrap().ready);
    coordinator.start().await.unwrap();
    coordinator.stop_requested().await.unwrap();
    assert!(matches!(coordinator.start().await, Err(CoordinatorError::NotSetUp)));
}

#[tokio::test(start_paused = true)]
async fn test_full_session_lifecycle() {
    let transport = ScriptedTransport::new();
    let store = MemoryStateStore::new();
    let coordinator = RecordingCoordinator::new(services(transport.clone(), store.clone()));
    let indicator = coordinator.indicator();

    coordinator.setup(setup_request(SourceDescriptor::Microphone, MEET_URL)).await.unwrap();
    let session_id = coordinator.start().await.unwrap();
    assert!(*indicator.borrow());

    tokio::time::sleep(Duration::from_secs(16)).await;

    let status = coordinator.status().await.unwrap();
    assert!(status.is_recording);
    assert!(!status.stale);
    assert_eq!(status.session_id, Some(session_id.clone()));

    let progress = coordinator.progress().await.unwrap();
    assert_eq!(progress.sequence_counter, 1);

    let summary = match coordinator.stop_requested().await.unwrap() {
        StopOutcome::Stopped(summary) => summary,
        other => panic!("expected a stopped session, got {:?}", other),
    };
    assert_eq!(summary.session_id, session_id);
    assert_eq!(summary.chunks_delivered, 2);
    assert!(!*indicator.borrow());

    let status = coordinator.status().await.unwrap();
    assert!(!status.is_recording);
    assert!(store.load().await.unwrap().is_none());
    assert!(transport.delivered().last().unwrap().is_last_chunk);
}

#[tokio::test(start_paused = true)]
async fn test_setup_refused_while_recording() {
    let transport = ScriptedTransport::new();
    let coordinator = RecordingCoordinator::new(services(transport.clone(), MemoryStateStore::new()));

    coordinator.setup(setup_request(SourceDescriptor::Microphone, MEET_URL)).await.unwrap();
    let session_id = coordinator.start().await.unwrap();

    let response = coordinator.setup(setup_request(SourceDescriptor::System, MEET_URL)).await.unwrap();
    assert!(!response.ready);
    assert_eq!(response.session_id, Some(session_id.clone()));

    // Still the same session, nothing new started
    let status = coordinator.status().await.unwrap();
    assert_eq!(status.session_id, Some(session_id));
    assert!(matches!(coordinator.start().await, Err(CoordinatorError::Session(SessionError::AlreadyRecording { .. }))));

    coordinator.stop_requested().await.unwrap();
    assert_eq!(transport.attempts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_setup_refused_when_store_owns_a_session() {
    let store = MemoryStateStore::new();
    let orphan = RecordingSession::new(
        SourceDescriptor::Microphone,
        OriginContext::from_page(MEET_URL, None),
        ENDPOINT.to_string(),
    );
    store.save(&PersistedState::recording(&orphan)).await.unwrap();

    let coordinator = RecordingCoordinator::new(services(ScriptedTransport::new(), store.clone()));
    let response = coordinator.setup(setup_request(SourceDescriptor::Microphone, MEET_URL)).await.unwrap();
    assert!(!response.ready);
    assert_eq!(response.session_id, Some(orphan.session_id.clone()));

    // No live producer owns it here, so status flags it as stale
    let status = coordinator.status().await.unwrap();
    assert!(status.is_recording);
    assert!(status.stale);

    // Stopping clears the stale flag so the next setup goes through
    let outcome = coordinator.stop_requested().await.unwrap();
    assert_eq!(outcome, StopOutcome::StaleCleared(Some(orphan.session_id)));
    assert!(store.load().await.unwrap().is_none());
    assert!(coordinator.setup(setup_request(SourceDescriptor::Microphone, MEET_URL)).await.unwrap().ready);
}

#[tokio::test(start_paused = true)]
async fn test_setup_rejects_internal_pages_for_tab_audio() {
    let coordinator = RecordingCoordinator::new(services(ScriptedTransport::new(), MemoryStateStore::new()));

    let response = coordinator
        .setup(setup_request(SourceDescriptor::System, "chrome-extension://abc/popup.html"))
        .await
        .unwrap();
    assert!(!response.ready);
    assert!(response.session_id.is_none());
    assert!(response.reason.is_some());

    // The microphone does not depend on the page
    let response = coordinator
        .setup(setup_request(SourceDescriptor::Microphone, "chrome://newtab"))
        .await
        .unwrap();
    assert!(response.ready);
}

#[tokio::test(start_paused = true)]
async fn test_stop_without_session_is_harmless() {
    let coordinator = RecordingCoordinator::new(services(ScriptedTransport::new(), MemoryStateStore::new()));
    assert_eq!(coordinator.stop_requested().await.unwrap(), StopOutcome::NotRecording);
    assert!(coordinator.progress().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_indicator_turns_off_when_start_fails() {
    let mut services = services(ScriptedTransport::new(), MemoryStateStore::new());
    services.provider = provider(AudioSource::Denied, AudioSource::Silence);
    let coordinator = RecordingCoordinator::new(services);

    coordinator.setup(setup_request(SourceDescriptor::Microphone, MEET_URL)).await.unwrap();
    let err = coordinator.start().await.unwrap_err();
    assert_eq!(err.category(), meeting_audio_capture::ErrorCategory::Permission);
    assert!(!*coordinator.indicator().borrow());

    let status = coordinator.status().await.unwrap();
    assert!(!status.is_recording);
}

#[tokio::test(start_paused = true)]
async fn test_second_stop_while_finalizing_keeps_the_session() {
    // The final chunk fails every attempt, so finalize spans the retry delays
    let transport = ScriptedTransport::new().script(0, &[500, 500, 500]);
    let store = MemoryStateStore::new();
    let coordinator = Arc::new(RecordingCoordinator::new(services(transport.clone(), store.clone())));

    coordinator.setup(setup_request(SourceDescriptor::Microphone, MEET_URL)).await.unwrap();
    let session_id = coordinator.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let first = tokio::spawn({
        let coordinator = Arc::clone(&coordinator);
        async move { coordinator.stop_requested().await }
    });
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!first.is_finished());

    let status = coordinator.status().await.unwrap();
    assert!(status.is_recording);
    assert!(!status.stale);
    assert_eq!(status.session_id, Some(session_id.clone()));

    let second = coordinator.stop_requested().await.unwrap();
    assert_eq!(second, StopOutcome::Stopping(session_id.clone()));
    assert!(store.load().await.unwrap().is_some());

    let response = coordinator.setup(setup_request(SourceDescriptor::Microphone, MEET_URL)).await.unwrap();
    assert!(!response.ready);
    assert_eq!(response.session_id, Some(session_id.clone()));
    assert!(matches!(
        coordinator.start().await,
        Err(CoordinatorError::Session(SessionError::AlreadyRecording { .. }))
    ));
    assert!(coordinator.progress().await.is_none());

    let summary = match first.await.unwrap().unwrap() {
        StopOutcome::Stopped(summary) => summary,
        other => panic!("expected a stopped session, got {:?}", other),
    };
    assert_eq!(summary.session_id, session_id);
    assert_eq!(transport.attempts_for(0), 3);

    // Only now is the recorder free again
    assert!(store.load().await.unwrap().is_none());
    assert!(!coordinator.status().await.unwrap().is_recording);
    assert!(coordinator.setup(setup_request(SourceDescriptor::Microphone, MEET_URL)).await.unwrap().ready);
}
