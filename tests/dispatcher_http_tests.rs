// Integration tests for webhook delivery over real HTTP
//
// Each test binds an axum server on an ephemeral port and points the
// reqwest-backed dispatcher at it.

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use chrono::Utc;
use meeting_audio_capture::dispatch::{ChunkDispatcher, ChunkPayload, DeliveryOutcome, DispatchConfig, DispatchError};
use meeting_audio_capture::receiver::{create_receiver_router, LedgerLimits, ReceiverState, SessionStatus};
use meeting_audio_capture::session::{Chunk, ChunkMetadata, SessionId};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/webhook/meeting-audio", addr)
}

fn fast_config() -> DispatchConfig {
    DispatchConfig {
        max_retries: 3,
        retry_delay: Duration::from_millis(20),
        attempt_timeout: Duration::from_millis(500),
        ..DispatchConfig::default()
    }
}

fn chunk(index: u64, is_last: bool) -> (Chunk, ChunkMetadata) {
    let chunk = Chunk {
        index,
        payload: vec![1, 2, 3, 4, 5, 6],
        is_first: index == 0,
        is_last,
        captured_at: Utc::now(),
        audio_ms: 15_000,
        format: "wav".to_string(),
    };
    let metadata = ChunkMetadata {
        session_id: SessionId::from("session_1_abcdefghi".to_string()),
        meeting_id: "meet_abc".to_string(),
        meeting_url: "https://meet.google.com/abc".to_string(),
        platform: "google-meet".to_string(),
        recording_type: "meeting-audio".to_string(),
        title: "Sync".to_string(),
    };
    (chunk, metadata)
}

/// Answers every request with `status` after `delay`, counting calls
fn fixed(status: StatusCode, delay: Duration, calls: Arc<AtomicU32>) -> Router {
    Router::new()
        .route(
            "/webhook/meeting-audio",
            post(move |State(calls): State<Arc<AtomicU32>>, Json(_): Json<ChunkPayload>| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                (status, "nope")
            }),
        )
        .with_state(calls)
}

#[tokio::test]
async fn test_chunks_reach_the_receiver() {
    let state = ReceiverState::new(LedgerLimits::default());
    let endpoint = serve(create_receiver_router(state.clone())).await;
    let dispatcher = ChunkDispatcher::http(fast_config()).unwrap();

    for (index, is_last) in [(0, false), (1, true)] {
        let (chunk, metadata) = chunk(index, is_last);
        let report = dispatcher.send(&chunk, &metadata, &endpoint).await;
        assert_eq!(report.outcome, DeliveryOutcome::Delivered { status: 200 });
        assert_eq!(report.attempts.len(), 1);
    }

    let ledger = state.ledger.read().await;
    let detail = ledger.session("session_1_abcdefghi").unwrap();
    assert_eq!(detail.session.status, SessionStatus::Completed);
    assert_eq!(detail.chunks.len(), 2);
    assert_eq!(detail.chunks[0].duration, 15.0);
    assert_eq!(detail.chunks[0].title, "Sync");
    assert!(detail.missing_indices.is_empty());

    // The dispatcher identifies itself on every request
    let attempt = &ledger.attempts(1)[0];
    assert!(attempt.user_agent.starts_with("meeting-audio-capture/"));
}

#[tokio::test]
async fn test_client_error_is_permanent() {
    let calls = Arc::new(AtomicU32::new(0));
    let endpoint = serve(fixed(StatusCode::BAD_REQUEST, Duration::ZERO, calls.clone())).await;
    let dispatcher = ChunkDispatcher::http(fast_config()).unwrap();

    let (chunk, metadata) = chunk(0, false);
    let report = dispatcher.send(&chunk, &metadata, &endpoint).await;

    match report.outcome {
        DeliveryOutcome::Abandoned {
            error: DispatchError::Rejected { status, body },
        } => {
            assert_eq!(status, 400);
            assert_eq!(body, "nope");
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_server_error_is_retried_to_the_limit() {
    let calls = Arc::new(AtomicU32::new(0));
    let endpoint = serve(fixed(StatusCode::INTERNAL_SERVER_ERROR, Duration::ZERO, calls.clone())).await;
    let dispatcher = ChunkDispatcher::http(fast_config()).unwrap();

    let (chunk, metadata) = chunk(3, false);
    let report = dispatcher.send(&chunk, &metadata, &endpoint).await;

    assert!(matches!(
        report.outcome,
        DeliveryOutcome::Abandoned {
            error: DispatchError::Status { status: 500, .. }
        }
    ));
    assert_eq!(report.attempts.len(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_slow_endpoint_times_out() {
    let calls = Arc::new(AtomicU32::new(0));
    let endpoint = serve(fixed(StatusCode::OK, Duration::from_secs(5), calls.clone())).await;
    let config = DispatchConfig {
        max_retries: 2,
        attempt_timeout: Duration::from_millis(100),
        ..fast_config()
    };
    let dispatcher = ChunkDispatcher::http(config).unwrap();

    let (chunk, metadata) = chunk(0, true);
    let report = dispatcher.send(&chunk, &metadata, &endpoint).await;

    assert!(matches!(
        report.outcome,
        DeliveryOutcome::Abandoned {
            error: DispatchError::Timeout(_)
        }
    ));
    assert_eq!(report.attempts.len(), 2);
}

#[tokio::test]
async fn test_unreachable_endpoint_is_a_transport_error() {
    // Bind then drop to get a port nothing listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let dispatcher = ChunkDispatcher::http(fast_config()).unwrap();
    let report = dispatcher.probe(&format!("http://{}/webhook/meeting-audio", addr)).await;

    assert_eq!(report.attempts.len(), 1);
    assert!(matches!(
        report.outcome,
        DeliveryOutcome::Abandoned {
            error: DispatchError::Transport(_)
        }
    ));
}
