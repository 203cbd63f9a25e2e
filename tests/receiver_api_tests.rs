// Integration tests for the webhook receiver's dashboard API

use meeting_audio_capture::dispatch::ChunkPayload;
use meeting_audio_capture::receiver::{create_receiver_router, LedgerLimits, ReceiverState};
use serde_json::Value;
use tokio::net::TcpListener;

async fn start_receiver(limits: LedgerLimits) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_receiver_router(ReceiverState::new(limits));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn payload(session: &str, index: u64, is_last: bool) -> ChunkPayload {
    ChunkPayload {
        audio: "UklGRg==".to_string(),
        timestamp: "2024-05-01T10:00:00.000Z".to_string(),
        duration: 15.0,
        format: "wav".to_string(),
        recording_session_id: session.to_string(),
        meeting_id: "zoom_42".to_string(),
        meeting_url: "https://zoom.us/j/42".to_string(),
        chunk_index: index,
        is_first_chunk: index == 0,
        is_last_chunk: is_last,
        source: "zoom".to_string(),
        recording_type: "meeting-audio".to_string(),
        title: "Planning".to_string(),
        ..Default::default()
    }
}

async fn post_chunk(client: &reqwest::Client, base: &str, payload: &ChunkPayload) -> Value {
    let response = client
        .post(format!("{}/webhook/meeting-audio", base))
        .json(payload)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    response.json().await.unwrap()
}

async fn get_json(client: &reqwest::Client, url: String) -> Value {
    client.get(url).send().await.unwrap().json().await.unwrap()
}

#[tokio::test]
async fn test_webhook_records_chunks_and_sessions() {
    let base = start_receiver(LedgerLimits::default()).await;
    let client = reqwest::Client::new();

    let receipt = post_chunk(&client, &base, &payload("s1", 0, false)).await;
    assert_eq!(receipt["success"], true);
    assert_eq!(receipt["chunkId"], "s1-0");
    assert_eq!(receipt["sessionId"], "s1");
    assert_eq!(receipt["totalChunks"], 1);
    assert!(receipt["webhookAttemptId"].as_str().unwrap().starts_with("webhook_"));

    let stats = get_json(&client, format!("{}/api/stats", base)).await;
    assert_eq!(stats["totalChunks"], 1);
    assert_eq!(stats["activeSessions"], 1);
    // 8 base64 chars decode to 6 bytes
    assert_eq!(stats["totalAudioSize"], 6);

    post_chunk(&client, &base, &payload("s1", 2, true)).await;

    let detail = get_json(&client, format!("{}/api/session/s1", base)).await;
    assert_eq!(detail["session"]["status"], "completed");
    assert_eq!(detail["session"]["chunkCount"], 2);
    assert_eq!(detail["session"]["title"], "Planning");
    assert_eq!(detail["missingIndices"], serde_json::json!([1]));
    assert_eq!(detail["chunks"][0]["chunkIndex"], 0);
    assert_eq!(detail["chunks"][1]["chunkIndex"], 2);

    let sessions = get_json(&client, format!("{}/api/sessions", base)).await;
    assert_eq!(sessions.as_array().unwrap().len(), 1);

    let health = get_json(&client, format!("{}/health", base)).await;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["totalChunks"], 2);
}

#[tokio::test]
async fn test_listing_limits_and_reset() {
    let base = start_receiver(LedgerLimits {
        max_chunks: 4,
        max_attempts: 3,
        max_sessions_listed: 20,
    })
    .await;
    let client = reqwest::Client::new();

    for index in 0..6 {
        post_chunk(&client, &base, &payload("s2", index, false)).await;
    }

    let chunks = get_json(&client, format!("{}/api/chunks", base)).await;
    let chunks = chunks.as_array().unwrap();
    assert_eq!(chunks.len(), 4);
    // Newest first
    assert_eq!(chunks[0]["chunkIndex"], 5);

    let limited = get_json(&client, format!("{}/api/chunks?limit=2", base)).await;
    assert_eq!(limited.as_array().unwrap().len(), 2);

    let attempts = get_json(&client, format!("{}/api/webhook-attempts", base)).await;
    assert_eq!(attempts.as_array().unwrap().len(), 3);

    let reset = client.post(format!("{}/api/reset", base)).send().await.unwrap();
    assert_eq!(reset.status(), 200);

    let stats = get_json(&client, format!("{}/api/stats", base)).await;
    assert_eq!(stats["totalChunks"], 0);
    assert_eq!(stats["totalSessions"], 0);
}

#[tokio::test]
async fn test_unknown_session_and_bad_payloads() {
    let base = start_receiver(LedgerLimits::default()).await;
    let client = reqwest::Client::new();

    let missing = client.get(format!("{}/api/session/nope", base)).send().await.unwrap();
    assert_eq!(missing.status(), 404);
    let body: Value = missing.json().await.unwrap();
    assert_eq!(body["error"], "Session not found");

    let anonymous = client
        .post(format!("{}/webhook/meeting-audio", base))
        .json(&serde_json::json!({ "audio": "", "chunkIndex": 0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(anonymous.status(), 400);
}
