use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::payload::ChunkPayload;
use super::transport::{HttpTransport, Transport, TransportError, TransportResponse};
use crate::error::ErrorCategory;
use crate::session::{Chunk, ChunkMetadata, SessionId};

/// Delivery retry policy
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Attempts per chunk, including the first
    pub max_retries: u32,
    /// Fixed pause between attempts
    pub retry_delay: Duration,
    /// Deadline for a single attempt
    pub attempt_timeout: Duration,
    pub user_agent: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            attempt_timeout: Duration::from_secs(30),
            user_agent: format!("meeting-audio-capture/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("endpoint rejected chunk with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),
}

impl DispatchError {
    /// Client-side rejections are permanent; everything else may succeed later
    pub fn is_retryable(&self) -> bool {
        !matches!(self, DispatchError::Rejected { .. })
    }

    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Network
    }
}

impl From<TransportError> for DispatchError {
    fn from(e: TransportError) -> Self {
        DispatchError::Transport(e.to_string())
    }
}

/// A single network attempt, kept for observability
#[derive(Debug, Clone)]
pub struct DeliveryAttempt {
    pub chunk_index: u64,
    /// 1-based attempt number
    pub attempt: u32,
    pub latency: Duration,
    pub status: Option<u16>,
    pub error: Option<DispatchError>,
}

impl DeliveryAttempt {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { status: u16 },
    Abandoned { error: DispatchError },
}

#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub chunk_index: u64,
    pub outcome: DeliveryOutcome,
    pub attempts: Vec<DeliveryAttempt>,
}

impl DeliveryReport {
    pub fn is_delivered(&self) -> bool {
        matches!(self.outcome, DeliveryOutcome::Delivered { .. })
    }

    pub fn total_latency(&self) -> Duration {
        self.attempts.iter().map(|a| a.latency).sum()
    }
}

/// Delivers chunks to the webhook with bounded retries
///
/// `send` resolves one chunk completely before returning, so a session
/// that awaits it never has more than one chunk outstanding.
#[derive(Clone)]
pub struct ChunkDispatcher {
    config: DispatchConfig,
    transport: Arc<dyn Transport>,
}

impl ChunkDispatcher {
    pub fn new(config: DispatchConfig, transport: Arc<dyn Transport>) -> Self {
        Self { config, transport }
    }

    /// Dispatcher backed by a reqwest client
    pub fn http(config: DispatchConfig) -> Result<Self, TransportError> {
        let transport = HttpTransport::new(&config.user_agent)?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub async fn send(&self, chunk: &Chunk, metadata: &ChunkMetadata, endpoint: &str) -> DeliveryReport {
        let payload = ChunkPayload::build(chunk, metadata, &self.config.user_agent);
        let max_attempts = self.config.max_retries.max(1);
        let mut attempts = Vec::new();

        debug!(
            "Dispatching chunk {} ({} bytes, first={}, last={}) to {}",
            chunk.index,
            chunk.payload.len(),
            chunk.is_first,
            chunk.is_last,
            endpoint
        );

        let mut attempt = 0;
        loop {
            attempt += 1;
            let started = Instant::now();
            let result = self.attempt(endpoint, &payload).await;
            let latency = started.elapsed();

            match result {
                Ok(status) => {
                    info!(
                        "Chunk {} delivered (HTTP {}, attempt {}/{}, {:?})",
                        chunk.index, status, attempt, max_attempts, latency
                    );
                    attempts.push(DeliveryAttempt {
                        chunk_index: chunk.index,
                        attempt,
                        latency,
                        status: Some(status),
                        error: None,
                    });
                    return DeliveryReport {
                        chunk_index: chunk.index,
                        outcome: DeliveryOutcome::Delivered { status },
                        attempts,
                    };
                }
                Err(e) => {
                    warn!(
                        "Chunk {} attempt {}/{} failed: {}",
                        chunk.index, attempt, max_attempts, e
                    );
                    let status = match &e {
                        DispatchError::Rejected { status, .. } | DispatchError::Status { status, .. } => Some(*status),
                        _ => None,
                    };
                    attempts.push(DeliveryAttempt {
                        chunk_index: chunk.index,
                        attempt,
                        latency,
                        status,
                        error: Some(e.clone()),
                    });

                    if !e.is_retryable() || attempt == max_attempts {
                        error!(
                            "Abandoning chunk {} after {} attempt(s): {}",
                            chunk.index,
                            attempts.len(),
                            e
                        );
                        return DeliveryReport {
                            chunk_index: chunk.index,
                            outcome: DeliveryOutcome::Abandoned { error: e },
                            attempts,
                        };
                    }

                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
        }
    }

    /// Send a single synthetic first-and-last chunk without retries
    pub async fn probe(&self, endpoint: &str) -> DeliveryReport {
        let probe = Self {
            config: DispatchConfig {
                max_retries: 1,
                ..self.config.clone()
            },
            transport: Arc::clone(&self.transport),
        };

        let now = Utc::now();
        let chunk = Chunk {
            index: 0,
            payload: Vec::new(),
            is_first: true,
            is_last: true,
            captured_at: now,
            audio_ms: 0,
            format: "wav".to_string(),
        };
        let metadata = ChunkMetadata {
            session_id: SessionId::from(format!("probe_{}", now.timestamp_millis())),
            meeting_id: "probe".to_string(),
            meeting_url: endpoint.to_string(),
            platform: "browser".to_string(),
            recording_type: "general-audio".to_string(),
            title: "Webhook probe".to_string(),
        };

        probe.send(&chunk, &metadata, endpoint).await
    }

    async fn attempt(&self, endpoint: &str, payload: &ChunkPayload) -> Result<u16, DispatchError> {
        let response = tokio::time::timeout(self.config.attempt_timeout, self.transport.post_json(endpoint, payload))
            .await
            .map_err(|_| DispatchError::Timeout(self.config.attempt_timeout))??;
        classify(response)
    }
}

fn classify(response: TransportResponse) -> Result<u16, DispatchError> {
    if response.is_success() {
        Ok(response.status)
    } else if response.is_client_error() {
        Err(DispatchError::Rejected {
            status: response.status,
            body: response.body,
        })
    } else {
        Err(DispatchError::Status {
            status: response.status,
            body: response.body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Replays a fixed list of responses, then answers 200
    struct Replay {
        responses: Mutex<Vec<Result<u16, TransportError>>>,
        calls: Mutex<u32>,
    }

    impl Replay {
        fn new(mut responses: Vec<Result<u16, TransportError>>) -> Arc<Self> {
            responses.reverse();
            Arc::new(Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait::async_trait]
    impl Transport for Replay {
        async fn post_json(&self, _endpoint: &str, _payload: &ChunkPayload) -> Result<TransportResponse, TransportError> {
            *self.calls.lock().unwrap() += 1;
            let next = self.responses.lock().unwrap().pop().unwrap_or(Ok(200));
            next.map(|status| TransportResponse {
                status,
                body: String::new(),
            })
        }
    }

    fn chunk() -> (Chunk, ChunkMetadata) {
        let chunk = Chunk {
            index: 4,
            payload: vec![0; 8],
            is_first: false,
            is_last: false,
            captured_at: Utc::now(),
            audio_ms: 1000,
            format: "pcm".to_string(),
        };
        let metadata = ChunkMetadata {
            session_id: SessionId::generate(),
            meeting_id: "meet_x".to_string(),
            meeting_url: "https://meet.google.com/x".to_string(),
            platform: "google-meet".to_string(),
            recording_type: "meeting-audio".to_string(),
            title: "x".to_string(),
        };
        (chunk, metadata)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_delivers() {
        let transport = Replay::new(vec![Ok(500), Err(TransportError::Request("reset".into()))]);
        let dispatcher = ChunkDispatcher::new(DispatchConfig::default(), transport.clone());
        let (chunk, metadata) = chunk();

        let report = dispatcher.send(&chunk, &metadata, "http://hook").await;
        assert_eq!(report.outcome, DeliveryOutcome::Delivered { status: 200 });
        assert_eq!(report.attempts.len(), 3);
        assert_eq!(transport.calls(), 3);
        assert!(report.attempts[2].succeeded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_is_not_retried() {
        let transport = Replay::new(vec![Ok(422)]);
        let dispatcher = ChunkDispatcher::new(DispatchConfig::default(), transport.clone());
        let (chunk, metadata) = chunk();

        let report = dispatcher.send(&chunk, &metadata, "http://hook").await;
        assert!(matches!(
            report.outcome,
            DeliveryOutcome::Abandoned {
                error: DispatchError::Rejected { status: 422, .. }
            }
        ));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_waits_between_attempts() {
        let transport = Replay::new(vec![Ok(503), Ok(503), Ok(503), Ok(503)]);
        let dispatcher = ChunkDispatcher::new(DispatchConfig::default(), transport.clone());
        let (chunk, metadata) = chunk();

        let started = Instant::now();
        let report = dispatcher.send(&chunk, &metadata, "http://hook").await;
        assert!(!report.is_delivered());
        assert_eq!(transport.calls(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_still_attempts_once() {
        let transport = Replay::new(vec![Ok(500)]);
        let config = DispatchConfig {
            max_retries: 0,
            ..DispatchConfig::default()
        };
        let dispatcher = ChunkDispatcher::new(config, transport.clone());
        let (chunk, metadata) = chunk();

        let report = dispatcher.send(&chunk, &metadata, "http://hook").await;
        assert_eq!(report.attempts.len(), 1);
        assert!(!report.is_delivered());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_is_single_attempt() {
        let transport = Replay::new(vec![Ok(502)]);
        let dispatcher = ChunkDispatcher::new(DispatchConfig::default(), transport.clone());

        let report = dispatcher.probe("http://hook").await;
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(report.attempts[0].status, Some(502));
        assert_eq!(transport.calls(), 1);
    }
}
