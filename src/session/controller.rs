use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::{DropPolicy, SessionConfig};
use super::model::{RecordingSession, SessionId};
use super::origin::OriginContext;
use super::stats::{SessionProgress, SessionSummary};
use crate::audio::{AcquisitionError, AudioSourceProvider, SourceDescriptor};
use crate::dispatch::{ChunkDispatcher, DeliveryOutcome};
use crate::error::ErrorCategory;
use crate::recording::{Boundary, ChunkRecorder, EncoderError, EncoderFactory, EncoderFormat};
use crate::store::{PersistedState, SessionStateStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Starting,
    Recording,
    Finalizing,
}

#[derive(Debug, Clone)]
pub struct StartRequest {
    pub source: SourceDescriptor,
    pub origin: OriginContext,
    pub endpoint: String,
}

/// Progress notifications broadcast by a running session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Started {
        session_id: SessionId,
        source: SourceDescriptor,
    },
    ChunkDelivered {
        session_id: SessionId,
        index: u64,
        bytes: usize,
        attempts: u32,
        is_last: bool,
    },
    ChunkAbandoned {
        session_id: SessionId,
        index: u64,
        attempts: u32,
        reason: String,
        permanent: bool,
    },
    Stopped {
        summary: SessionSummary,
    },
    Failed {
        session_id: Option<SessionId>,
        category: ErrorCategory,
        message: String,
    },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("already recording session {session_id}")]
    AlreadyRecording { session_id: SessionId },

    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    #[error(transparent)]
    Encoder(#[from] EncoderError),

    #[error("session state store failed: {0}")]
    Store(#[from] StoreError),

    #[error("no session is recording")]
    NotRecording,

    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
}

impl SessionError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SessionError::Acquisition(e) => e.category(),
            SessionError::Encoder(e) => e.category(),
            SessionError::InvalidEndpoint { .. } => ErrorCategory::Network,
            SessionError::AlreadyRecording { .. } | SessionError::Store(_) | SessionError::NotRecording => {
                ErrorCategory::Internal
            }
        }
    }
}

pub enum SessionCommand {
    Stop {
        reply: oneshot::Sender<Result<SessionSummary, SessionError>>,
    },
    Progress {
        reply: oneshot::Sender<Option<SessionProgress>>,
    },
}

#[derive(Debug, Default)]
struct Counters {
    delivered: u64,
    abandoned: u64,
    bytes_sent: u64,
    last_index: Option<u64>,
}

/// Drives one recording session at a time
///
/// Owns the session identity, chunk sequencing and first/last flags. The
/// boundary path and the stop path both go through `flush_and_dispatch`.
pub struct SessionController {
    config: SessionConfig,
    provider: AudioSourceProvider,
    dispatcher: ChunkDispatcher,
    store: Arc<dyn SessionStateStore>,
    encoder: Option<Arc<dyn EncoderFactory>>,

    state: SessionState,
    session: Option<RecordingSession>,
    recorder: Option<ChunkRecorder>,

    /// Set as soon as a stop is requested, read at every flush
    stopping: Arc<AtomicBool>,

    counters: Counters,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        provider: AudioSourceProvider,
        dispatcher: ChunkDispatcher,
        store: Arc<dyn SessionStateStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            config,
            provider,
            dispatcher,
            store,
            encoder: None,
            state: SessionState::Idle,
            session: None,
            recorder: None,
            stopping: Arc::new(AtomicBool::new(false)),
            counters: Counters::default(),
            events,
        }
    }

    /// Use this encoder instead of negotiating one from the configured formats
    pub fn with_encoder(mut self, factory: Arc<dyn EncoderFactory>) -> Self {
        self.encoder = Some(factory);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session(&self) -> Option<&RecordingSession> {
        self.session.as_ref()
    }

    pub fn stopping_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stopping)
    }

    pub fn progress(&self) -> Option<SessionProgress> {
        self.session.as_ref().map(|session| SessionProgress {
            session_id: session.session_id.clone(),
            state: self.state,
            sequence_counter: session.sequence_counter,
            chunks_delivered: self.counters.delivered,
            chunks_abandoned: self.counters.abandoned,
            bytes_sent: self.counters.bytes_sent,
            started_at: session.started_at,
        })
    }

    /// Acquire audio, begin encoding and persist the new session
    pub async fn start(&mut self, request: StartRequest) -> Result<SessionId, SessionError> {
        if let Some(session) = &self.session {
            warn!("Start rejected: session {} is {:?}", session.session_id, self.state);
            return Err(SessionError::AlreadyRecording {
                session_id: session.session_id.clone(),
            });
        }

        // Another surface or an earlier process may own a session
        if let Some(existing) = self.store.load().await? {
            if let (true, Some(session_id)) = (existing.is_recording, existing.session_id()) {
                warn!("Start rejected: store reports session {} in flight", session_id);
                return Err(SessionError::AlreadyRecording {
                    session_id: session_id.clone(),
                });
            }
        }

        validate_endpoint(&request.endpoint)?;

        let factory = match &self.encoder {
            Some(factory) => Arc::clone(factory),
            None => Arc::new(EncoderFormat::negotiate(&self.config.formats)?),
        };

        self.state = SessionState::Starting;
        self.stopping.store(false, Ordering::SeqCst);
        self.counters = Counters::default();

        let mut session = RecordingSession::new(request.source, request.origin, request.endpoint);
        info!(
            "Starting session {} ({} audio, meeting {})",
            session.session_id, request.source, session.origin.meeting_id
        );

        let stream = match self.provider.acquire(request.source, &session.origin).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Audio acquisition failed for {}: {}", session.session_id, e);
                self.state = SessionState::Idle;
                self.emit(SessionEvent::Failed {
                    session_id: Some(session.session_id),
                    category: e.category(),
                    message: e.to_string(),
                });
                return Err(e.into());
            }
        };

        if stream.descriptor() != request.source {
            info!("Session {} recording {} after fallback", session.session_id, stream.descriptor());
        }
        session.source = stream.descriptor();

        let recorder = match ChunkRecorder::begin(factory, stream, self.config.boundary.clone()) {
            Ok(recorder) => recorder,
            Err(e) => {
                error!("Encoder failed to start for {}: {}", session.session_id, e);
                self.state = SessionState::Idle;
                return Err(e.into());
            }
        };

        if let Err(e) = self.store.save(&PersistedState::recording(&session)).await {
            error!("Failed to persist session {}: {}", session.session_id, e);
            recorder.release().await;
            self.state = SessionState::Idle;
            return Err(e.into());
        }

        let session_id = session.session_id.clone();
        self.emit(SessionEvent::Started {
            session_id: session_id.clone(),
            source: session.source,
        });

        self.session = Some(session);
        self.recorder = Some(recorder);
        self.state = SessionState::Recording;

        info!("Session {} recording", session_id);
        Ok(session_id)
    }

    /// Wait for the recorder's next boundary; pending while not recording
    pub async fn next_boundary(&mut self) -> Result<Boundary, EncoderError> {
        match self.recorder.as_mut() {
            Some(recorder) if self.state == SessionState::Recording => recorder.next_boundary().await,
            _ => std::future::pending().await,
        }
    }

    /// Handle a recorder boundary; yields the summary when it ended the session
    pub async fn on_boundary(&mut self, boundary: Boundary) -> Result<Option<SessionSummary>, SessionError> {
        match boundary {
            Boundary::Interval | Boundary::SizeExceeded => {
                debug!("Boundary reached: {:?}", boundary);
                self.flush_and_dispatch(false).await.map(|_| None)
            }
            Boundary::SourceEnded => {
                info!("Audio source ended, finalizing session");
                self.finalize().await.map(Some)
            }
        }
    }

    /// Flush the current segment, send it and advance the counters
    pub async fn flush_and_dispatch(&mut self, is_last: bool) -> Result<(), SessionError> {
        let is_last = is_last || self.stopping.load(Ordering::SeqCst);

        let (Some(session), Some(recorder)) = (self.session.as_mut(), self.recorder.as_mut()) else {
            return Err(SessionError::NotRecording);
        };

        let segment = recorder.flush(is_last).await?;
        let chunk = session.chunk_from(segment, is_last, recorder.format());
        if is_last {
            session.is_complete = true;
        }

        let metadata = session.chunk_metadata();
        let report = self.dispatcher.send(&chunk, &metadata, &session.endpoint).await;
        let attempts = report.attempts.len() as u32;

        if is_last {
            self.counters.last_index = Some(chunk.index);
        }

        let event = match report.outcome {
            DeliveryOutcome::Delivered { .. } => {
                session.sequence_counter += 1;
                session.is_first = false;
                self.counters.delivered += 1;
                self.counters.bytes_sent += chunk.payload.len() as u64;
                SessionEvent::ChunkDelivered {
                    session_id: session.session_id.clone(),
                    index: chunk.index,
                    bytes: chunk.payload.len(),
                    attempts,
                    is_last,
                }
            }
            DeliveryOutcome::Abandoned { error } => {
                self.counters.abandoned += 1;
                if self.config.drop_policy == DropPolicy::AdvanceIndex {
                    session.sequence_counter += 1;
                }
                warn!(
                    "Chunk {} of {} abandoned after {} attempt(s), counter at {}",
                    chunk.index, session.session_id, attempts, session.sequence_counter
                );
                SessionEvent::ChunkAbandoned {
                    session_id: session.session_id.clone(),
                    index: chunk.index,
                    attempts,
                    permanent: !error.is_retryable(),
                    reason: error.to_string(),
                }
            }
        };

        if !is_last {
            if let Err(e) = self.store.save(&PersistedState::recording(session)).await {
                warn!("Failed to persist progress for {}: {}", session.session_id, e);
            }
        }

        self.emit(event);
        Ok(())
    }

    /// Send the final chunk, release the audio and clear the store
    pub async fn finalize(&mut self) -> Result<SessionSummary, SessionError> {
        if self.session.is_none() || self.state != SessionState::Recording {
            return Err(SessionError::NotRecording);
        }

        self.stopping.store(true, Ordering::SeqCst);
        self.state = SessionState::Finalizing;

        let complete = self.session.as_ref().map(|s| s.is_complete).unwrap_or(false);
        if !complete {
            if let Err(e) = self.flush_and_dispatch(true).await {
                return Err(self.fail(e).await);
            }
        }

        let summary = self.teardown().await.ok_or(SessionError::NotRecording)?;
        info!(
            "Session {} stopped: {} delivered, {} abandoned, {} bytes",
            summary.session_id, summary.chunks_delivered, summary.chunks_abandoned, summary.bytes_sent
        );
        self.emit(SessionEvent::Stopped {
            summary: summary.clone(),
        });
        Ok(summary)
    }

    /// Alias for `finalize`
    pub async fn stop(&mut self) -> Result<SessionSummary, SessionError> {
        self.finalize().await
    }

    /// Tear the session down after a fatal error and report it
    pub async fn fail(&mut self, error: SessionError) -> SessionError {
        let session_id = self.session.as_ref().map(|s| s.session_id.clone());
        error!(
            "Session {} failed ({}): {}",
            session_id.as_ref().map(|id| id.as_str()).unwrap_or("-"),
            error.category(),
            error
        );

        self.teardown().await;
        self.emit(SessionEvent::Failed {
            session_id,
            category: error.category(),
            message: error.to_string(),
        });
        error
    }

    /// Run the session loop until it stops or fails
    ///
    /// Commands are polled first, so a queued stop wins over a boundary that
    /// is ready at the same time.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) -> Option<SessionSummary> {
        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(SessionCommand::Stop { reply }) => {
                        let result = self.stop().await;
                        let summary = result.as_ref().ok().cloned();
                        let _ = reply.send(result);
                        return summary;
                    }
                    Some(SessionCommand::Progress { reply }) => {
                        let _ = reply.send(self.progress());
                    }
                    None => {
                        warn!("Session handle dropped, finalizing");
                        return self.stop().await.ok();
                    }
                },

                boundary = self.next_boundary() => {
                    let result = match boundary {
                        Ok(boundary) => self.on_boundary(boundary).await,
                        Err(e) => Err(e.into()),
                    };
                    match result {
                        Ok(Some(summary)) => return Some(summary),
                        Ok(None) => {}
                        Err(e) => {
                            // finalize tears down and reports its own failures
                            if self.state != SessionState::Idle {
                                self.fail(e).await;
                            }
                            return None;
                        }
                    }
                }
            }
        }
    }

    /// Start a session and hand its loop to a background task
    pub async fn spawn(mut self, request: StartRequest) -> Result<SessionHandle, SessionError> {
        let session_id = self.start(request).await?;
        let (commands_tx, commands_rx) = mpsc::channel(8);
        let stopping = self.stopping_flag();
        let events = self.events.clone();
        let task = tokio::spawn(self.run(commands_rx));

        Ok(SessionHandle {
            session_id,
            commands: commands_tx,
            stopping,
            events,
            task,
        })
    }

    async fn teardown(&mut self) -> Option<SessionSummary> {
        if let Some(recorder) = self.recorder.take() {
            recorder.release().await;
        }
        if let Err(e) = self.store.clear().await {
            error!("Failed to clear session state: {}", e);
        }

        self.state = SessionState::Idle;
        self.stopping.store(false, Ordering::SeqCst);

        let session = self.session.take()?;
        let counters = std::mem::take(&mut self.counters);
        Some(SessionSummary {
            session_id: session.session_id,
            chunks_delivered: counters.delivered,
            chunks_abandoned: counters.abandoned,
            bytes_sent: counters.bytes_sent,
            started_at: session.started_at,
            duration_secs: (Utc::now() - session.started_at).num_milliseconds() as f64 / 1000.0,
            last_index: counters.last_index,
        })
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

fn validate_endpoint(endpoint: &str) -> Result<(), SessionError> {
    let invalid = |reason: &str| SessionError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    };

    let url = url::Url::parse(endpoint).map_err(|e| invalid(&e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(invalid(&format!("unsupported scheme {}", other))),
    }
}

/// Handle to a session running on its own task
pub struct SessionHandle {
    session_id: SessionId,
    commands: mpsc::Sender<SessionCommand>,
    stopping: Arc<AtomicBool>,
    events: broadcast::Sender<SessionEvent>,
    task: JoinHandle<Option<SessionSummary>>,
}

impl SessionHandle {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Request a stop and wait for the final chunk to be resolved
    pub async fn stop(&self) -> Result<SessionSummary, SessionError> {
        self.stopping.store(true, Ordering::SeqCst);

        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::Stop { reply })
            .await
            .map_err(|_| SessionError::NotRecording)?;
        rx.await.map_err(|_| SessionError::NotRecording)?
    }

    pub async fn progress(&self) -> Option<SessionProgress> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(SessionCommand::Progress { reply }).await.ok()?;
        rx.await.ok().flatten()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the session task to exit
    pub async fn join(self) -> Option<SessionSummary> {
        self.task.await.ok().flatten()
    }
}
