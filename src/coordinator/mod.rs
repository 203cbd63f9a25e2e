//! Single-active-session coordination
//!
//! The coordinator is the one entry point every control surface (HTTP API,
//! CLI) goes through. It requires a `setup` before each start, keeps the
//! recording indicator, and answers status from the state store rather than
//! from its own memory.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info, warn};

use crate::audio::{AudioSourceProvider, SourceDescriptor};
use crate::config::Config;
use crate::dispatch::ChunkDispatcher;
use crate::error::ErrorCategory;
use crate::recording::EncoderFactory;
use crate::session::{
    OriginContext, SessionConfig, SessionController, SessionError, SessionEvent, SessionHandle, SessionId,
    SessionProgress, SessionSummary, StartRequest,
};
use crate::store::{FileStateStore, SessionStateStore, StoreError};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("setup must be called before start")]
    NotSetUp,

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CoordinatorError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            CoordinatorError::Session(e) => e.category(),
            CoordinatorError::NotSetUp | CoordinatorError::Store(_) => ErrorCategory::Internal,
        }
    }
}

/// Everything needed to build a session controller
#[derive(Clone)]
pub struct SessionServices {
    pub provider: AudioSourceProvider,
    pub dispatcher: ChunkDispatcher,
    pub store: Arc<dyn SessionStateStore>,
    pub session_config: SessionConfig,
    pub encoder: Option<Arc<dyn EncoderFactory>>,
}

impl SessionServices {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let provider = AudioSourceProvider::new(config.capture_backends()?, config.backend_config())
            .with_fallback(config.capture.fallback_to_microphone);
        let dispatcher =
            ChunkDispatcher::http(config.dispatch_config()).context("Failed to create webhook client")?;
        let store = Arc::new(FileStateStore::new(config.state_path()));

        Ok(Self {
            provider,
            dispatcher,
            store,
            session_config: config.session_config(),
            encoder: None,
        })
    }

    pub fn controller(&self) -> SessionController {
        let controller = SessionController::new(
            self.session_config.clone(),
            self.provider.clone(),
            self.dispatcher.clone(),
            Arc::clone(&self.store),
        );
        match &self.encoder {
            Some(factory) => controller.with_encoder(Arc::clone(factory)),
            None => controller,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SetupRequest {
    pub source: SourceDescriptor,
    pub endpoint: String,
    pub origin: OriginContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupResponse {
    pub ready: bool,
    /// Session already holding the recorder when not ready
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SetupResponse {
    fn ready() -> Self {
        Self {
            ready: true,
            session_id: None,
            reason: None,
        }
    }

    fn not_ready(session_id: Option<SessionId>, reason: impl Into<String>) -> Self {
        Self {
            ready: false,
            session_id,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStatus {
    pub is_recording: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// The store claims a session that no live producer here owns
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    Stopped(SessionSummary),
    /// A recording flag with no live producer was cleared
    StaleCleared(Option<SessionId>),
    /// Another stop is already finalizing this session
    Stopping(SessionId),
    NotRecording,
}

#[derive(Default)]
struct Inner {
    pending: Option<SetupRequest>,
    /// Held until the session task exits, including while it finalizes
    active: Option<Arc<SessionHandle>>,
    finalizing: bool,
}

impl Inner {
    fn live_session(&self) -> Option<&Arc<SessionHandle>> {
        self.active.as_ref().filter(|handle| !handle.is_finished())
    }

    /// Forget a handle whose task has exited
    fn reap(&mut self) {
        if self.active.as_ref().is_some_and(|handle| handle.is_finished()) {
            self.active = None;
            self.finalizing = false;
        }
    }
}

pub struct RecordingCoordinator {
    services: SessionServices,
    inner: Mutex<Inner>,
    indicator: Arc<watch::Sender<bool>>,
}

impl RecordingCoordinator {
    pub fn new(services: SessionServices) -> Self {
        let (indicator, _) = watch::channel(false);
        Self {
            services,
            inner: Mutex::new(Inner::default()),
            indicator: Arc::new(indicator),
        }
    }

    /// Prepare the next session; must precede `start`
    pub async fn setup(&self, request: SetupRequest) -> Result<SetupResponse, CoordinatorError> {
        let mut inner = self.inner.lock().await;

        if let Some(handle) = inner.live_session() {
            info!("Setup refused: session {} is recording", handle.session_id());
            return Ok(SetupResponse::not_ready(
                Some(handle.session_id().clone()),
                "already recording",
            ));
        }

        if let Some(state) = self.services.store.load().await? {
            if state.is_recording {
                let session_id = state.session_id().cloned();
                warn!("Setup refused: store holds in-flight session {:?}", session_id);
                return Ok(SetupResponse::not_ready(
                    session_id,
                    "a recording is already in progress; stop it first",
                ));
            }
        }

        if let Err(e) = self.services.provider.check_availability(request.source, &request.origin) {
            info!("Setup refused: {}", e);
            return Ok(SetupResponse::not_ready(None, e.to_string()));
        }

        debug!("Setup accepted: {} audio to {}", request.source, request.endpoint);
        inner.pending = Some(request);
        Ok(SetupResponse::ready())
    }

    /// Start the session prepared by the last `setup`
    pub async fn start(&self) -> Result<SessionId, CoordinatorError> {
        let mut inner = self.inner.lock().await;

        if let Some(handle) = inner.live_session() {
            return Err(SessionError::AlreadyRecording {
                session_id: handle.session_id().clone(),
            }
            .into());
        }

        let request = inner.pending.take().ok_or(CoordinatorError::NotSetUp)?;
        let controller = self.services.controller();
        let events = controller.subscribe();
        let handle = controller
            .spawn(StartRequest {
                source: request.source,
                origin: request.origin,
                endpoint: request.endpoint,
            })
            .await?;

        let session_id = handle.session_id().clone();
        inner.active = Some(Arc::new(handle));
        inner.finalizing = false;
        drop(inner);

        self.started();
        self.watch_session(events);
        Ok(session_id)
    }

    pub fn started(&self) {
        self.indicator.send_replace(true);
        info!("Recording indicator on");
    }

    pub fn stopped(&self) {
        self.indicator.send_replace(false);
        info!("Recording indicator off");
    }

    pub fn indicator(&self) -> watch::Receiver<bool> {
        self.indicator.subscribe()
    }

    /// Stop the live session, or clear a stale recording flag
    ///
    /// The handle stays registered while the final chunk is delivered, so a
    /// concurrent stop, setup or status still sees the session as live.
    pub async fn stop_requested(&self) -> Result<StopOutcome, CoordinatorError> {
        let handle = {
            let mut inner = self.inner.lock().await;
            inner.reap();
            match inner.active.clone() {
                Some(handle) if inner.finalizing => {
                    info!("Session {} is already stopping", handle.session_id());
                    return Ok(StopOutcome::Stopping(handle.session_id().clone()));
                }
                Some(handle) => {
                    inner.finalizing = true;
                    Some(handle)
                }
                None => None,
            }
        };

        // Never hold the lock while the final chunk is being delivered
        if let Some(handle) = handle {
            let result = handle.stop().await;
            self.release(&handle).await;

            match result {
                Ok(summary) => {
                    self.stopped();
                    return Ok(StopOutcome::Stopped(summary));
                }
                Err(SessionError::NotRecording) => {
                    debug!("Session {} had already ended", handle.session_id());
                }
                Err(e) => {
                    self.stopped();
                    return Err(e.into());
                }
            }
        }

        if let Some(state) = self.services.store.load().await? {
            if state.is_recording {
                let session_id = state.session_id().cloned();
                warn!("Clearing stale recording state for {:?}", session_id);
                self.services.store.clear().await?;
                self.stopped();
                return Ok(StopOutcome::StaleCleared(session_id));
            }
        }

        self.stopped();
        Ok(StopOutcome::NotRecording)
    }

    /// Drop `handle` once its stop has resolved, unless a newer session replaced it
    async fn release(&self, handle: &Arc<SessionHandle>) {
        let mut inner = self.inner.lock().await;
        if inner.active.as_ref().is_some_and(|active| Arc::ptr_eq(active, handle)) {
            inner.active = None;
            inner.finalizing = false;
        }
    }

    /// Recording status, with the state store as the source of truth
    pub async fn status(&self) -> Result<RecordingStatus, CoordinatorError> {
        let persisted = self.services.store.load().await?;
        let inner = self.inner.lock().await;
        let live = inner.live_session().map(|handle| handle.session_id().clone());

        match persisted {
            Some(state) if state.is_recording => {
                let session_id = state.session_id().cloned();
                let stale = live.is_none() || live != session_id;
                if stale {
                    warn!("Store reports session {:?} but no live producer owns it", session_id);
                }
                Ok(RecordingStatus {
                    is_recording: true,
                    session_id,
                    stale,
                })
            }
            _ => Ok(RecordingStatus {
                is_recording: false,
                session_id: None,
                stale: false,
            }),
        }
    }

    pub async fn progress(&self) -> Option<SessionProgress> {
        let handle = {
            let inner = self.inner.lock().await;
            if inner.finalizing {
                return None;
            }
            inner.live_session().cloned()?
        };
        handle.progress().await
    }

    /// Turn the indicator off when the session ends on its own
    fn watch_session(&self, mut events: broadcast::Receiver<SessionEvent>) {
        let indicator = Arc::clone(&self.indicator);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::Stopped { .. }) | Ok(SessionEvent::Failed { .. }) => {
                        indicator.send_replace(false);
                        break;
                    }
                    Ok(SessionEvent::ChunkAbandoned { index, reason, .. }) => {
                        warn!("Chunk {} was not delivered: {}", index, reason);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Session event listener lagged by {}", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        indicator.send_replace(false);
                        break;
                    }
                }
            }
        });
    }
}
