// Capability-level audio acquisition
//
// Maps the three capture capabilities (microphone, system, combined) onto
// concrete backends and hands the session a single normalized frame stream.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::backend::{
    AcquisitionError, AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource,
    AudioStreamSource,
};
use super::convert::process_frame;
use super::mixer::{AudioMixer, MixerConfig};
use crate::session::OriginContext;

/// Pages that never allow tab/system audio capture
const UNSUPPORTED_URL_PREFIXES: &[&str] = &[
    "chrome://",
    "chrome-extension://",
    "edge://",
    "about:",
    "moz-extension://",
    "safari-extension://",
    "chrome-search://",
    "chrome-devtools://",
];

/// Capture capability chosen for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceDescriptor {
    Microphone,
    System,
    #[serde(alias = "both")]
    Combined,
}

impl SourceDescriptor {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceDescriptor::Microphone => "microphone",
            SourceDescriptor::System => "system",
            SourceDescriptor::Combined => "combined",
        }
    }

    /// Whether this capability needs access to the recorded page's audio
    pub fn needs_page_audio(&self) -> bool {
        !matches!(self, SourceDescriptor::Microphone)
    }
}

impl std::fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceDescriptor {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "microphone" | "mic" => Ok(SourceDescriptor::Microphone),
            "system" | "tab" => Ok(SourceDescriptor::System),
            "combined" | "both" => Ok(SourceDescriptor::Combined),
            other => anyhow::bail!("Invalid audio source: {}", other),
        }
    }
}

pub fn is_unsupported_url(url: &str) -> bool {
    url.is_empty() || UNSUPPORTED_URL_PREFIXES.iter().any(|prefix| url.starts_with(prefix))
}

/// Opens a backend for one capture capability
pub trait CaptureBackends: Send + Sync {
    fn open(&self, capability: AudioStreamSource) -> Result<Box<dyn AudioBackend>, AcquisitionError>;
}

/// Backends resolved from the `capture` config section
#[derive(Debug, Clone)]
pub struct ConfiguredBackends {
    pub microphone: AudioSource,
    pub system: AudioSource,
    pub config: AudioBackendConfig,
}

impl CaptureBackends for ConfiguredBackends {
    fn open(&self, capability: AudioStreamSource) -> Result<Box<dyn AudioBackend>, AcquisitionError> {
        let source = match capability {
            AudioStreamSource::Microphone => &self.microphone,
            AudioStreamSource::System => &self.system,
        };
        AudioBackendFactory::create(source, capability, self.config.clone())
    }
}

/// A live, normalized audio stream owned by whoever records it
pub struct AudioStream {
    descriptor: SourceDescriptor,
    frames: mpsc::Receiver<AudioFrame>,
    backends: Vec<Box<dyn AudioBackend>>,
    tasks: Vec<JoinHandle<()>>,
}

impl AudioStream {
    /// Wrap an externally produced frame channel
    pub fn from_receiver(descriptor: SourceDescriptor, frames: mpsc::Receiver<AudioFrame>) -> Self {
        Self {
            descriptor,
            frames,
            backends: Vec::new(),
            tasks: Vec::new(),
        }
    }

    /// Capability actually delivering audio (after any fallback)
    pub fn descriptor(&self) -> SourceDescriptor {
        self.descriptor
    }

    /// Next frame, or `None` once every producer has ended
    pub async fn recv(&mut self) -> Option<AudioFrame> {
        self.frames.recv().await
    }

    /// Frame already queued, without waiting
    pub fn try_recv(&mut self) -> Option<AudioFrame> {
        self.frames.try_recv().ok()
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    /// Stop all backends and helper tasks
    pub async fn release(mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        for backend in self.backends.iter_mut() {
            if let Err(e) = backend.stop().await {
                error!("Failed to stop {}: {}", backend.name(), e);
            }
        }
        self.frames.close();
        info!("Released {} audio stream", self.descriptor);
    }
}

/// Acquires audio streams for capture capabilities
#[derive(Clone)]
pub struct AudioSourceProvider {
    backends: Arc<dyn CaptureBackends>,
    config: AudioBackendConfig,
    fallback_to_microphone: bool,
}

impl AudioSourceProvider {
    pub fn new(backends: Arc<dyn CaptureBackends>, config: AudioBackendConfig) -> Self {
        Self {
            backends,
            config,
            fallback_to_microphone: true,
        }
    }

    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback_to_microphone = enabled;
        self
    }

    /// Reject page-audio capture from contexts that can never be captured
    pub fn check_availability(
        &self,
        descriptor: SourceDescriptor,
        origin: &OriginContext,
    ) -> Result<(), AcquisitionError> {
        if descriptor.needs_page_audio() && is_unsupported_url(&origin.url) {
            return Err(AcquisitionError::UnsupportedContext {
                reason: format!("internal pages cannot be captured ({})", origin.url),
            });
        }
        Ok(())
    }

    /// Acquire a stream for `descriptor`, falling back to the microphone when
    /// page audio fails for a reason other than a refused permission
    pub async fn acquire(
        &self,
        descriptor: SourceDescriptor,
        origin: &OriginContext,
    ) -> Result<AudioStream, AcquisitionError> {
        self.check_availability(descriptor, origin)?;

        match self.acquire_exact(descriptor).await {
            Ok(stream) => Ok(stream),
            Err(e) if descriptor.needs_page_audio() && self.fallback_to_microphone && !e.is_permission_denied() => {
                warn!("Failed to capture {}: {}. Falling back to microphone only", descriptor, e);
                self.acquire_exact(SourceDescriptor::Microphone).await
            }
            Err(e) => Err(e),
        }
    }

    async fn acquire_exact(&self, descriptor: SourceDescriptor) -> Result<AudioStream, AcquisitionError> {
        match descriptor {
            SourceDescriptor::Microphone => self.open_single(descriptor, AudioStreamSource::Microphone).await,
            SourceDescriptor::System => self.open_single(descriptor, AudioStreamSource::System).await,
            SourceDescriptor::Combined => self.open_combined().await,
        }
    }

    async fn open_single(
        &self,
        descriptor: SourceDescriptor,
        capability: AudioStreamSource,
    ) -> Result<AudioStream, AcquisitionError> {
        let mut backend = self.backends.open(capability)?;
        let rx = backend.start().await?;

        info!("Acquired {} audio via {}", capability, backend.name());

        let (tx, frames) = mpsc::channel(100);
        let task = self.spawn_normalizer(rx, tx);

        Ok(AudioStream {
            descriptor,
            frames,
            backends: vec![backend],
            tasks: vec![task],
        })
    }

    async fn open_combined(&self) -> Result<AudioStream, AcquisitionError> {
        let mut microphone = self.backends.open(AudioStreamSource::Microphone)?;
        let mut system = self.backends.open(AudioStreamSource::System)?;

        let mic_rx = microphone.start().await?;
        let system_rx = match system.start().await {
            Ok(rx) => rx,
            Err(e) => {
                if let Err(stop_err) = microphone.stop().await {
                    error!("Failed to stop microphone after system failure: {}", stop_err);
                }
                return Err(e);
            }
        };

        info!(
            "Acquired combined audio via {} + {}",
            microphone.name(),
            system.name()
        );

        let (merged_tx, merged_rx) = mpsc::channel(200);
        let mut tasks = vec![
            self.spawn_normalizer(mic_rx, merged_tx.clone()),
            self.spawn_normalizer(system_rx, merged_tx),
        ];

        let mixer = AudioMixer::new(MixerConfig {
            sample_rate: self.config.target_sample_rate,
            channels: self.config.target_channels,
            ..MixerConfig::default()
        });
        let (out_tx, frames) = mpsc::channel(100);
        tasks.push(tokio::spawn(async move {
            mixer.run(merged_rx, out_tx).await;
        }));

        Ok(AudioStream {
            descriptor: SourceDescriptor::Combined,
            frames,
            backends: vec![microphone, system],
            tasks,
        })
    }

    fn spawn_normalizer(
        &self,
        mut rx: mpsc::Receiver<AudioFrame>,
        tx: mpsc::Sender<AudioFrame>,
    ) -> JoinHandle<()> {
        let sample_rate = self.config.target_sample_rate;
        let channels = self.config.target_channels;
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if tx.send(process_frame(frame, sample_rate, channels)).await.is_err() {
                    break;
                }
            }
        })
    }
}
