use anyhow::Result;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::error::ErrorCategory;

/// Audio stream source type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioStreamSource {
    /// System audio (applications, browser tab, etc.)
    System,
    /// Microphone input
    Microphone,
}

impl std::fmt::Display for AudioStreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioStreamSource::System => f.write_str("system"),
            AudioStreamSource::Microphone => f.write_str("microphone"),
        }
    }
}

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
    /// Audio stream source (system or microphone)
    pub source: AudioStreamSource,
}

impl AudioFrame {
    /// Playback duration covered by this frame
    pub fn duration_ms(&self) -> u64 {
        let per_second = self.sample_rate as u64 * self.channels.max(1) as u64;
        if per_second == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / per_second
    }
}

/// Configuration for audio backend
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Target sample rate (will resample if needed)
    pub target_sample_rate: u32,
    /// Target channel count (1 = mono, 2 = stereo)
    pub target_channels: u16,
    /// Buffer size in milliseconds (affects latency)
    pub buffer_duration_ms: u64,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000, // 16kHz is plenty for speech
            target_channels: 1,        // Mono
            buffer_duration_ms: 100,   // 100ms buffers
        }
    }
}

/// Reasons a capture capability could not produce a stream
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AcquisitionError {
    #[error("{capability} capture permission denied")]
    PermissionDenied { capability: String },

    #[error("no {capability} device available")]
    NoDevice { capability: String },

    #[error("capture not supported in this context: {reason}")]
    UnsupportedContext { reason: String },

    #[error("{capability} backend failed to start: {reason}")]
    Backend { capability: String, reason: String },
}

impl AcquisitionError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            AcquisitionError::PermissionDenied { .. } => ErrorCategory::Permission,
            AcquisitionError::NoDevice { .. }
            | AcquisitionError::UnsupportedContext { .. }
            | AcquisitionError::Backend { .. } => ErrorCategory::Device,
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, AcquisitionError::PermissionDenied { .. })
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - Tone: synthetic sine/silence generator
/// - File: plays a decoded audio file back in real time
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, AcquisitionError>;

    /// Stop capturing audio
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create the backend that serves `stream_source` from a configured source spec
    pub fn create(
        source: &AudioSource,
        stream_source: AudioStreamSource,
        config: AudioBackendConfig,
    ) -> Result<Box<dyn AudioBackend>, AcquisitionError> {
        match source {
            AudioSource::Tone { frequency_hz } => Ok(Box::new(super::synthetic::ToneBackend::new(
                *frequency_hz,
                stream_source,
                config,
            ))),

            AudioSource::Silence => Ok(Box::new(super::synthetic::ToneBackend::new(
                0.0,
                stream_source,
                config,
            ))),

            AudioSource::File { path, looped } => Ok(Box::new(super::file::FileBackend::new(
                path.clone(),
                *looped,
                stream_source,
                config,
            ))),

            AudioSource::Unavailable => Err(AcquisitionError::NoDevice {
                capability: stream_source.to_string(),
            }),

            AudioSource::Denied => Err(AcquisitionError::PermissionDenied {
                capability: stream_source.to_string(),
            }),
        }
    }
}

/// Audio source spec bound to a capture capability
///
/// Parsed from config strings: `tone:440`, `silence`, `file:/path/a.wav`,
/// `file-loop:/path/a.wav`, `unavailable`, `denied`.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioSource {
    /// Sine tone generator
    Tone { frequency_hz: f32 },
    /// Digital silence
    Silence,
    /// File playback (any format symphonia can decode)
    File { path: PathBuf, looped: bool },
    /// Capability exists but no device is present
    Unavailable,
    /// Capability refused by the user or platform
    Denied,
}

impl FromStr for AudioSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "silence" => return Ok(AudioSource::Silence),
            "unavailable" | "none" => return Ok(AudioSource::Unavailable),
            "denied" => return Ok(AudioSource::Denied),
            _ => {}
        }

        if let Some(freq) = s.strip_prefix("tone:") {
            let frequency_hz: f32 = freq
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid tone frequency: {}", freq))?;
            return Ok(AudioSource::Tone { frequency_hz });
        }
        if s == "tone" {
            return Ok(AudioSource::Tone { frequency_hz: 440.0 });
        }
        if let Some(path) = s.strip_prefix("file-loop:") {
            return Ok(AudioSource::File {
                path: PathBuf::from(shellexpand::tilde(path).as_ref()),
                looped: true,
            });
        }
        if let Some(path) = s.strip_prefix("file:") {
            return Ok(AudioSource::File {
                path: PathBuf::from(shellexpand::tilde(path).as_ref()),
                looped: false,
            });
        }

        anyhow::bail!("Unknown audio source spec: {}", s)
    }
}
