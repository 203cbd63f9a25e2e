use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::audio::{AudioBackendConfig, AudioSource, ConfiguredBackends};
use crate::dispatch::DispatchConfig;
use crate::recording::BoundaryPolicy;
use crate::session::{DropPolicy, SessionConfig};

pub const DEFAULT_CONFIG_PATH: &str = "config/meeting-audio-capture";
pub const ENV_PREFIX: &str = "MEETING_AUDIO";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub webhook: WebhookConfig,
    pub recorder: RecorderConfig,
    pub capture: CaptureConfig,
    pub state: StateConfig,
    pub receiver: ReceiverConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "meeting-audio-capture".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub url: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        let dispatch = DispatchConfig::default();
        Self {
            url: "http://localhost:3000/webhook/meeting-audio".to_string(),
            max_retries: dispatch.max_retries,
            retry_delay_ms: dispatch.retry_delay.as_millis() as u64,
            timeout_secs: dispatch.attempt_timeout.as_secs(),
            user_agent: dispatch.user_agent,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub chunk_interval_secs: u64,
    pub max_chunk_bytes: usize,
    pub timeslice_ms: u64,
    /// Encoder formats in order of preference
    pub formats: Vec<String>,
    pub drop_policy: DropPolicy,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        let boundary = BoundaryPolicy::default();
        let session = SessionConfig::default();
        Self {
            chunk_interval_secs: boundary.interval.as_secs(),
            max_chunk_bytes: boundary.max_pending_bytes,
            timeslice_ms: boundary.timeslice.as_millis() as u64,
            formats: session.formats,
            drop_policy: session.drop_policy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Backend spec serving the microphone capability (e.g. "tone:440")
    pub microphone: String,
    /// Backend spec serving the system capability (e.g. "file:~/call.wav")
    pub system: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub buffer_duration_ms: u64,
    pub fallback_to_microphone: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let backend = AudioBackendConfig::default();
        Self {
            microphone: "tone:440".to_string(),
            system: "silence".to_string(),
            sample_rate: backend.target_sample_rate,
            channels: backend.target_channels,
            buffer_duration_ms: backend.buffer_duration_ms,
            fallback_to_microphone: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub path: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: "~/.meeting-audio-capture/state.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub bind: String,
    pub port: u16,
    pub max_chunks: usize,
    pub max_attempts: usize,
    pub max_sessions_listed: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3000,
            max_chunks: 100,
            max_attempts: 50,
            max_sessions_listed: 20,
        }
    }
}

impl Config {
    /// Defaults, then the optional config file, then `MEETING_AUDIO_*` env vars
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to load config from {}", path))?;

        Ok(settings.try_deserialize()?)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            boundary: BoundaryPolicy {
                interval: Duration::from_secs(self.recorder.chunk_interval_secs.max(1)),
                max_pending_bytes: self.recorder.max_chunk_bytes,
                timeslice: Duration::from_millis(self.recorder.timeslice_ms.max(1)),
            },
            formats: self.recorder.formats.clone(),
            drop_policy: self.recorder.drop_policy,
        }
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            max_retries: self.webhook.max_retries,
            retry_delay: Duration::from_millis(self.webhook.retry_delay_ms),
            attempt_timeout: Duration::from_secs(self.webhook.timeout_secs.max(1)),
            user_agent: self.webhook.user_agent.clone(),
        }
    }

    pub fn backend_config(&self) -> AudioBackendConfig {
        AudioBackendConfig {
            target_sample_rate: self.capture.sample_rate,
            target_channels: self.capture.channels,
            buffer_duration_ms: self.capture.buffer_duration_ms,
        }
    }

    pub fn capture_backends(&self) -> Result<Arc<ConfiguredBackends>> {
        let microphone: AudioSource = self
            .capture
            .microphone
            .parse()
            .context("Invalid capture.microphone")?;
        let system: AudioSource = self.capture.system.parse().context("Invalid capture.system")?;

        Ok(Arc::new(ConfiguredBackends {
            microphone,
            system,
            config: self.backend_config(),
        }))
    }

    pub fn state_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.state.path).as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_protocol_defaults() {
        let config = Config::default();
        let session = config.session_config();
        assert_eq!(session.boundary.interval, Duration::from_secs(15));
        assert_eq!(session.boundary.max_pending_bytes, 5 * 1024 * 1024);
        assert_eq!(session.boundary.timeslice, Duration::from_secs(5));
        assert_eq!(session.drop_policy, DropPolicy::ReuseIndex);

        let dispatch = config.dispatch_config();
        assert_eq!(dispatch.max_retries, 3);
        assert_eq!(dispatch.retry_delay, Duration::from_secs(2));
        assert_eq!(dispatch.attempt_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[webhook]\nurl = \"http://example.test/hook\"\nmax_retries = 5\n\n[recorder]\nchunk_interval_secs = 30\ndrop_policy = \"advance-index\"\n"
        )
        .unwrap();

        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.webhook.url, "http://example.test/hook");
        assert_eq!(config.webhook.max_retries, 5);
        assert_eq!(config.webhook.timeout_secs, 30);
        assert_eq!(config.recorder.chunk_interval_secs, 30);
        assert_eq!(config.recorder.drop_policy, DropPolicy::AdvanceIndex);
        assert_eq!(config.capture.microphone, "tone:440");
    }
}
