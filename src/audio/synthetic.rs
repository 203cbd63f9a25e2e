// Synthetic capture backend
//
// Generates a continuous sine tone (or silence when the frequency is 0)
// paced by the tokio clock, one buffer per `buffer_duration_ms`.

use anyhow::Result;
use std::f32::consts::PI;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::backend::{AcquisitionError, AudioBackend, AudioBackendConfig, AudioFrame, AudioStreamSource};

pub struct ToneBackend {
    frequency_hz: f32,
    stream_source: AudioStreamSource,
    config: AudioBackendConfig,
    name: String,
    task: Option<JoinHandle<()>>,
}

impl ToneBackend {
    pub fn new(frequency_hz: f32, stream_source: AudioStreamSource, config: AudioBackendConfig) -> Self {
        let name = if frequency_hz > 0.0 {
            format!("tone {}Hz ({})", frequency_hz, stream_source)
        } else {
            format!("silence ({})", stream_source)
        };

        Self {
            frequency_hz,
            stream_source,
            config,
            name,
            task: None,
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for ToneBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, AcquisitionError> {
        if self.task.is_some() {
            return Err(AcquisitionError::Backend {
                capability: self.stream_source.to_string(),
                reason: "already capturing".to_string(),
            });
        }

        let (tx, rx) = mpsc::channel(100);
        let sample_rate = self.config.target_sample_rate;
        let channels = self.config.target_channels.max(1);
        let buffer_ms = self.config.buffer_duration_ms.max(1);
        let frequency = self.frequency_hz;
        let source = self.stream_source;
        let frames_per_buffer = (sample_rate as u64 * buffer_ms / 1000) as usize;

        info!("Starting {} ({}Hz, {} channels)", self.name, sample_rate, channels);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(buffer_ms));
            let mut phase: f32 = 0.0;
            let step = 2.0 * PI * frequency / sample_rate as f32;
            let mut timestamp_ms = 0u64;

            loop {
                ticker.tick().await;

                let mut samples = Vec::with_capacity(frames_per_buffer * channels as usize);
                for _ in 0..frames_per_buffer {
                    let value = if frequency > 0.0 {
                        (phase.sin() * i16::MAX as f32 * 0.25) as i16
                    } else {
                        0
                    };
                    phase = (phase + step) % (2.0 * PI);
                    for _ in 0..channels {
                        samples.push(value);
                    }
                }

                let frame = AudioFrame {
                    samples,
                    sample_rate,
                    channels,
                    timestamp_ms,
                    source,
                };

                if tx.send(frame).await.is_err() {
                    debug!("Tone receiver dropped, stopping generator");
                    break;
                }
                timestamp_ms += buffer_ms;
            }
        });

        self.task = Some(task);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("Stopped {}", self.name);
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
