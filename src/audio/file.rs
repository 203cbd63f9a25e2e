use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::backend::{AcquisitionError, AudioBackend, AudioBackendConfig, AudioFrame, AudioStreamSource};

pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    /// Decode a whole audio file (WAV, MP3, M4A, FLAC, OGG) into interleaved i16 samples
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open audio file: {}", path.display()))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .context("Unrecognized audio format")?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .context("No audio track found")?;

        let track_id = track.id;
        let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
        let mut channels = track.codec_params.channels.map(|c| c.count() as u16).unwrap_or(0);

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .context("Unsupported audio codec")?;

        let mut samples = Vec::new();

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break
                }
                Err(e) => return Err(e).context("Failed to read audio packet"),
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = decoder.decode(&packet).context("Failed to decode audio packet")?;
            let spec = *decoded.spec();
            sample_rate = spec.rate;
            channels = spec.channels.count() as u16;

            let mut buffer = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
            buffer.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buffer.samples());
        }

        if sample_rate == 0 || channels == 0 {
            anyhow::bail!("Audio file has no decodable samples: {}", path.display());
        }

        let duration_seconds = samples.len() as f64 / (sample_rate as f64 * channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            sample_rate,
            channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate,
            channels,
            samples,
        })
    }
}

/// Plays a decoded file back as a live capture stream, paced in real time
pub struct FileBackend {
    path: PathBuf,
    looped: bool,
    stream_source: AudioStreamSource,
    config: AudioBackendConfig,
    name: String,
    task: Option<JoinHandle<()>>,
}

impl FileBackend {
    pub fn new(
        path: PathBuf,
        looped: bool,
        stream_source: AudioStreamSource,
        config: AudioBackendConfig,
    ) -> Self {
        let name = format!("file {} ({})", path.display(), stream_source);
        Self {
            path,
            looped,
            stream_source,
            config,
            name,
            task: None,
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for FileBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, AcquisitionError> {
        let capability = self.stream_source.to_string();
        if self.task.is_some() {
            return Err(AcquisitionError::Backend {
                capability,
                reason: "already capturing".to_string(),
            });
        }

        let path = self.path.clone();
        let audio = tokio::task::spawn_blocking(move || AudioFile::open(path))
            .await
            .map_err(|e| AcquisitionError::Backend {
                capability: capability.clone(),
                reason: e.to_string(),
            })?
            .map_err(|e| AcquisitionError::NoDevice {
                capability: format!("{} ({:#})", capability, e),
            })?;

        let (tx, rx) = mpsc::channel(100);
        let buffer_ms = self.config.buffer_duration_ms.max(1);
        let samples_per_buffer =
            (audio.sample_rate as u64 * buffer_ms / 1000) as usize * audio.channels as usize;
        let looped = self.looped;
        let source = self.stream_source;

        info!("Starting {} ({:.1}s, looped={})", self.name, audio.duration_seconds, looped);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(buffer_ms));
            let mut timestamp_ms = 0u64;

            'playback: loop {
                for chunk in audio.samples.chunks(samples_per_buffer.max(1)) {
                    ticker.tick().await;
                    let frame = AudioFrame {
                        samples: chunk.to_vec(),
                        sample_rate: audio.sample_rate,
                        channels: audio.channels,
                        timestamp_ms,
                        source,
                    };
                    if tx.send(frame).await.is_err() {
                        break 'playback;
                    }
                    timestamp_ms += buffer_ms;
                }

                if !looped {
                    debug!("File playback reached end of {}", audio.path);
                    break;
                }
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
