// Segment encoders
//
// An encoder instance lives for exactly one segment. Fragments returned by
// `encode` are appended to the recorder's pending buffer; `finish` returns
// whatever the container still holds once the segment is stopped.

use std::io::Cursor;
use thiserror::Error;
use tracing::debug;

use crate::audio::AudioFrame;
use crate::error::ErrorCategory;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EncoderError {
    #[error("no supported encoder format among {0:?}")]
    NoSupportedFormat(Vec<String>),

    #[error("audio format changed mid-segment: {from} -> {to}")]
    FormatChanged { from: String, to: String },

    #[error("encoder failed: {0}")]
    Failed(String),

    #[error("encoder task terminated: {0}")]
    Terminated(String),
}

impl EncoderError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EncoderError::NoSupportedFormat(_) => ErrorCategory::Device,
            _ => ErrorCategory::Internal,
        }
    }
}

impl From<hound::Error> for EncoderError {
    fn from(e: hound::Error) -> Self {
        EncoderError::Failed(e.to_string())
    }
}

/// One encoder instance bound to one segment
pub trait Encoder: Send {
    /// Feed a frame, returning any bytes ready to be collected now
    fn encode(&mut self, frame: &AudioFrame) -> Result<Vec<u8>, EncoderError>;

    /// Stop the instance and return the remaining bytes
    fn finish(self: Box<Self>) -> Result<Vec<u8>, EncoderError>;

    /// Bytes held inside the encoder that have not been emitted yet
    fn buffered_bytes(&self) -> usize {
        0
    }
}

/// Creates a fresh encoder for each segment
pub trait EncoderFactory: Send + Sync {
    /// Format identifier carried in the chunk payload
    fn format(&self) -> &str;

    fn create(&self) -> Result<Box<dyn Encoder>, EncoderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderFormat {
    /// Complete RIFF/WAVE file per segment
    Wav,
    /// Raw signed 16-bit little-endian samples
    Pcm,
}

impl EncoderFormat {
    pub fn name(&self) -> &'static str {
        match self {
            EncoderFormat::Wav => "wav",
            EncoderFormat::Pcm => "pcm",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            EncoderFormat::Wav => "audio/wav",
            EncoderFormat::Pcm => "audio/L16",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "wav" | "wave" | "audio/wav" | "audio/wave" => Some(EncoderFormat::Wav),
            "pcm" | "s16le" | "audio/l16" => Some(EncoderFormat::Pcm),
            _ => None,
        }
    }

    /// Pick the first supported format from a preference list
    pub fn negotiate(preferences: &[String]) -> Result<Self, EncoderError> {
        preferences
            .iter()
            .find_map(|name| Self::parse(name))
            .ok_or_else(|| EncoderError::NoSupportedFormat(preferences.to_vec()))
    }
}

impl std::fmt::Display for EncoderFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl EncoderFactory for EncoderFormat {
    fn format(&self) -> &str {
        self.name()
    }

    fn create(&self) -> Result<Box<dyn Encoder>, EncoderError> {
        Ok(match self {
            EncoderFormat::Wav => Box::new(WavEncoder::default()),
            EncoderFormat::Pcm => Box::new(PcmEncoder::default()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StreamShape {
    sample_rate: u32,
    channels: u16,
}

impl StreamShape {
    fn of(frame: &AudioFrame) -> Self {
        Self {
            sample_rate: frame.sample_rate,
            channels: frame.channels,
        }
    }

    /// Lock the shape on the first frame and reject changes afterwards
    fn check(current: &mut Option<StreamShape>, frame: &AudioFrame) -> Result<(), EncoderError> {
        let shape = Self::of(frame);
        match current {
            None => {
                *current = Some(shape);
                Ok(())
            }
            Some(existing) if *existing == shape => Ok(()),
            Some(existing) => Err(EncoderError::FormatChanged {
                from: existing.to_string(),
                to: shape.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for StreamShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}Hz/{}ch", self.sample_rate, self.channels)
    }
}

/// Buffers the whole segment and writes one WAV file at finish
#[derive(Debug, Default)]
pub struct WavEncoder {
    shape: Option<StreamShape>,
    samples: Vec<i16>,
}

impl Encoder for WavEncoder {
    fn encode(&mut self, frame: &AudioFrame) -> Result<Vec<u8>, EncoderError> {
        StreamShape::check(&mut self.shape, frame)?;
        self.samples.extend_from_slice(&frame.samples);
        Ok(Vec::new())
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>, EncoderError> {
        // Nothing captured: the segment payload stays empty
        let Some(shape) = self.shape else {
            return Ok(Vec::new());
        };

        let spec = hound::WavSpec {
            channels: shape.channels,
            sample_rate: shape.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::with_capacity(44 + self.samples.len() * 2));
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
            for sample in &self.samples {
                writer.write_sample(*sample)?;
            }
            writer.finalize()?;
        }

        let bytes = cursor.into_inner();
        debug!("WAV segment finished: {} samples, {} bytes", self.samples.len(), bytes.len());
        Ok(bytes)
    }

    fn buffered_bytes(&self) -> usize {
        if self.shape.is_none() {
            0
        } else {
            44 + self.samples.len() * 2
        }
    }
}

/// Emits raw little-endian samples as they arrive
#[derive(Debug, Default)]
pub struct PcmEncoder {
    shape: Option<StreamShape>,
}

impl Encoder for PcmEncoder {
    fn encode(&mut self, frame: &AudioFrame) -> Result<Vec<u8>, EncoderError> {
        StreamShape::check(&mut self.shape, frame)?;
        Ok(frame.samples.iter().flat_map(|s| s.to_le_bytes()).collect())
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>, EncoderError> {
        Ok(Vec::new())
    }
}
