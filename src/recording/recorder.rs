// Chunk recorder
//
// Runs one encoder instance per segment on a dedicated task that owns the
// audio stream. A flush stops the instance, waits for its `Stopped` event,
// takes the pending buffer and (unless final) starts a fresh instance on the
// same stream. Frames arriving during the restart stay queued in the stream
// channel and land in the next segment.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::encoder::{Encoder, EncoderError, EncoderFactory};
use crate::audio::AudioStream;

/// When the current segment is cut
#[derive(Debug, Clone)]
pub struct BoundaryPolicy {
    /// Wall-clock length of a segment
    pub interval: Duration,
    /// Pending bytes that force an early boundary
    pub max_pending_bytes: usize,
    /// How often encoded fragments are collected from the encoder task
    pub timeslice: Duration,
}

impl Default for BoundaryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            max_pending_bytes: 5 * 1024 * 1024,
            timeslice: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// Segment interval elapsed
    Interval,
    /// Pending buffer crossed the size ceiling
    SizeExceeded,
    /// Audio source closed; no further segments are possible
    SourceEnded,
}

/// An immutable, finalized segment payload
#[derive(Debug, Clone)]
pub struct Segment {
    pub payload: Vec<u8>,
    /// Audio covered by the payload
    pub audio_ms: u64,
    pub finalized_at: DateTime<Utc>,
}

impl Segment {
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

#[derive(Debug)]
enum SegmentEvent {
    Fragment {
        bytes: Vec<u8>,
        audio_ms: u64,
        encoder_buffered: usize,
    },
    SourceEnded,
    Failed(EncoderError),
    Stopped,
}

#[derive(Debug, Default)]
struct PendingBuffer {
    bytes: Vec<u8>,
    audio_ms: u64,
    encoder_buffered: usize,
}

impl PendingBuffer {
    fn append(&mut self, bytes: Vec<u8>, audio_ms: u64, encoder_buffered: usize) {
        self.bytes.extend_from_slice(&bytes);
        self.audio_ms += audio_ms;
        self.encoder_buffered = encoder_buffered;
    }

    fn len(&self) -> usize {
        self.bytes.len() + self.encoder_buffered
    }

    fn take(&mut self) -> Segment {
        let pending = std::mem::take(self);
        Segment {
            payload: pending.bytes,
            audio_ms: pending.audio_ms,
            finalized_at: Utc::now(),
        }
    }
}

struct ActiveSegment {
    stop_tx: oneshot::Sender<()>,
    events: mpsc::UnboundedReceiver<SegmentEvent>,
    task: JoinHandle<AudioStream>,
    started: Instant,
}

pub struct ChunkRecorder {
    factory: Arc<dyn EncoderFactory>,
    policy: BoundaryPolicy,
    active: Option<ActiveSegment>,
    /// Stream parked between segments or after the final flush
    stream: Option<AudioStream>,
    pending: PendingBuffer,
    source_ended: bool,
    segments_flushed: u64,
}

impl ChunkRecorder {
    /// Start continuous encoding on `stream`
    pub fn begin(
        factory: Arc<dyn EncoderFactory>,
        stream: AudioStream,
        policy: BoundaryPolicy,
    ) -> Result<Self, EncoderError> {
        info!(
            "Chunk recorder starting: format={}, interval={:?}, max_pending={} bytes",
            factory.format(),
            policy.interval,
            policy.max_pending_bytes
        );

        let mut recorder = Self {
            factory,
            policy,
            active: None,
            stream: None,
            pending: PendingBuffer::default(),
            source_ended: false,
            segments_flushed: 0,
        };
        recorder.start_segment(stream)?;
        Ok(recorder)
    }

    pub fn format(&self) -> &str {
        self.factory.format()
    }

    /// Bytes collected for the current segment so far
    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    pub fn is_encoding(&self) -> bool {
        self.active.is_some()
    }

    pub fn source_ended(&self) -> bool {
        self.source_ended
    }

    /// Wait for the next segment boundary
    ///
    /// Cancel safe: collected fragments are kept in the pending buffer, so
    /// this can be raced against a stop command in `select!`.
    pub async fn next_boundary(&mut self) -> Result<Boundary, EncoderError> {
        let Some(active) = self.active.as_mut() else {
            return std::future::pending().await;
        };
        let deadline = active.started + self.policy.interval;

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return Ok(Boundary::Interval),
                event = active.events.recv() => match event {
                    Some(SegmentEvent::Fragment { bytes, audio_ms, encoder_buffered }) => {
                        self.pending.append(bytes, audio_ms, encoder_buffered);
                        if self.pending.len() >= self.policy.max_pending_bytes {
                            warn!(
                                "Pending buffer reached {} bytes, cutting segment early",
                                self.pending.len()
                            );
                            return Ok(Boundary::SizeExceeded);
                        }
                    }
                    Some(SegmentEvent::SourceEnded) => {
                        self.source_ended = true;
                        return Ok(Boundary::SourceEnded);
                    }
                    Some(SegmentEvent::Failed(e)) => return Err(e),
                    Some(SegmentEvent::Stopped) => {}
                    None => return Err(EncoderError::Terminated("segment task exited".to_string())),
                },
            }
        }
    }

    /// Stop the active encoder, collect the pending buffer, and restart
    /// unless `is_last`
    ///
    /// Always yields a segment, empty when nothing was captured.
    pub async fn flush(&mut self, is_last: bool) -> Result<Segment, EncoderError> {
        if let Some(active) = self.active.take() {
            self.stop_segment(active).await?;
        }

        let segment = self.pending.take();
        self.segments_flushed += 1;

        info!(
            "Flushed segment {}: {} bytes, {}ms audio (last={})",
            self.segments_flushed,
            segment.payload.len(),
            segment.audio_ms,
            is_last
        );

        if !is_last && !self.source_ended {
            if let Some(stream) = self.stream.take() {
                self.start_segment(stream)?;
            }
        }

        Ok(segment)
    }

    /// Tear down the encoder and release the audio stream
    pub async fn release(mut self) {
        if let Some(active) = self.active.take() {
            if let Err(e) = self.stop_segment(active).await {
                debug!("Encoder error while releasing recorder: {}", e);
            }
        }
        if let Some(stream) = self.stream.take() {
            stream.release().await;
        }
    }

    fn start_segment(&mut self, stream: AudioStream) -> Result<(), EncoderError> {
        let encoder = match self.factory.create() {
            Ok(encoder) => encoder,
            Err(e) => {
                self.stream = Some(stream);
                return Err(e);
            }
        };

        let (stop_tx, stop_rx) = oneshot::channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_segment(encoder, stream, stop_rx, events_tx, self.policy.timeslice));

        self.active = Some(ActiveSegment {
            stop_tx,
            events,
            task,
            started: Instant::now(),
        });
        Ok(())
    }

    async fn stop_segment(&mut self, active: ActiveSegment) -> Result<(), EncoderError> {
        let ActiveSegment {
            stop_tx,
            mut events,
            task,
            ..
        } = active;

        // The task may already be gone after a source end or failure
        let _ = stop_tx.send(());

        let mut failure = None;
        while let Some(event) = events.recv().await {
            match event {
                SegmentEvent::Fragment {
                    bytes,
                    audio_ms,
                    encoder_buffered,
                } => self.pending.append(bytes, audio_ms, encoder_buffered),
                SegmentEvent::SourceEnded => self.source_ended = true,
                SegmentEvent::Failed(e) => failure = Some(e),
                SegmentEvent::Stopped => break,
            }
        }

        match task.await {
            Ok(stream) => self.stream = Some(stream),
            Err(e) => {
                error!("Segment task ended abnormally: {}", e);
                failure.get_or_insert(EncoderError::Terminated(e.to_string()));
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Encode frames until stopped, emitting fragments every timeslice
async fn run_segment(
    mut encoder: Box<dyn Encoder>,
    mut stream: AudioStream,
    mut stop_rx: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<SegmentEvent>,
    timeslice: Duration,
) -> AudioStream {
    let mut ticker = tokio::time::interval_at(Instant::now() + timeslice, timeslice);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut fragment = Vec::new();
    let mut fragment_ms = 0u64;
    let mut source_ended = false;

    loop {
        tokio::select! {
            biased;

            _ = &mut stop_rx => {
                // Frames queued before the stop point belong to this segment
                while let Some(frame) = stream.try_recv() {
                    fragment_ms += frame.duration_ms();
                    match encoder.encode(&frame) {
                        Ok(bytes) => fragment.extend_from_slice(&bytes),
                        Err(e) => {
                            let _ = events.send(SegmentEvent::Failed(e));
                            return stream;
                        }
                    }
                }
                break;
            }

            frame = stream.recv() => match frame {
                Some(frame) => {
                    fragment_ms += frame.duration_ms();
                    match encoder.encode(&frame) {
                        Ok(bytes) => fragment.extend_from_slice(&bytes),
                        Err(e) => {
                            error!("Encoder failed: {}", e);
                            let _ = events.send(SegmentEvent::Failed(e));
                            return stream;
                        }
                    }
                }
                None => {
                    info!("Audio stream ended");
                    source_ended = true;
                    break;
                }
            },

            _ = ticker.tick() => {
                if !fragment.is_empty() || fragment_ms > 0 {
                    let _ = events.send(SegmentEvent::Fragment {
                        bytes: std::mem::take(&mut fragment),
                        audio_ms: std::mem::take(&mut fragment_ms),
                        encoder_buffered: encoder.buffered_bytes(),
                    });
                }
            }
        }
    }

    match encoder.finish() {
        Ok(tail) => {
            fragment.extend_from_slice(&tail);
            let _ = events.send(SegmentEvent::Fragment {
                bytes: fragment,
                audio_ms: fragment_ms,
                encoder_buffered: 0,
            });
        }
        Err(e) => {
            error!("Encoder failed to finish: {}", e);
            let _ = events.send(SegmentEvent::Failed(e));
            return stream;
        }
    }

    if source_ended {
        let _ = events.send(SegmentEvent::SourceEnded);
    }
    let _ = events.send(SegmentEvent::Stopped);
    stream
}
