// Mixer for combined capture
//
// Pairs microphone frames with tab/system frames in arrival order and sums
// them with per-source gain. A source that stops delivering does not stall
// the other: once one side has buffered more than `max_buffer_delay_ms`
// ahead, its oldest frame goes out unmixed.

use std::collections::VecDeque;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::backend::{AudioFrame, AudioStreamSource};

#[derive(Debug, Clone)]
pub struct MixerConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// How far one source may run ahead before it is emitted alone
    pub max_buffer_delay_ms: u64,
    pub microphone_gain: f32,
    pub system_gain: f32,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            max_buffer_delay_ms: 200,
            microphone_gain: 1.0,
            system_gain: 1.0,
        }
    }
}

pub struct AudioMixer {
    config: MixerConfig,
    microphone: VecDeque<AudioFrame>,
    system: VecDeque<AudioFrame>,
}

impl AudioMixer {
    pub fn new(config: MixerConfig) -> Self {
        Self {
            config,
            microphone: VecDeque::new(),
            system: VecDeque::new(),
        }
    }

    /// Mix until `input` closes or `output` is dropped; returns frames produced
    pub async fn run(mut self, mut input: mpsc::Receiver<AudioFrame>, output: mpsc::Sender<AudioFrame>) -> usize {
        let mut produced = 0;

        while let Some(frame) = input.recv().await {
            self.push(frame);
            while let Some(mixed) = self.next_frame(false) {
                if output.send(mixed).await.is_err() {
                    debug!("Mixer output closed after {} frames", produced);
                    return produced;
                }
                produced += 1;
            }
        }

        while let Some(mixed) = self.next_frame(true) {
            if output.send(mixed).await.is_err() {
                break;
            }
            produced += 1;
        }

        info!("Mixer drained: {} frames", produced);
        produced
    }

    fn push(&mut self, frame: AudioFrame) {
        if frame.sample_rate != self.config.sample_rate || frame.channels != self.config.channels {
            warn!(
                "Dropping {:?} frame at {}Hz/{}ch, mixer expects {}Hz/{}ch",
                frame.source, frame.sample_rate, frame.channels, self.config.sample_rate, self.config.channels
            );
            return;
        }

        match frame.source {
            AudioStreamSource::Microphone => self.microphone.push_back(frame),
            AudioStreamSource::System => self.system.push_back(frame),
        }
    }

    /// Next output frame, if one is ready. `draining` flushes whatever is left.
    fn next_frame(&mut self, draining: bool) -> Option<AudioFrame> {
        if !self.microphone.is_empty() && !self.system.is_empty() {
            let mic = self.microphone.pop_front()?;
            let system = self.system.pop_front()?;
            return Some(self.mix(&mic, &system));
        }

        let limit = self.config.max_buffer_delay_ms;
        let (queue, gain) = if self.microphone.is_empty() {
            (&mut self.system, self.config.system_gain)
        } else {
            (&mut self.microphone, self.config.microphone_gain)
        };

        let ahead = match (queue.front(), queue.back()) {
            (Some(front), Some(back)) => back.timestamp_ms.saturating_sub(front.timestamp_ms),
            _ => return None,
        };
        if !draining && ahead < limit {
            return None;
        }

        let mut frame = queue.pop_front()?;
        if gain != 1.0 {
            frame.samples = frame.samples.iter().map(|&s| scale(s, gain)).collect();
        }
        Some(frame)
    }

    fn mix(&self, mic: &AudioFrame, system: &AudioFrame) -> AudioFrame {
        let len = mic.samples.len().max(system.samples.len());
        let samples = (0..len)
            .map(|i| {
                let m = mic.samples.get(i).copied().unwrap_or(0) as f32 * self.config.microphone_gain;
                let s = system.samples.get(i).copied().unwrap_or(0) as f32 * self.config.system_gain;
                (m + s).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
            })
            .collect();

        AudioFrame {
            samples,
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
            timestamp_ms: mic.timestamp_ms.min(system.timestamp_ms),
            source: AudioStreamSource::System,
        }
    }
}

fn scale(sample: i16, gain: f32) -> i16 {
    (sample as f32 * gain).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}
