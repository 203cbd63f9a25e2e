// Frame normalization applied before frames reach the mixer or encoder

use super::backend::AudioFrame;

/// Process audio frame: downsample and convert to target format
pub fn process_frame(frame: AudioFrame, target_sample_rate: u32, target_channels: u16) -> AudioFrame {
    let mut processed = frame;

    // Downsample if needed
    if processed.sample_rate != target_sample_rate {
        processed = downsample_frame(processed, target_sample_rate);
    }

    // Convert to mono if needed
    if processed.channels != target_channels && target_channels == 1 {
        processed = stereo_to_mono(processed);
    }

    processed
}

/// Downsample audio frame by decimation
///
/// Only integer ratios are handled; upsampling is left untouched.
pub fn downsample_frame(frame: AudioFrame, target_rate: u32) -> AudioFrame {
    if frame.sample_rate == target_rate || target_rate == 0 {
        return frame;
    }

    let ratio = frame.sample_rate / target_rate;
    if ratio <= 1 {
        return frame;
    }

    let channels = frame.channels.max(1) as usize;

    // Decimate whole interleaved frames so channels stay aligned
    let downsampled: Vec<i16> = frame
        .samples
        .chunks_exact(channels)
        .step_by(ratio as usize)
        .flatten()
        .copied()
        .collect();

    AudioFrame {
        samples: downsampled,
        sample_rate: target_rate,
        channels: frame.channels,
        timestamp_ms: frame.timestamp_ms,
        source: frame.source,
    }
}

/// Convert stereo to mono by summing channels
pub fn stereo_to_mono(frame: AudioFrame) -> AudioFrame {
    if frame.channels != 2 {
        return frame;
    }

    let mut mono_samples = Vec::with_capacity(frame.samples.len() / 2);

    // Sum left and right, clipped
    for pair in frame.samples.chunks_exact(2) {
        let sum = pair[0] as i32 + pair[1] as i32;
        mono_samples.push(sum.clamp(i16::MIN as i32, i16::MAX as i32) as i16);
    }

    AudioFrame {
        samples: mono_samples,
        sample_rate: frame.sample_rate,
        channels: 1,
        timestamp_ms: frame.timestamp_ms,
        source: frame.source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioStreamSource;

    fn frame(samples: Vec<i16>, sample_rate: u32, channels: u16) -> AudioFrame {
        AudioFrame {
            samples,
            sample_rate,
            channels,
            timestamp_ms: 40,
            source: AudioStreamSource::System,
        }
    }

    #[test]
    fn test_downsample_by_integer_ratio() {
        let out = downsample_frame(frame(vec![1, 2, 3, 4, 5, 6], 48000, 1), 16000);
        assert_eq!(out.samples, vec![1, 4]);
        assert_eq!(out.sample_rate, 16000);
        assert_eq!(out.timestamp_ms, 40);
    }

    #[test]
    fn test_downsample_keeps_stereo_pairs() {
        let out = downsample_frame(frame(vec![1, -1, 2, -2, 3, -3, 4, -4], 32000, 2), 16000);
        assert_eq!(out.samples, vec![1, -1, 3, -3]);
    }

    #[test]
    fn test_stereo_to_mono_clips() {
        let out = stereo_to_mono(frame(vec![100, 50, i16::MAX, 10], 16000, 2));
        assert_eq!(out.channels, 1);
        assert_eq!(out.samples, vec![150, i16::MAX]);
    }

    #[test]
    fn test_process_frame_full_pipeline() {
        let out = process_frame(frame(vec![10, 20, 30, 40, 50, 60, 70, 80], 32000, 2), 16000, 1);
        assert_eq!(out.sample_rate, 16000);
        assert_eq!(out.channels, 1);
        assert_eq!(out.samples, vec![30, 110]);
    }
}
