// Integration tests for file-backed audio
//
// Fixtures are generated with hound into a temp dir, so every test knows the
// exact rate, channel count and length it is decoding.

use anyhow::Result;
use meeting_audio_capture::audio::{
    AudioBackend, AudioBackendConfig, AudioFile, AudioStreamSource, FileBackend,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write_fixture(dir: &Path, name: &str, sample_rate: u32, channels: u16, seconds: f64) -> PathBuf {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    let frames = (sample_rate as f64 * seconds) as usize;
    for i in 0..frames {
        for ch in 0..channels {
            writer.write_sample(((i % 100) as i16) * 10 + ch as i16).unwrap();
        }
    }
    writer.finalize().unwrap();
    path
}

#[test]
fn test_audio_file_open() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_fixture(dir.path(), "meeting.wav", 16000, 1, 0.5);

    let audio = AudioFile::open(&path)?;

    assert_eq!(audio.sample_rate, 16000);
    assert_eq!(audio.channels, 1);
    assert_eq!(audio.samples.len(), 8000);
    assert!((audio.duration_seconds - 0.5).abs() < 0.01);
    assert!(audio.path.contains("meeting.wav"));

    Ok(())
}

#[test]
fn test_audio_file_interleaved_channels() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_fixture(dir.path(), "stereo.wav", 48000, 2, 0.25);

    let audio = AudioFile::open(&path)?;

    assert_eq!(audio.channels, 2);
    assert_eq!(audio.samples.len(), 24000);
    // Left and right differ by one in the fixture
    assert_eq!(audio.samples[1] - audio.samples[0], 1);

    Ok(())
}

#[test]
fn test_audio_file_nonexistent() {
    let result = AudioFile::open("/nonexistent/path/to/audio.wav");
    assert!(result.is_err(), "Opening nonexistent file should fail");
}

#[test]
fn test_audio_file_rejects_garbage() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("notes.wav");
    std::fs::write(&path, b"definitely not audio")?;

    assert!(AudioFile::open(&path).is_err());
    Ok(())
}

#[tokio::test]
async fn test_file_backend_plays_to_end() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_fixture(dir.path(), "short.wav", 16000, 1, 0.3);

    let mut backend = FileBackend::new(path, false, AudioStreamSource::System, AudioBackendConfig::default());
    let mut rx = backend.start().await?;

    let mut total = 0;
    let mut timestamps = Vec::new();
    while let Some(frame) = rx.recv().await {
        assert_eq!(frame.source, AudioStreamSource::System);
        timestamps.push(frame.timestamp_ms);
        total += frame.samples.len();
    }

    assert_eq!(total, 4800);
    assert_eq!(timestamps, vec![0, 100, 200]);
    backend.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_file_backend_missing_file_is_no_device() {
    let mut backend = FileBackend::new(
        PathBuf::from("/nonexistent/call.wav"),
        false,
        AudioStreamSource::System,
        AudioBackendConfig::default(),
    );

    let err = backend.start().await.unwrap_err();
    assert!(!err.is_permission_denied());
    assert!(!backend.is_capturing());
}
