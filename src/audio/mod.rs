pub mod backend;
pub mod convert;
pub mod file;
pub mod mixer;
pub mod provider;
pub mod synthetic;

pub use backend::{
    AcquisitionError, AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource,
    AudioStreamSource,
};
pub use file::{AudioFile, FileBackend};
pub use mixer::{AudioMixer, MixerConfig};
pub use provider::{AudioSourceProvider, AudioStream, CaptureBackends, ConfiguredBackends, SourceDescriptor};
pub use synthetic::ToneBackend;
