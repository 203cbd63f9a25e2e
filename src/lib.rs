pub mod audio;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod receiver;
pub mod recording;
pub mod session;
pub mod store;

pub use audio::{
    AcquisitionError, AudioBackend, AudioBackendConfig, AudioFrame, AudioSource, AudioSourceProvider, AudioStream,
    SourceDescriptor,
};
pub use config::Config;
pub use coordinator::{CoordinatorError, RecordingCoordinator, SessionServices, SetupRequest, StopOutcome};
pub use dispatch::{ChunkDispatcher, ChunkPayload, DispatchConfig, DispatchError};
pub use error::ErrorCategory;
pub use http::{create_router, AppState};
pub use receiver::{create_receiver_router, ReceiverState};
pub use recording::{BoundaryPolicy, ChunkRecorder, EncoderError, EncoderFormat, Segment};
pub use session::{
    Chunk, OriginContext, RecordingSession, SessionConfig, SessionController, SessionError, SessionEvent,
    SessionHandle, SessionId, SessionSummary,
};
pub use store::{FileStateStore, MemoryStateStore, PersistedState, SessionStateStore, StoreError};
