//! Recording session protocol
//!
//! This module provides the `SessionController` state machine that turns a
//! continuous audio stream into ordered, identifiable chunks:
//! - Session identity and origin context
//! - Chunk sequencing with first/last flags
//! - Boundary-driven flushes and final flush on stop
//! - Snapshot persistence for in-flight detection
//! - Session events and summaries

mod config;
mod controller;
mod model;
mod origin;
mod stats;

pub use config::{DropPolicy, SessionConfig};
pub use controller::{
    SessionCommand, SessionController, SessionError, SessionEvent, SessionHandle, SessionState, StartRequest,
};
pub use model::{Chunk, ChunkMetadata, RecordingSession, SessionId};
pub use origin::{derive_meeting_id, OriginContext, Platform, RecordingType, UNTITLED};
pub use stats::{SessionProgress, SessionSummary};
