//! Session state persistence
//!
//! The store holds the last snapshot written by the controller so another
//! surface (or a restarted process) can see that a session is in flight.
//! Writes are last-writer-wins; clearing is the only deletion.

mod file;
mod memory;
mod snapshot;

use thiserror::Error;

use crate::error::ErrorCategory;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;
pub use snapshot::{PersistedState, RecordingData, SNAPSHOT_VERSION};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("state is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported state version {0}")]
    UnsupportedVersion(String),

    #[error("state is corrupt: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Internal
    }
}

#[async_trait::async_trait]
pub trait SessionStateStore: Send + Sync {
    /// Current snapshot, `None` when nothing was ever written or it was cleared
    async fn load(&self) -> Result<Option<PersistedState>, StoreError>;

    async fn save(&self, state: &PersistedState) -> Result<(), StoreError>;

    async fn clear(&self) -> Result<(), StoreError>;
}
