use std::sync::Arc;
use tokio::sync::Mutex;

use super::{PersistedState, SessionStateStore, StoreError};

/// In-process store; clones share the same snapshot
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    state: Arc<Mutex<Option<PersistedState>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SessionStateStore for MemoryStateStore {
    async fn load(&self) -> Result<Option<PersistedState>, StoreError> {
        Ok(self.state.lock().await.clone())
    }

    async fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        *self.state.lock().await = Some(state.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        *self.state.lock().await = None;
        Ok(())
    }
}
