use crate::coordinator::RecordingCoordinator;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The single coordinator every request goes through
    pub coordinator: Arc<RecordingCoordinator>,

    /// Webhook used when a setup request names none
    pub default_endpoint: String,
}

impl AppState {
    pub fn new(coordinator: Arc<RecordingCoordinator>, default_endpoint: impl Into<String>) -> Self {
        Self {
            coordinator,
            default_endpoint: default_endpoint.into(),
        }
    }
}
