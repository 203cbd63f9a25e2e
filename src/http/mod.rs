//! HTTP API server for recording control
//!
//! This module exposes the coordinator to local control surfaces:
//! - GET /recording/status - Recording status (state store is authoritative)
//! - POST /recording/setup - Prepare a session (source, endpoint, page)
//! - POST /recording/start - Start the prepared session
//! - POST /recording/stop - Stop the session or clear a stale flag
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use handlers::{ErrorResponse, SetupRecordingRequest};
pub use routes::create_router;
pub use state::AppState;
