//! Webhook receiver with a dashboard API
//!
//! A development counterpart to the dispatcher. It accepts chunk payloads and
//! keeps a bounded in-memory history of them:
//! - POST /webhook/meeting-audio - Accept a chunk
//! - GET /api/stats - Totals and uptime
//! - GET /api/sessions - Latest sessions
//! - GET /api/chunks?limit=N - Latest chunks
//! - GET /api/webhook-attempts?limit=N - Latest deliveries
//! - GET /api/session/:id - One session with its chunks and index gaps
//! - POST /api/reset - Clear the history
//! - GET /health - Health check

mod handlers;
mod ledger;
mod routes;
mod state;

pub use handlers::StatsResponse;
pub use ledger::{
    ChunkRecord, Delivery, Ledger, LedgerLimits, Receipt, ReceiverStats, SessionDetail, SessionRecord,
    SessionStatus, WebhookAttempt,
};
pub use routes::create_receiver_router;
pub use state::ReceiverState;
