use super::handlers;
use super::state::ReceiverState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the webhook receiver router
pub fn create_receiver_router(state: ReceiverState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        // Chunk intake
        .route("/webhook/meeting-audio", post(handlers::receive_chunk))
        // Dashboard API
        .route("/api/stats", get(handlers::get_stats))
        .route("/api/sessions", get(handlers::list_sessions))
        .route("/api/chunks", get(handlers::list_chunks))
        .route("/api/webhook-attempts", get(handlers::list_attempts))
        .route("/api/session/:session_id", get(handlers::get_session))
        .route("/api/reset", post(handlers::reset))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
