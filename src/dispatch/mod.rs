//! Webhook delivery
//!
//! - `payload`: the JSON body sent for each chunk
//! - `transport`: a single POST, reqwest in production
//! - `dispatcher`: retries, per-attempt timeouts, delivery reports

mod dispatcher;
mod payload;
mod transport;

pub use dispatcher::{
    ChunkDispatcher, DeliveryAttempt, DeliveryOutcome, DeliveryReport, DispatchConfig, DispatchError,
};
pub use payload::ChunkPayload;
pub use transport::{HttpTransport, Transport, TransportError, TransportResponse};
