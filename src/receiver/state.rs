use super::ledger::{Ledger, LedgerLimits};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared state for the receiver handlers
#[derive(Clone)]
pub struct ReceiverState {
    pub ledger: Arc<RwLock<Ledger>>,
}

impl ReceiverState {
    pub fn new(limits: LedgerLimits) -> Self {
        Self {
            ledger: Arc::new(RwLock::new(Ledger::new(limits))),
        }
    }
}
