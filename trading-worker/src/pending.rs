use crate::broker::TradeHandle;
use std::collections::HashMap;

/// Trades placed by this worker process, kept for status polling.
///
/// Process-local and unpersisted: a restart empties it, and status checks
/// for older orders fall back to session-trade reconciliation. Owned by the
/// runtime and passed explicitly to the status-check handler.
#[derive(Default)]
pub struct PendingTrades {
    trades: HashMap<String, TradeHandle>,
}

impl PendingTrades {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(order_id: &str, seqno: &str) -> String {
        format!("{}:{}", order_id, seqno)
    }

    pub fn insert(&mut self, handle: TradeHandle) {
        let key = Self::key(&handle.ticket.order_id, &handle.ticket.seqno);
        self.trades.insert(key, handle);
    }

    pub fn get(&self, order_id: &str, seqno: &str) -> Option<&TradeHandle> {
        self.trades.get(&Self::key(order_id, seqno))
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }
}
