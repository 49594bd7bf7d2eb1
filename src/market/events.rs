//! Chain event model
//!
//! Ephemeral representation of the three marketplace events. Events are
//! never stored; they exist only to be merged into the listing store.
//! Their total order is `(block_number, log_index)` ascending, assigned by
//! the chain, which is what lets backfill batches from separate log
//! queries be merged deterministically.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub enum MarketEventKind {
    Listed {
        seller: String,
        price_gtk: f64,
    },
    Sold {
        seller: Option<String>,
        buyer: String,
        price_gtk: Option<f64>,
    },
    Cancelled {
        seller: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarketEvent {
    pub token_id: String,
    pub kind: MarketEventKind,
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: Option<String>,
    /// Block timestamp, resolved by the chain client when available.
    pub timestamp: Option<DateTime<Utc>>,
}

impl MarketEvent {
    /// Chain-assigned position, the sort key for replay.
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

/// Sorts events into chain order. Replay through the store merge converges
/// to the same state regardless of how the raw log queries were batched,
/// as long as this order is applied.
pub fn sort_events(events: &mut [MarketEvent]) {
    events.sort_by_key(|e| e.position());
}
