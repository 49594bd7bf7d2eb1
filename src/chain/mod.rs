//! Chain access layer
//!
//! The engine only needs "can read" and "can subscribe" from the chain;
//! `MarketplaceChain` is that seam. Production uses the JSON-RPC
//! implementation in `rpc`; tests substitute in-memory mocks.

pub mod contracts;
pub mod rpc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::market::events::MarketEvent;

/// Authoritative on-chain listing record (`getListing` view call), used by
/// diagnostics rather than the reconciliation path.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnchainListing {
    pub seller: String,
    pub price_gtk: f64,
    pub active: bool,
}

#[async_trait]
pub trait MarketplaceChain: Send + Sync {
    /// Current chain head.
    async fn latest_block(&self) -> Result<u64>;

    /// All marketplace events in `[from_block, to_block]`, sorted by
    /// `(block_number, log_index)` ascending.
    async fn query_events(&self, from_block: u64, to_block: u64) -> Result<Vec<MarketEvent>>;

    /// Whether the chain still reports the token as actively listed.
    async fn is_listed(&self, token_id: &str) -> Result<bool>;

    /// Full on-chain listing record for diagnostics.
    async fn get_listing(&self, token_id: &str) -> Result<OnchainListing>;

    /// Long-lived registration for new events starting at `from_block`.
    /// Delivery is in non-decreasing chain order on a bounded channel; the
    /// consumer side is the engine's single event worker.
    fn subscribe(&self, from_block: u64) -> mpsc::Receiver<MarketEvent>;
}
