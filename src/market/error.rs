//! Engine-level errors surfaced to callers of the mutating operations.
//!
//! Chain-event-driven failures never appear here: the event path absorbs
//! its own errors so the stream can't stall. Only explicit write-path
//! calls propagate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MarketError {
    /// Removal of a published listing is a permanently disallowed
    /// operation; publishing is one-way once broadcast.
    #[error("removing listings is disabled once published")]
    RemovalDisabled,

    /// The listing mutation was applied in memory but could not be made
    /// durable. Surfaced to the write path because losing durability
    /// silently would break the listing permanence guarantee.
    #[error("failed to persist marketplace snapshot")]
    Persistence(#[source] anyhow::Error),
}
