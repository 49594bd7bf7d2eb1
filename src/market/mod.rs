//! Marketplace cache: listing store, snapshot persistence and the chain
//! synchronization engine that ties them together.

pub mod error;
pub mod events;
pub mod snapshot;
pub mod store;
pub mod sync;

pub use error::MarketError;
pub use sync::MarketSync;
