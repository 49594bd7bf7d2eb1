//! HTTP surface: marketplace cache reads/writes and the leaderboard.

pub mod error;
pub mod leaderboard;
pub mod marketplace;

use std::sync::Arc;

use crate::leaderboard::Leaderboard;
use crate::market::MarketSync;

pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub market: Arc<MarketSync>,
    pub leaderboard: Arc<Leaderboard>,
}
