//! Leaderboard endpoints.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};

use super::{ApiError, AppState};
use crate::leaderboard::{PlayerStats, RankingEvent, RankingSummary};

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RecordedEventResponse {
    pub data: PlayerStats,
}

/// GET /api/leaderboard
pub async fn get_leaderboard(
    State(state): State<AppState>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<RankingSummary>, ApiError> {
    if query.limit == Some(0) {
        return Err(ApiError::BadRequest(
            "limit must be a positive integer".to_string(),
        ));
    }
    Ok(Json(state.leaderboard.summary(query.limit)))
}

/// POST /api/leaderboard/events
pub async fn post_ranking_event(
    State(state): State<AppState>,
    Json(event): Json<RankingEvent>,
) -> Result<(StatusCode, Json<RecordedEventResponse>), ApiError> {
    event.validate().map_err(ApiError::BadRequest)?;
    let stats = state.leaderboard.record(event).await?;
    Ok((StatusCode::CREATED, Json(RecordedEventResponse { data: stats })))
}

/// DELETE /api/leaderboard
pub async fn reset_leaderboard(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.leaderboard.reset().await?;
    Ok(StatusCode::NO_CONTENT)
}
