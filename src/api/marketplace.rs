//! Marketplace listing endpoints.
//!
//! Reads come out of the synchronized cache; mutation is limited to the
//! seller publish path. Purchases and removals are on-chain concerns, so
//! their endpoints exist only to say so with the right status code.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};

use super::{ApiError, AppState};
use crate::chain::OnchainListing;
use crate::models::{CreateListingInput, Listing};

#[derive(Debug, Serialize)]
pub struct ListingsResponse {
    pub listings: Vec<Listing>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub seller: Option<String>,
}

/// GET /api/marketplace/listings
pub async fn get_listings(State(state): State<AppState>) -> Json<ListingsResponse> {
    let listings = state.market.list_all().await;
    Json(ListingsResponse { listings })
}

/// POST /api/marketplace/listings
pub async fn create_listing(
    State(state): State<AppState>,
    Json(input): Json<CreateListingInput>,
) -> Result<(StatusCode, Json<Listing>), ApiError> {
    input.validate().map_err(ApiError::BadRequest)?;
    let listing = state.market.create_or_update(input).await?;
    Ok((StatusCode::CREATED, Json(listing)))
}

/// DELETE /api/marketplace/listings/:id
///
/// Always refused. The seller parameter is still validated so callers get
/// a consistent 400 for a malformed request before the policy 403.
pub async fn delete_listing(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Result<StatusCode, ApiError> {
    let seller = query
        .seller
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("seller query parameter is required".to_string()))?;
    state.market.remove_listing(&id, &seller)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/marketplace/listings/:id/purchase
pub async fn purchase_listing(Path(_id): Path<String>) -> ApiError {
    ApiError::Gone(
        "Purchases must be completed on-chain via Marketplace.buyCard. This endpoint is deprecated."
            .to_string(),
    )
}

/// GET /api/marketplace/listings/:id/onchain
///
/// Diagnostic passthrough to the contract's `getListing` view.
pub async fn get_onchain_listing(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OnchainListing>, ApiError> {
    match state.market.onchain_listing(&id).await? {
        Some(listing) => Ok(Json(listing)),
        None => Err(ApiError::ServiceUnavailable(
            "no marketplace contract configured".to_string(),
        )),
    }
}
