//! Geocode Routes
//!
//! - GET /api/v1/geocode?address= - Coordinates for a place name

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};

use crate::api::dto::GeocodeQuery;
use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::geocoding::Location;

/// GET /api/v1/geocode
pub async fn geocode(
    State(state): State<Arc<AppState>>,
    Query(query): Query<GeocodeQuery>,
) -> ApiResult<Json<Location>> {
    let location = state.baths.resolve_location(&query.address).await?;
    Ok(Json(location))
}
