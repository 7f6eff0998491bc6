//! Feed Routes
//!
//! One-shot reads of the live views.
//!
//! - GET /api/v1/feed - Every entry, newest first
//! - GET /api/v1/leaderboard - Top users by logged baths
//! - GET /api/v1/users/:uid - A user's profile and activity

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};

use crate::api::dto::{LeaderboardEntry, UserProfileResponse};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::model::BathEntry;
use crate::views::{feed_view, leaderboard_view, not_found_notice, ProfileView};

use super::first_snapshot;

/// GET /api/v1/feed
pub async fn feed(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<BathEntry>>> {
    let entries = first_snapshot(feed_view(state.backend.store.as_ref())).await?;
    Ok(Json(entries))
}

/// GET /api/v1/leaderboard
pub async fn leaderboard(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<LeaderboardEntry>>> {
    let profiles = first_snapshot(leaderboard_view(state.backend.store.as_ref())).await?;
    let rows = profiles
        .iter()
        .enumerate()
        .map(|(i, profile)| LeaderboardEntry::new(i + 1, profile))
        .collect();
    Ok(Json(rows))
}

/// GET /api/v1/users/:uid
pub async fn user_profile(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<String>,
) -> ApiResult<Json<UserProfileResponse>> {
    let view = ProfileView::open(state.backend.store.as_ref(), &uid, None).await?;
    let profile = view
        .profile
        .ok_or_else(|| ApiError::NotFound(not_found_notice().description))?;
    let activity = first_snapshot(view.activity).await?;

    Ok(Json(UserProfileResponse {
        progress_percent: profile.progress_percent(),
        profile,
        activity,
    }))
}
