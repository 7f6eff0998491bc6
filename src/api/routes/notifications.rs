//! Notification Routes
//!
//! - GET /api/v1/notifications - Unseen flags for feed and planned
//! - POST /api/v1/notifications/:category/seen - Mark a category seen now

use axum::{extract::Path, Json};

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::Authenticated;
use crate::notifications::{Category, NotificationStatus};

/// GET /api/v1/notifications
pub async fn status(auth: Authenticated) -> ApiResult<Json<NotificationStatus>> {
    let status = auth.client.notifications.refresh().await?;
    Ok(Json(status))
}

/// POST /api/v1/notifications/:category/seen
pub async fn mark_seen(
    auth: Authenticated,
    Path(category): Path<String>,
) -> ApiResult<Json<NotificationStatus>> {
    let category: Category = category.parse().map_err(ApiError::BadRequest)?;
    let tracker = &auth.client.notifications;
    tracker
        .mark_seen(category)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(tracker.status()))
}
