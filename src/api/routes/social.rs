//! Social Routes
//!
//! - POST /api/v1/baths/:id/attendees/:uid - Join a planned bath
//! - DELETE /api/v1/baths/:id/attendees/:uid - Leave a planned bath
//! - GET /api/v1/baths/:id/comments - Comments, oldest first
//! - POST /api/v1/baths/:id/comments - Add a comment
//! - POST /api/v1/baths/:id/reactions/:kind - Count a reaction

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::api::dto::{AttendanceResponse, CommentRequest};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::{AppState, Authenticated};
use crate::attendance::{joined_notice, left_notice, AttendanceOutcome};
use crate::model::{collections, BathComment, BathEntry, ReactionKind};
use crate::views::comments_view;

use super::first_snapshot;

/// POST /api/v1/baths/:id/attendees/:uid
pub async fn join_bath(
    State(state): State<Arc<AppState>>,
    auth: Authenticated,
    Path((bath_id, uid)): Path<(String, String)>,
) -> ApiResult<Json<AttendanceResponse>> {
    let caller = auth.session().current_user();
    let outcome = state.attendance.join(caller.as_ref(), &bath_id, &uid).await?;
    let description = planned_description(&state, &bath_id).await;

    Ok(Json(AttendanceResponse {
        changed: outcome == AttendanceOutcome::Changed,
        notice: joined_notice(&description),
    }))
}

/// DELETE /api/v1/baths/:id/attendees/:uid
pub async fn leave_bath(
    State(state): State<Arc<AppState>>,
    auth: Authenticated,
    Path((bath_id, uid)): Path<(String, String)>,
) -> ApiResult<Json<AttendanceResponse>> {
    let caller = auth.session().current_user();
    let outcome = state.attendance.leave(caller.as_ref(), &bath_id, &uid).await?;
    let description = planned_description(&state, &bath_id).await;

    Ok(Json(AttendanceResponse {
        changed: outcome == AttendanceOutcome::Changed,
        notice: left_notice(&description),
    }))
}

async fn planned_description(state: &AppState, bath_id: &str) -> String {
    let path = format!("{}/{}", collections::BATHS, bath_id);
    match state.backend.store.get(&path).await {
        Ok(Some(doc)) => match doc.decode::<BathEntry>() {
            Ok(BathEntry::Planned(bath)) => bath.description,
            _ => String::new(),
        },
        _ => String::new(),
    }
}

/// GET /api/v1/baths/:id/comments
pub async fn list_comments(
    State(state): State<Arc<AppState>>,
    Path(bath_id): Path<String>,
) -> ApiResult<Json<Vec<BathComment>>> {
    let comments = first_snapshot(comments_view(state.backend.store.as_ref(), &bath_id)).await?;
    Ok(Json(comments))
}

/// POST /api/v1/baths/:id/comments
pub async fn add_comment(
    State(state): State<Arc<AppState>>,
    auth: Authenticated,
    Path(bath_id): Path<String>,
    Json(req): Json<CommentRequest>,
) -> ApiResult<(StatusCode, Json<BathComment>)> {
    let comment = state
        .baths
        .add_comment(auth.session(), &bath_id, &req.text)
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

/// POST /api/v1/baths/:id/reactions/:kind
pub async fn react(
    State(state): State<Arc<AppState>>,
    auth: Authenticated,
    Path((bath_id, kind)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let kind: ReactionKind = kind.parse().map_err(ApiError::BadRequest)?;
    state.baths.react(auth.session(), &bath_id, kind).await?;
    Ok(StatusCode::NO_CONTENT)
}
