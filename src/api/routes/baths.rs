//! Bath Routes
//!
//! - POST /api/v1/baths - Log a bath
//! - POST /api/v1/planned - Plan a group bath
//! - GET /api/v1/planned - Upcoming planned baths with attendee names

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};

use crate::api::dto::{BathResponse, LogBathRequest, PlannedBathDto};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::{AppState, Authenticated};
use crate::forms::PlanBathForm;
use crate::views::{planned_view, AttendeeDirectory};

use super::first_snapshot;

/// POST /api/v1/baths
pub async fn log_bath(
    State(state): State<Arc<AppState>>,
    auth: Authenticated,
    Json(req): Json<LogBathRequest>,
) -> ApiResult<(StatusCode, Json<BathResponse>)> {
    let image = match req.image_upload_id.as_deref() {
        Some(id) => {
            let user = auth.session().require_user()?;
            Some(state.take_upload(id, &user.uid).ok_or_else(|| {
                ApiError::BadRequest(format!("Unknown, expired or already used upload '{}'", id))
            })?)
        }
        None => None,
    };

    let (bath, notice) = state.baths.log_bath(auth.session(), req.form, image).await?;
    Ok((StatusCode::CREATED, Json(BathResponse { bath, notice })))
}

/// POST /api/v1/planned
pub async fn plan_bath(
    State(state): State<Arc<AppState>>,
    auth: Authenticated,
    Json(form): Json<PlanBathForm>,
) -> ApiResult<(StatusCode, Json<BathResponse>)> {
    let today = chrono::Local::now().date_naive();
    let (bath, notice) = state.baths.plan_bath(auth.session(), form, today).await?;
    Ok((StatusCode::CREATED, Json(BathResponse { bath, notice })))
}

/// GET /api/v1/planned
///
/// Signed-in callers also learn which baths they attend.
pub async fn list_planned(
    State(state): State<Arc<AppState>>,
    auth: Option<Authenticated>,
) -> ApiResult<Json<Vec<PlannedBathDto>>> {
    let planned = first_snapshot(planned_view(state.backend.store.as_ref())).await?;

    let directory = AttendeeDirectory::new(Arc::clone(&state.backend.store));
    let uids: Vec<String> = planned
        .iter()
        .flat_map(|bath| bath.attendees.iter().cloned())
        .collect();
    if let Err(e) = directory.resolve(&uids).await {
        // Unresolved attendees render with a placeholder name
        tracing::warn!(error = %e, "Attendee lookup failed");
    }

    let caller = auth.and_then(|a| a.session().current_user());
    let dtos = planned
        .into_iter()
        .map(|bath| PlannedBathDto {
            attendee_details: directory.render(&bath.attendees),
            attending: caller.as_ref().map(|user| bath.is_attending(&user.uid)),
            bath,
        })
        .collect();

    Ok(Json(dtos))
}
