//! Upload Routes
//!
//! - POST /api/v1/uploads/bath-image - Stage an image for a bath being logged
//!
//! The bytes stay in memory until `POST /api/v1/baths` claims them with
//! `imageUploadId`; only then are they written to blob storage under the
//! bath's path. Only the uploader can claim them, and only within
//! `api.upload_ttl_secs`.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};

use crate::api::dto::{UploadQuery, UploadResponse};
use crate::api::error::ApiResult;
use crate::api::state::{AppState, Authenticated};
use crate::backend::UploadError;

use super::profile::to_upload;

/// POST /api/v1/uploads/bath-image?filename=
pub async fn stage_bath_image(
    State(state): State<Arc<AppState>>,
    auth: Authenticated,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let user = auth.session().require_user()?;

    let max = state.config.storage.max_upload_bytes;
    if body.is_empty() {
        return Err(UploadError::Empty.into());
    }
    if body.len() > max {
        return Err(UploadError::TooLarge {
            size: body.len(),
            max,
        }
        .into());
    }

    let upload = to_upload(query, &headers, body, "image");
    let filename = upload.safe_filename();
    let size = upload.data.len();
    let upload_id = state.stage_upload(&user.uid, upload);

    tracing::debug!(uid = %user.uid, upload_id = %upload_id, size, "Bath image staged");
    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            upload_id,
            filename,
            size,
        }),
    ))
}
