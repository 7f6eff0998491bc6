//! Profile Routes
//!
//! - GET /api/v1/profile - Own profile
//! - PUT /api/v1/profile - Update own profile
//! - POST /api/v1/profile/avatar - Replace the avatar (raw body)

use axum::{
    body::Bytes,
    extract::Query,
    http::{header::CONTENT_TYPE, HeaderMap},
    Json,
};

use crate::api::dto::{MeResponse, NoticeResponse, UploadQuery};
use crate::api::error::ApiResult;
use crate::api::state::Authenticated;
use crate::backend::Upload;
use crate::forms::ProfileForm;
use crate::session::SessionError;

/// GET /api/v1/profile
pub async fn get_profile(auth: Authenticated) -> ApiResult<Json<MeResponse>> {
    let session = auth.session();
    let user = session.require_user()?;
    let profile = session
        .refresh_profile()
        .await?
        .ok_or(SessionError::ProfileMissing)?;
    Ok(Json(MeResponse { user, profile }))
}

/// PUT /api/v1/profile
pub async fn update_profile(
    auth: Authenticated,
    Json(form): Json<ProfileForm>,
) -> ApiResult<Json<NoticeResponse>> {
    let notice = auth.session().update_profile(&form, None).await?;
    Ok(Json(NoticeResponse { notice }))
}

/// POST /api/v1/profile/avatar?filename=
///
/// Keeps every other field as it is.
pub async fn upload_avatar(
    auth: Authenticated,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<NoticeResponse>> {
    let session = auth.session();
    let (_, profile) = session.require_profile()?;

    let form = ProfileForm {
        name: profile.name,
        bio: Some(profile.bio),
        target_baths: i64::from(profile.target_baths),
        username: None,
        email: None,
    };
    let upload = to_upload(query, &headers, body, "avatar");

    let notice = session.update_profile(&form, Some(upload)).await?;
    Ok(Json(NoticeResponse { notice }))
}

/// Raw request body as an upload
pub(crate) fn to_upload(query: UploadQuery, headers: &HeaderMap, body: Bytes, fallback: &str) -> Upload {
    let filename = query
        .filename
        .filter(|f| !f.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string());
    let upload = Upload::new(filename, body.to_vec());
    match headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
        Some(content_type) => upload.with_content_type(content_type),
        None => upload,
    }
}
