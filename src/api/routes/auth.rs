//! Auth Routes
//!
//! - POST /api/v1/auth/signup - Create an account and sign in
//! - POST /api/v1/auth/login - Sign in by username
//! - POST /api/v1/auth/logout - Sign out
//! - GET /api/v1/session - Current session state

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};

use crate::api::dto::{AuthResponse, NoticeResponse};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::{AppState, Authenticated, ClientSession};
use crate::forms::{LoginForm, SignupForm};
use crate::session::SessionView;

/// POST /api/v1/auth/signup
pub async fn signup(
    State(state): State<Arc<AppState>>,
    Json(form): Json<SignupForm>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    let client = Arc::new(ClientSession::new(state.backend.clone()));
    let notice = client.session.sign_up(&form).await?;

    let response = establish(&state, client, notice).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/v1/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(form): Json<LoginForm>,
) -> ApiResult<Json<AuthResponse>> {
    let client = Arc::new(ClientSession::new(state.backend.clone()));
    let notice = client.session.sign_in(&form).await?;

    Ok(Json(establish(&state, client, notice).await?))
}

async fn establish(
    state: &AppState,
    client: Arc<ClientSession>,
    notice: crate::notice::Notice,
) -> ApiResult<AuthResponse> {
    let token = client
        .session
        .token()
        .ok_or_else(|| ApiError::Internal("Signed in without a token".to_string()))?;
    let show_onboarding = client.session.take_onboarding_flag()?;
    let session = client.session.view();
    state.register_session(token.clone(), client).await;

    Ok(AuthResponse {
        token,
        session,
        notice,
        show_onboarding,
    })
}

/// POST /api/v1/auth/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    auth: Authenticated,
) -> ApiResult<Json<NoticeResponse>> {
    let notice = auth.session().logout().await?;
    state.remove_session(&auth.token).await;
    Ok(Json(NoticeResponse { notice }))
}

/// GET /api/v1/session
///
/// A signed-in user without a profile document is reported through the
/// `error` field, not as a failed request.
pub async fn session(auth: Authenticated) -> Json<SessionView> {
    Json(auth.session().view())
}
