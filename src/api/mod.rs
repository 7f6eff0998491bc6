//! Badekompis REST API
//!
//! HTTP API layer over the application services, built with Axum.
//! Authenticated routes take `Authorization: Bearer <token>`.
//!
//! # Endpoints
//!
//! ## Auth
//! - `POST /api/v1/auth/signup` - Create an account
//! - `POST /api/v1/auth/login` - Sign in by username
//! - `POST /api/v1/auth/logout` - Sign out
//! - `GET /api/v1/session` - Session state
//!
//! ## Profile
//! - `GET /api/v1/profile` - Own profile
//! - `PUT /api/v1/profile` - Update own profile
//! - `POST /api/v1/profile/avatar` - Replace avatar
//! - `GET /api/v1/users/:uid` - Someone's profile and activity
//!
//! ## Baths
//! - `GET /api/v1/feed` - Every entry, newest first
//! - `POST /api/v1/baths` - Log a bath
//! - `POST /api/v1/uploads/bath-image` - Stage an image for a logged bath
//! - `GET /api/v1/planned` - Upcoming planned baths
//! - `POST /api/v1/planned` - Plan a bath
//! - `POST|DELETE /api/v1/baths/:id/attendees/:uid` - Join / leave
//! - `GET|POST /api/v1/baths/:id/comments` - Comments
//! - `POST /api/v1/baths/:id/reactions/:kind` - React
//! - `GET /api/v1/leaderboard` - Leaderboard
//!
//! ## Notifications
//! - `GET /api/v1/notifications` - Unseen flags
//! - `POST /api/v1/notifications/:category/seen` - Mark seen
//!
//! ## Misc
//! - `GET /api/v1/geocode?address=` - Address lookup
//! - `GET /media/*path` - Uploaded files
//! - `GET /health/live`, `/health/ready`, `/health` - Probes
//! - `GET /ws` - Live views over WebSocket

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::{AppState, Authenticated, ClientSession};

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::config::ApiConfig;
use crate::websocket::websocket_handler;

/// Slack on top of the upload limit for the rest of the request
const UPLOAD_BODY_SLACK: usize = 64 * 1024;

/// Build the API router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let upload_limit =
        DefaultBodyLimit::max(state.config.storage.max_upload_bytes + UPLOAD_BODY_SLACK);
    let media_dir = state.config.storage.data_dir.join("media");
    let cors = cors_layer(&state.config.api);

    let api_routes = Router::new()
        // Auth routes
        .route("/auth/signup", post(routes::auth::signup))
        .route("/auth/login", post(routes::auth::login))
        .route("/auth/logout", post(routes::auth::logout))
        .route("/session", get(routes::auth::session))
        // Profile routes
        .route(
            "/profile",
            get(routes::profile::get_profile).put(routes::profile::update_profile),
        )
        .route(
            "/profile/avatar",
            post(routes::profile::upload_avatar).layer(upload_limit.clone()),
        )
        .route("/users/:uid", get(routes::feed::user_profile))
        // Bath routes
        .route("/feed", get(routes::feed::feed))
        .route("/leaderboard", get(routes::feed::leaderboard))
        .route("/baths", post(routes::baths::log_bath))
        .route(
            "/uploads/bath-image",
            post(routes::uploads::stage_bath_image).layer(upload_limit),
        )
        .route(
            "/planned",
            get(routes::baths::list_planned).post(routes::baths::plan_bath),
        )
        // Social routes
        .route(
            "/baths/:id/attendees/:uid",
            post(routes::social::join_bath).delete(routes::social::leave_bath),
        )
        .route(
            "/baths/:id/comments",
            get(routes::social::list_comments).post(routes::social::add_comment),
        )
        .route("/baths/:id/reactions/:kind", post(routes::social::react))
        // Notification routes
        .route("/notifications", get(routes::notifications::status))
        .route(
            "/notifications/:category/seen",
            post(routes::notifications::mark_seen),
        )
        .route("/geocode", get(routes::geocode::geocode));

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/ready", get(routes::health::readiness))
        .route("/", get(routes::health::full_health));

    // Create shared state
    let shared_state = Arc::new(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .nest("/health", health_routes)
        .route("/ws", get(websocket_handler))
        .nest_service("/media", ServeDir::new(media_dir))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(shared_state)
}

/// Any origin when none are configured, otherwise the configured list
fn cors_layer(config: &ApiConfig) -> CorsLayer {
    if config.cors_origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::permissive().allow_origin(AllowOrigin::list(origins))
}

/// Start the API server
pub async fn serve(state: AppState) -> Result<(), ApiError> {
    let addr = state.config.api.addr();
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Badekompis API listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("Badekompis API shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::config::Config;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use tempfile::tempdir;
    use tower::util::ServiceExt;

    fn create_test_app() -> (Router, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.storage.data_dir = dir.path().to_path_buf();
        let backend = Backend::in_memory(dir.path().join("media")).unwrap();

        let router = build_router(AppState::new(backend, config));
        (router, dir)
    }

    async fn send(app: &Router, request: Request<Body>) -> Response {
        app.clone().oneshot(request).await.unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("Content-Type", "application/json");
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get_with(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    /// Sign up and return (token, uid)
    async fn signup(app: &Router, username: &str, target: i64) -> (String, String) {
        let response = send(
            app,
            post_json(
                "/api/v1/auth/signup",
                None,
                json!({"username": username, "password": "hemmelig",
                       "confirmPassword": "hemmelig", "targetBaths": target}),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        (
            body["token"].as_str().unwrap().to_string(),
            body["session"]["user"]["uid"].as_str().unwrap().to_string(),
        )
    }

    #[tokio::test]
    async fn test_health_live() {
        let (app, _dir) = create_test_app();
        let response = send(&app, get_with("/health/live", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_full() {
        let (app, _dir) = create_test_app();
        let response = send(&app, get_with("/health", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_signup_then_session() {
        let (app, _dir) = create_test_app();

        let response = send(
            &app,
            post_json(
                "/api/v1/auth/signup",
                None,
                json!({"username": "anna", "password": "hemmelig",
                       "confirmPassword": "hemmelig", "targetBaths": 30}),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        assert_eq!(body["showOnboarding"], true);
        assert_eq!(body["session"]["profile"]["targetBaths"], 30);
        assert_eq!(body["notice"]["title"], "Registrering Vellykket!");
        let token = body["token"].as_str().unwrap().to_string();

        let response = send(&app, get_with("/api/v1/session", Some(&token))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let session = json_body(response).await;
        assert_eq!(session["profile"]["username"], "anna");
        assert!(session["error"].is_null());
    }

    #[tokio::test]
    async fn test_duplicate_username_conflicts() {
        let (app, _dir) = create_test_app();
        signup(&app, "anna", 30).await;

        let response = send(
            &app,
            post_json(
                "/api/v1/auth/signup",
                None,
                json!({"username": "anna", "password": "annet123",
                       "confirmPassword": "annet123", "targetBaths": 10}),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "USERNAME_TAKEN");
    }

    #[tokio::test]
    async fn test_login_wrong_password() {
        let (app, _dir) = create_test_app();
        signup(&app, "anna", 30).await;

        let response = send(
            &app,
            post_json(
                "/api/v1/auth/login",
                None,
                json!({"username": "anna", "password": "feil-passord"}),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_requires_token() {
        let (app, _dir) = create_test_app();

        let response = send(
            &app,
            post_json("/api/v1/baths", None, json!({"date": "2024-01-05", "time": "07:30"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = send(&app, get_with("/api/v1/session", Some("forged"))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_log_bath_scenario() {
        let (app, _dir) = create_test_app();
        let (token, uid) = signup(&app, "anna", 30).await;

        let response = send(
            &app,
            post_json(
                "/api/v1/baths",
                Some(&token),
                json!({"date": "2024-01-05", "time": "07:30", "location": "Korsvika",
                       "waterTemperature": "kaldt"}),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        assert_eq!(body["bath"]["type"], "logged");
        assert_eq!(body["notice"]["description"], "Ditt bad ved Korsvika er logget.");

        let profile = json_body(send(&app, get_with("/api/v1/profile", Some(&token))).await).await;
        assert_eq!(profile["profile"]["currentBaths"], 1);

        let feed = json_body(send(&app, get_with("/api/v1/feed", None)).await).await;
        assert_eq!(feed.as_array().unwrap().len(), 1);
        assert_eq!(feed[0]["userId"], uid.as_str());

        let board = json_body(send(&app, get_with("/api/v1/leaderboard", None)).await).await;
        assert_eq!(board[0]["rank"], 1);
        assert_eq!(board[0]["currentBaths"], 1);
    }

    #[tokio::test]
    async fn test_log_bath_validation_error() {
        let (app, _dir) = create_test_app();
        let (token, _) = signup(&app, "anna", 30).await;

        let response = send(
            &app,
            post_json(
                "/api/v1/baths",
                Some(&token),
                json!({"date": "2024-01-05", "time": "25:99"}),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(body["error"]["fields"][0]["field"], "time");
    }

    #[tokio::test]
    async fn test_staged_image_is_attached() {
        let (app, dir) = create_test_app();
        let (token, uid) = signup(&app, "anna", 30).await;

        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/uploads/bath-image?filename=hav.jpg")
            .header("Authorization", format!("Bearer {}", token))
            .header("Content-Type", "image/jpeg")
            .body(Body::from(vec![0xFF, 0xD8, 0xFF]))
            .unwrap();
        let response = send(&app, request).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let staged = json_body(response).await;
        let upload_id = staged["uploadId"].as_str().unwrap().to_string();

        // Another user cannot claim it
        let (bjorn, _) = signup(&app, "bjorn", 10).await;
        let response = send(
            &app,
            post_json(
                "/api/v1/baths",
                Some(&bjorn),
                json!({"date": "2024-01-05", "time": "07:30", "imageUploadId": upload_id}),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(
            &app,
            post_json(
                "/api/v1/baths",
                Some(&token),
                json!({"date": "2024-01-05", "time": "07:30", "imageUploadId": upload_id}),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        let url = body["bath"]["imageUrl"].as_str().unwrap();
        assert!(url.starts_with(&format!("/media/baths/{}/", uid)));
        assert!(url.ends_with("-hav.jpg"));

        let stored = url.trim_start_matches("/media/");
        assert!(dir.path().join("media").join(stored).exists());

        // Served back under /media
        let response = send(&app, get_with(url, None)).await;
        assert_eq!(response.status(), StatusCode::OK);

        // An upload id works once
        let response = send(
            &app,
            post_json(
                "/api/v1/baths",
                Some(&token),
                json!({"date": "2024-01-05", "time": "07:30", "imageUploadId": upload_id}),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_plan_and_join() {
        let (app, _dir) = create_test_app();
        let (anna, anna_uid) = signup(&app, "anna", 30).await;
        let (bjorn, bjorn_uid) = signup(&app, "bjorn", 10).await;

        let tomorrow = (chrono::Local::now() + chrono::Duration::days(1))
            .format("%Y-%m-%d")
            .to_string();
        let response = send(
            &app,
            post_json(
                "/api/v1/planned",
                Some(&anna),
                json!({"date": tomorrow, "time": "07:00", "location": "Korsvika",
                       "description": "Morgenbad"}),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let bath_id = json_body(response).await["bath"]["id"]
            .as_str()
            .unwrap()
            .to_string();

        // Joining on someone else's behalf is refused
        let uri = format!("/api/v1/baths/{}/attendees/{}", bath_id, bjorn_uid);
        let response = send(&app, post_json(&uri, Some(&anna), json!({}))).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = send(&app, post_json(&uri, Some(&bjorn), json!({}))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["changed"], true);
        assert_eq!(body["notice"]["description"], "Du er nå påmeldt \"Morgenbad\".");

        // Second join changes nothing
        let response = send(&app, post_json(&uri, Some(&bjorn), json!({}))).await;
        assert_eq!(json_body(response).await["changed"], false);

        let planned =
            json_body(send(&app, get_with("/api/v1/planned", Some(&bjorn))).await).await;
        assert_eq!(planned.as_array().unwrap().len(), 1);
        assert_eq!(planned[0]["attending"], true);
        let attendees = planned[0]["attendees"].as_array().unwrap();
        assert_eq!(attendees.len(), 2);
        assert_eq!(attendees[0], anna_uid.as_str());
        assert_eq!(attendees[1], bjorn_uid.as_str());
        assert_eq!(planned[0]["attendeeDetails"][1]["name"], "bjorn");

        let response = send(
            &app,
            Request::builder()
                .method("DELETE")
                .uri(&uri)
                .header("Authorization", format!("Bearer {}", bjorn))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(json_body(response).await["changed"], true);
    }

    #[tokio::test]
    async fn test_comments_and_reactions() {
        let (app, _dir) = create_test_app();
        let (token, _) = signup(&app, "anna", 30).await;

        let response = send(
            &app,
            post_json(
                "/api/v1/baths",
                Some(&token),
                json!({"date": "2024-01-05", "time": "07:30"}),
            ),
        )
        .await;
        let bath_id = json_body(response).await["bath"]["id"]
            .as_str()
            .unwrap()
            .to_string();

        let uri = format!("/api/v1/baths/{}/comments", bath_id);
        for text in ["Første", "Andre"] {
            let response = send(&app, post_json(&uri, Some(&token), json!({"text": text}))).await;
            assert_eq!(response.status(), StatusCode::CREATED);
        }
        let response = send(&app, post_json(&uri, Some(&token), json!({"text": "   "}))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let comments = json_body(send(&app, get_with(&uri, None)).await).await;
        assert_eq!(comments[0]["text"], "Første");
        assert_eq!(comments[1]["text"], "Andre");

        let react = format!("/api/v1/baths/{}/reactions/heart", bath_id);
        let response = send(&app, post_json(&react, Some(&token), json!({}))).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let bad = format!("/api/v1/baths/{}/reactions/angry", bath_id);
        let response = send(&app, post_json(&bad, Some(&token), json!({}))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let feed = json_body(send(&app, get_with("/api/v1/feed", None)).await).await;
        assert_eq!(feed[0]["reactions"]["heart"], 1);
        assert_eq!(feed[0]["commentCount"], 2);
    }

    #[tokio::test]
    async fn test_notifications_follow_watermark() {
        let (app, _dir) = create_test_app();
        let (token, _) = signup(&app, "anna", 30).await;

        send(
            &app,
            post_json(
                "/api/v1/baths",
                Some(&token),
                json!({"date": "2024-01-05", "time": "07:30"}),
            ),
        )
        .await;

        let status =
            json_body(send(&app, get_with("/api/v1/notifications", Some(&token))).await).await;
        assert_eq!(status["newFeed"], true);
        assert_eq!(status["newPlanned"], false);

        let response = send(
            &app,
            post_json("/api/v1/notifications/feed/seen", Some(&token), json!({})),
        )
        .await;
        assert_eq!(json_body(response).await["newFeed"], false);

        let response = send(
            &app,
            post_json("/api/v1/notifications/chat/seen", Some(&token), json!({})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_user_profile() {
        let (app, _dir) = create_test_app();
        let response = send(&app, get_with("/api/v1/users/ghost", None)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_geocode_fixed_point() {
        let (app, _dir) = create_test_app();

        let response = send(&app, get_with("/api/v1/geocode?address=Korsvika", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["lat"], 63.430515);
        assert_eq!(body["lng"], 10.395053);
    }
}
