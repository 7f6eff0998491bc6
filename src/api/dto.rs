//! Data Transfer Objects
//!
//! Request and response types for the API endpoints.
//! Field names are camelCase on the wire, like the stored documents.

use serde::{Deserialize, Serialize};

use crate::backend::AuthUser;
use crate::forms::LogBathForm;
use crate::model::{BathEntry, PlannedBath, UserProfile};
use crate::notice::Notice;
use crate::session::SessionView;
use crate::views::Attendee;

// ============================================
// AUTH DTOs
// ============================================

/// Returned by sign-up and login
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub token: String,
    pub session: SessionView,
    pub notice: Notice,
    /// Set once, right after sign-up
    pub show_onboarding: bool,
}

/// Any operation that only reports back with a notice
#[derive(Debug, Serialize)]
pub struct NoticeResponse {
    pub notice: Notice,
}

// ============================================
// BATH DTOs
// ============================================

/// Log bath request: the form plus an optional staged image
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogBathRequest {
    #[serde(flatten)]
    pub form: LogBathForm,
    #[serde(default)]
    pub image_upload_id: Option<String>,
}

/// A created bath with the notice to show
#[derive(Debug, Serialize)]
pub struct BathResponse {
    pub bath: BathEntry,
    pub notice: Notice,
}

/// `?filename=` on raw-body uploads
#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    #[serde(default)]
    pub filename: Option<String>,
}

/// A staged upload waiting to be attached
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub upload_id: String,
    pub filename: String,
    pub size: usize,
}

/// Planned bath with attendee names filled in
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedBathDto {
    #[serde(flatten)]
    pub bath: PlannedBath,
    pub attendee_details: Vec<Attendee>,
    /// Whether the caller is on the attendee list; absent when signed out
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attending: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceResponse {
    pub changed: bool,
    pub notice: Notice,
}

#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    #[serde(default)]
    pub text: String,
}

// ============================================
// PROFILE DTOs
// ============================================

/// Leaderboard row
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub uid: String,
    pub name: String,
    pub avatar_url: String,
    pub current_baths: u32,
    pub target_baths: u32,
    pub progress_percent: f64,
}

impl LeaderboardEntry {
    pub fn new(rank: usize, profile: &UserProfile) -> Self {
        Self {
            rank,
            uid: profile.uid.clone(),
            name: profile.name.clone(),
            avatar_url: profile.avatar_url.clone(),
            current_baths: profile.current_baths,
            target_baths: profile.target_baths,
            progress_percent: profile.progress_percent(),
        }
    }
}

/// Someone's profile page
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfileResponse {
    pub profile: UserProfile,
    pub progress_percent: f64,
    pub activity: Vec<BathEntry>,
}

/// The caller's own principal and profile
#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: AuthUser,
    pub profile: UserProfile,
}

// ============================================
// MISC DTOs
// ============================================

#[derive(Debug, Deserialize)]
pub struct GeocodeQuery {
    #[serde(default)]
    pub address: String,
}

/// Full health status response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy" or "unhealthy"
    pub status: String,
    /// Document store status
    pub store: String,
    /// Seconds since server start
    pub uptime_seconds: u64,
    /// Signed-in clients held by the server
    pub sessions: usize,
    /// Open WebSocket connections
    pub websocket_connections: usize,
    /// Server version
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_bath_request_flattens_form() {
        let req: LogBathRequest = serde_json::from_str(
            r#"{"date": "2024-01-05", "time": "07:30", "location": "Korsvika",
                "waterTemperature": "kaldt", "imageUploadId": "abc"}"#,
        )
        .unwrap();
        assert_eq!(req.form.date, "2024-01-05");
        assert_eq!(req.form.location.as_deref(), Some("Korsvika"));
        assert_eq!(req.image_upload_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_leaderboard_entry() {
        let mut profile = UserProfile::new("u1", "anna@badekompis.app", "anna", 30);
        profile.current_baths = 15;
        let row = LeaderboardEntry::new(1, &profile);
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["currentBaths"], 15);
        assert_eq!(json["progressPercent"], 50.0);
    }
}
