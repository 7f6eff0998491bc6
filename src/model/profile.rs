//! User profiles
//!
//! One document per user under `users/{uid}`. `username` and `email` are
//! fixed at sign-up; everything else is edited through the profile form,
//! except `current_baths` which only moves when a bath is logged.

use serde::{Deserialize, Serialize};

/// Domain used for the synthetic credential addresses.
pub const GENERATED_EMAIL_DOMAIN: &str = "badekompis.app";

/// A user's profile document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Credential uid, also the document id
    pub uid: String,
    /// Synthetic address derived from the username
    pub email: String,
    /// Login name, immutable
    pub username: String,
    /// Display name, initially the username
    pub name: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub avatar_url: String,
    pub target_baths: u32,
    #[serde(default)]
    pub current_baths: u32,
}

impl UserProfile {
    /// Profile as created at sign-up
    pub fn new(
        uid: impl Into<String>,
        email: impl Into<String>,
        username: impl Into<String>,
        target_baths: u32,
    ) -> Self {
        let username = username.into();
        Self {
            uid: uid.into(),
            email: email.into(),
            name: username.clone(),
            username,
            bio: String::new(),
            avatar_url: String::new(),
            target_baths,
            current_baths: 0,
        }
    }

    /// Progress towards the target in percent, capped at 100
    pub fn progress_percent(&self) -> f64 {
        if self.target_baths == 0 {
            return 100.0;
        }
        (self.current_baths as f64 / self.target_baths as f64 * 100.0).min(100.0)
    }

    /// The author fields copied onto entries and comments
    pub fn author(&self) -> AuthorSnapshot {
        AuthorSnapshot {
            user_id: self.uid.clone(),
            user_name: self.name.clone(),
            user_avatar: self.avatar_url.clone(),
        }
    }
}

/// Denormalized copy of the author, taken when an entry is written.
///
/// Never refreshed afterwards: a later name or avatar change is not
/// reflected on older entries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AuthorSnapshot {
    pub user_id: String,
    pub user_name: String,
    #[serde(default)]
    pub user_avatar: String,
}

/// Mutable profile fields, written with a merge
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_baths: Option<u32>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.bio.is_none()
            && self.avatar_url.is_none()
            && self.target_baths.is_none()
    }
}

/// Derive the credential address for a username.
///
/// Lowercases, drops whitespace and anything outside `[a-z0-9_.-]`.
/// Returns `None` when nothing usable is left.
pub fn synthetic_email(username: &str) -> Option<String> {
    let local: String = username
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | '-'))
        .collect();

    if local.is_empty() {
        None
    } else {
        Some(format!("{}@{}", local, GENERATED_EMAIL_DOMAIN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_profile_defaults() {
        let profile = UserProfile::new("u1", "anna@badekompis.app", "anna", 30);
        assert_eq!(profile.name, "anna");
        assert_eq!(profile.current_baths, 0);
        assert_eq!(profile.target_baths, 30);
        assert!(profile.bio.is_empty());
    }

    #[test]
    fn test_synthetic_email() {
        assert_eq!(
            synthetic_email("Fiske Mannen_88").as_deref(),
            Some("fiskemannen_88@badekompis.app")
        );
        assert_eq!(synthetic_email("Øyvind").as_deref(), Some("yvind@badekompis.app"));
        assert_eq!(synthetic_email("  ÆØÅ "), None);
    }

    #[test]
    fn test_progress_is_capped() {
        let mut profile = UserProfile::new("u1", "a@badekompis.app", "a", 10);
        profile.current_baths = 5;
        assert_eq!(profile.progress_percent(), 50.0);
        profile.current_baths = 25;
        assert_eq!(profile.progress_percent(), 100.0);
    }

    #[test]
    fn test_profile_wire_format() {
        let profile = UserProfile::new("u1", "anna@badekompis.app", "anna", 30);
        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["targetBaths"], 30);
        assert_eq!(json["currentBaths"], 0);
        assert_eq!(json["avatarUrl"], "");
    }
}
