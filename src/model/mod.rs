//! Domain model
//!
//! - `UserProfile`: one per user (`users/{uid}`)
//! - `BathEntry`: logged or planned bath (`baths/{bathId}`)
//! - `BathComment`: comment on a bath (`baths/{bathId}/comments/{id}`)
//!
//! Field names on the wire are camelCase.

mod bath;
mod comment;
mod profile;

pub use bath::{
    BathCommon, BathEntry, LoggedBath, PlannedBath, ReactionKind, Reactions, WaterTemperature,
};
pub use comment::BathComment;
pub use profile::{synthetic_email, AuthorSnapshot, ProfileUpdate, UserProfile, GENERATED_EMAIL_DOMAIN};

/// Collection names
pub mod collections {
    pub const USERS: &str = "users";
    pub const BATHS: &str = "baths";
    pub const COMMENTS: &str = "comments";

    /// `baths/{bath_id}/comments`
    pub fn comments_of(bath_id: &str) -> String {
        format!("{}/{}/{}", BATHS, bath_id, COMMENTS)
    }
}

/// Current time in unix milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
