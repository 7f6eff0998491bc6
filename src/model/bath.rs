//! Bath entries
//!
//! A bath is either logged (it happened) or planned (a group bath in the
//! future). Both live in the `baths` collection and are told apart by the
//! `type` field.

use serde::{Deserialize, Serialize};

use super::profile::AuthorSnapshot;

/// How the water felt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum WaterTemperature {
    #[serde(rename = "kaldt")]
    Kaldt,
    Passe,
    Digg,
    Glovarmt,
}

impl WaterTemperature {
    pub fn all() -> &'static [WaterTemperature] {
        &[
            WaterTemperature::Kaldt,
            WaterTemperature::Passe,
            WaterTemperature::Digg,
            WaterTemperature::Glovarmt,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WaterTemperature::Kaldt => "kaldt",
            WaterTemperature::Passe => "Passe",
            WaterTemperature::Digg => "Digg",
            WaterTemperature::Glovarmt => "Glovarmt",
        }
    }
}

impl std::fmt::Display for WaterTemperature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WaterTemperature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WaterTemperature::all()
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown water temperature '{}'", s))
    }
}

/// Reaction counters on a logged bath
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Reactions {
    pub thumbs_up: u64,
    pub heart: u64,
    pub party: u64,
}

/// The reaction buttons
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ReactionKind {
    ThumbsUp,
    Heart,
    Party,
}

impl ReactionKind {
    /// Field path of the counter inside a bath document
    pub fn field_path(&self) -> &'static str {
        match self {
            ReactionKind::ThumbsUp => "reactions.thumbsUp",
            ReactionKind::Heart => "reactions.heart",
            ReactionKind::Party => "reactions.party",
        }
    }
}

impl std::str::FromStr for ReactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "thumbsUp" | "thumbs_up" | "thumbs-up" => Ok(ReactionKind::ThumbsUp),
            "heart" => Ok(ReactionKind::Heart),
            "party" => Ok(ReactionKind::Party),
            other => Err(format!("unknown reaction '{}'", other)),
        }
    }
}

/// Fields shared by both kinds of entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BathCommon {
    /// Document id, not stored inside the document
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(flatten)]
    pub author: AuthorSnapshot,
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH:MM`
    pub time: String,
    #[serde(default)]
    pub location: String,
    /// Unix milliseconds
    pub created_at: i64,
}

/// A bath that took place
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoggedBath {
    #[serde(flatten)]
    pub common: BathCommon,
    #[serde(default)]
    pub comments: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub reactions: Reactions,
    #[serde(default)]
    pub comment_count: u64,
    #[serde(default)]
    pub water_temperature: Option<WaterTemperature>,
}

/// A group bath in the future
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlannedBath {
    #[serde(flatten)]
    pub common: BathCommon,
    pub description: String,
    /// Uids in join order, each at most once
    #[serde(default)]
    pub attendees: Vec<String>,
}

impl PlannedBath {
    pub fn is_attending(&self, uid: &str) -> bool {
        self.attendees.iter().any(|a| a == uid)
    }

    /// Start of the bath as a naive local timestamp
    pub fn starts_at(&self) -> Option<chrono::NaiveDateTime> {
        let date = chrono::NaiveDate::parse_from_str(&self.common.date, "%Y-%m-%d").ok()?;
        let time = chrono::NaiveTime::parse_from_str(&self.common.time, "%H:%M").ok()?;
        Some(date.and_time(time))
    }
}

/// An entry in the `baths` collection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BathEntry {
    Logged(LoggedBath),
    Planned(PlannedBath),
}

impl BathEntry {
    pub fn common(&self) -> &BathCommon {
        match self {
            BathEntry::Logged(b) => &b.common,
            BathEntry::Planned(b) => &b.common,
        }
    }

    pub fn id(&self) -> &str {
        &self.common().id
    }

    pub fn created_at(&self) -> i64 {
        self.common().created_at
    }

    pub fn user_id(&self) -> &str {
        &self.common().author.user_id
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BathEntry::Logged(_) => "logged",
            BathEntry::Planned(_) => "planned",
        }
    }

    pub fn as_planned(&self) -> Option<&PlannedBath> {
        match self {
            BathEntry::Planned(b) => Some(b),
            BathEntry::Logged(_) => None,
        }
    }

    pub fn as_logged(&self) -> Option<&LoggedBath> {
        match self {
            BathEntry::Logged(b) => Some(b),
            BathEntry::Planned(_) => None,
        }
    }
}
