//! Comments on logged baths, stored under `baths/{bathId}/comments`

use serde::{Deserialize, Serialize};

use super::profile::AuthorSnapshot;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BathComment {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(flatten)]
    pub author: AuthorSnapshot,
    pub text: String,
    /// Unix milliseconds
    pub created_at: i64,
}
