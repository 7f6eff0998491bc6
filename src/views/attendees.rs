//! Attendee names for planned baths
//!
//! Planned baths only store attendee uids. The directory looks each uid up
//! once and remembers the answer for as long as it lives; until then the
//! attendee renders with a placeholder name.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::backend::{DocumentStore, StoreResult};
use crate::model::{collections, UserProfile};

/// Name shown while a lookup is outstanding
pub const UNRESOLVED_NAME: &str = "Laster…";

/// Name shown for a uid without a profile
pub const UNKNOWN_NAME: &str = "Ukjent bruker";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attendee {
    pub uid: String,
    pub name: String,
    pub avatar_url: String,
    pub resolved: bool,
}

impl Attendee {
    fn pending(uid: &str) -> Self {
        Self {
            uid: uid.to_string(),
            name: UNRESOLVED_NAME.to_string(),
            avatar_url: String::new(),
            resolved: false,
        }
    }
}

#[derive(Debug, Clone)]
enum Entry {
    InFlight,
    Known { name: String, avatar_url: String },
}

pub struct AttendeeDirectory {
    store: Arc<dyn DocumentStore>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl AttendeeDirectory {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Attendee as currently known, never waiting
    pub fn lookup(&self, uid: &str) -> Attendee {
        let entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(_) => return Attendee::pending(uid),
        };
        match entries.get(uid) {
            Some(Entry::Known { name, avatar_url }) => Attendee {
                uid: uid.to_string(),
                name: name.clone(),
                avatar_url: avatar_url.clone(),
                resolved: true,
            },
            _ => Attendee::pending(uid),
        }
    }

    /// Render a list of uids with whatever is known now
    pub fn render(&self, uids: &[String]) -> Vec<Attendee> {
        uids.iter().map(|uid| self.lookup(uid)).collect()
    }

    /// Look up every uid not seen before. Returns how many were fetched.
    pub async fn resolve(&self, uids: &[String]) -> StoreResult<usize> {
        let missing: Vec<String> = {
            let mut entries = match self.entries.lock() {
                Ok(entries) => entries,
                Err(_) => return Ok(0),
            };
            let mut missing = Vec::new();
            for uid in uids {
                if !entries.contains_key(uid) {
                    entries.insert(uid.clone(), Entry::InFlight);
                    missing.push(uid.clone());
                }
            }
            missing
        };

        for uid in &missing {
            let path = format!("{}/{}", collections::USERS, uid);
            let fetched = match self.store.get(&path).await {
                Ok(Some(doc)) => doc.decode::<UserProfile>().map(|p| Entry::Known {
                    name: p.name,
                    avatar_url: p.avatar_url,
                }),
                Ok(None) => Ok(Entry::Known {
                    name: UNKNOWN_NAME.to_string(),
                    avatar_url: String::new(),
                }),
                Err(e) => Err(e),
            };

            match fetched {
                Ok(entry) => {
                    if let Ok(mut entries) = self.entries.lock() {
                        entries.insert(uid.clone(), entry);
                    }
                }
                Err(e) => {
                    // Forget the uid so a later call tries again
                    if let Ok(mut entries) = self.entries.lock() {
                        entries.remove(uid);
                    }
                    return Err(e);
                }
            }
        }

        Ok(missing.len())
    }
}
