//! Notification tracker
//!
//! Tells whether the feed or the planned list has something the user has
//! not seen. Each category has a watermark in client-local storage (unix
//! ms of the last visit) and a latest timestamp fed by a live query.
//! Something is unseen when latest > watermark.

use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backend::{Direction, Document, DocumentStore, Query, StoreResult};
use crate::local_storage::{
    LocalStorage, LocalStorageError, LAST_SEEN_FEED_KEY, LAST_SEEN_PLANNED_KEY,
};
use crate::model::{collections, now_millis};

/// How many recent entries are scanned for the latest planned bath
const PLANNED_SCAN_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Feed,
    Planned,
}

impl Category {
    pub fn storage_key(&self) -> &'static str {
        match self {
            Category::Feed => LAST_SEEN_FEED_KEY,
            Category::Planned => LAST_SEEN_PLANNED_KEY,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Feed => "feed",
            Category::Planned => "planned",
        }
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "feed" => Ok(Category::Feed),
            "planned" => Ok(Category::Planned),
            other => Err(format!("unknown notification category '{}'", other)),
        }
    }
}

/// Unseen flags, as shown in the navigation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationStatus {
    pub new_feed: bool,
    pub new_planned: bool,
}

#[derive(Debug, Default)]
struct Marks {
    seen_feed: i64,
    seen_planned: i64,
    latest_feed: i64,
    latest_planned: i64,
}

impl Marks {
    fn seen(&self, category: Category) -> i64 {
        match category {
            Category::Feed => self.seen_feed,
            Category::Planned => self.seen_planned,
        }
    }

    fn seen_mut(&mut self, category: Category) -> &mut i64 {
        match category {
            Category::Feed => &mut self.seen_feed,
            Category::Planned => &mut self.seen_planned,
        }
    }

    fn latest(&self, category: Category) -> i64 {
        match category {
            Category::Feed => self.latest_feed,
            Category::Planned => self.latest_planned,
        }
    }

    fn status(&self) -> NotificationStatus {
        NotificationStatus {
            new_feed: self.latest_feed > self.seen_feed,
            new_planned: self.latest_planned > self.seen_planned,
        }
    }
}

pub struct NotificationTracker {
    store: Arc<dyn DocumentStore>,
    storage: Arc<dyn LocalStorage>,
    marks: Mutex<Marks>,
    status: watch::Sender<NotificationStatus>,
}

impl NotificationTracker {
    /// Load both watermarks from local storage
    pub fn new(store: Arc<dyn DocumentStore>, storage: Arc<dyn LocalStorage>) -> Self {
        let marks = Marks {
            seen_feed: read_watermark(storage.as_ref(), Category::Feed),
            seen_planned: read_watermark(storage.as_ref(), Category::Planned),
            ..Marks::default()
        };
        let (status, _) = watch::channel(marks.status());
        Self {
            store,
            storage,
            marks: Mutex::new(marks),
            status,
        }
    }

    pub fn watermark(&self, category: Category) -> i64 {
        self.marks.lock().map(|m| m.seen(category)).unwrap_or(0)
    }

    pub fn latest(&self, category: Category) -> i64 {
        self.marks.lock().map(|m| m.latest(category)).unwrap_or(0)
    }

    pub fn has_unseen(&self, category: Category) -> bool {
        self.latest(category) > self.watermark(category)
    }

    pub fn status(&self) -> NotificationStatus {
        *self.status.borrow()
    }

    /// Watch the unseen flags
    pub fn subscribe(&self) -> watch::Receiver<NotificationStatus> {
        self.status.subscribe()
    }

    /// Record a visit now
    pub fn mark_seen(&self, category: Category) -> Result<(), LocalStorageError> {
        self.mark_seen_at(category, now_millis())
    }

    /// Record a visit at `timestamp`. The watermark never moves backwards.
    pub fn mark_seen_at(&self, category: Category, timestamp: i64) -> Result<(), LocalStorageError> {
        let value = {
            let mut marks = self
                .marks
                .lock()
                .map_err(|e| LocalStorageError::Lock(e.to_string()))?;
            let seen = marks.seen_mut(category);
            if timestamp <= *seen {
                return Ok(());
            }
            *seen = timestamp;
            self.publish(&marks);
            timestamp
        };
        self.storage
            .set(category.storage_key(), &value.to_string())
    }

    /// Feed snapshot: newest entry first
    pub fn observe_feed(&self, docs: &[Document]) {
        if let Some(ts) = docs.first().and_then(created_at) {
            self.set_latest(Category::Feed, ts);
        }
    }

    /// Recent entries, newest first; the first planned one wins
    pub fn observe_planned(&self, docs: &[Document]) {
        let planned = docs
            .iter()
            .find(|d| d.get("type").and_then(|t| t.as_str()) == Some("planned"));
        if let Some(ts) = planned.and_then(created_at) {
            self.set_latest(Category::Planned, ts);
        }
    }

    fn set_latest(&self, category: Category, timestamp: i64) {
        if let Ok(mut marks) = self.marks.lock() {
            match category {
                Category::Feed => marks.latest_feed = timestamp,
                Category::Planned => marks.latest_planned = timestamp,
            }
            self.publish(&marks);
        }
    }

    fn publish(&self, marks: &Marks) {
        let status = marks.status();
        self.status.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });
    }

    /// One-shot update of both latest timestamps
    pub async fn refresh(&self) -> StoreResult<NotificationStatus> {
        self.observe_feed(&self.store.query(&feed_query()).await?);
        self.observe_planned(&self.store.query(&planned_query()).await?);
        Ok(self.status())
    }

    /// Follow both live queries until the guard is dropped
    pub fn start(self: &Arc<Self>) -> NotificationGuard {
        let feed = {
            let tracker = Arc::clone(self);
            let mut snapshots = self.store.listen(feed_query());
            tokio::spawn(async move {
                while let Some(snapshot) = snapshots.next().await {
                    match snapshot {
                        Ok(docs) => tracker.observe_feed(&docs),
                        Err(e) => tracing::warn!(error = %e, "Feed notification listener failed"),
                    }
                }
            })
        };

        let planned = {
            let tracker = Arc::clone(self);
            let mut snapshots = self.store.listen(planned_query());
            tokio::spawn(async move {
                while let Some(snapshot) = snapshots.next().await {
                    match snapshot {
                        Ok(docs) => tracker.observe_planned(&docs),
                        Err(e) => {
                            tracing::warn!(error = %e, "Planned notification listener failed")
                        }
                    }
                }
            })
        };

        NotificationGuard {
            tasks: vec![feed, planned],
        }
    }
}

/// Stops the tracker's listeners when dropped
pub struct NotificationGuard {
    tasks: Vec<JoinHandle<()>>,
}

impl NotificationGuard {
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for NotificationGuard {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn feed_query() -> Query {
    Query::collection(collections::BATHS)
        .order_by("createdAt", Direction::Descending)
        .limit(1)
}

fn planned_query() -> Query {
    Query::collection(collections::BATHS)
        .order_by("createdAt", Direction::Descending)
        .limit(PLANNED_SCAN_LIMIT)
}

fn created_at(doc: &Document) -> Option<i64> {
    doc.get("createdAt").and_then(|v| v.as_i64())
}

fn read_watermark(storage: &dyn LocalStorage, category: Category) -> i64 {
    storage
        .get(category.storage_key())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}
