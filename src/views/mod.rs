//! Live views
//!
//! A view follows one live query and turns every snapshot into a value a
//! surface can render. It starts out `Loading` and becomes `Ready` with the
//! first snapshot; later snapshots replace the value. A failed snapshot
//! sends a notice and leaves the state as it was. Documents that do not
//! decode are left out of the value.
//!
//! Views are streams of their values. Dropping a view stops its query.

mod attendees;
mod profile;

use std::pin::Pin;
use std::task::{ready, Context, Poll};

use chrono::NaiveDateTime;
use futures_util::stream::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;

pub use attendees::{Attendee, AttendeeDirectory, UNRESOLVED_NAME};
pub use profile::{not_found_notice, ProfileView};

use crate::backend::{
    decode_valid, Direction, Document, DocumentStore, Query, StoreResult, Subscription,
};
use crate::model::{collections, BathComment, BathEntry, PlannedBath, UserProfile};
use crate::notice::Notice;

/// Leaderboard size
pub const LEADERBOARD_LIMIT: usize = 20;

/// Where views report failed snapshots
pub type NoticeSender = mpsc::UnboundedSender<Notice>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "data", rename_all = "lowercase")]
pub enum ViewState<T> {
    Loading,
    Ready(T),
}

impl<T> ViewState<T> {
    pub fn is_loading(&self) -> bool {
        matches!(self, ViewState::Loading)
    }

    pub fn ready(&self) -> Option<&T> {
        match self {
            ViewState::Loading => None,
            ViewState::Ready(value) => Some(value),
        }
    }
}

type Projection<T> = Box<dyn FnMut(Vec<Document>) -> StoreResult<T> + Send>;

pub struct View<T> {
    source: Subscription<StoreResult<Vec<Document>>>,
    project: Projection<T>,
    state: ViewState<T>,
    notices: Option<NoticeSender>,
    failure: Notice,
}

impl<T: Clone + Send + 'static> View<T> {
    pub fn new(
        source: Subscription<StoreResult<Vec<Document>>>,
        project: impl FnMut(Vec<Document>) -> StoreResult<T> + Send + 'static,
        failure: Notice,
    ) -> Self {
        Self {
            source,
            project: Box::new(project),
            state: ViewState::Loading,
            notices: None,
            failure,
        }
    }

    /// Send failure notices to `notices`
    pub fn with_notices(mut self, notices: NoticeSender) -> Self {
        self.notices = Some(notices);
        self
    }

    pub fn state(&self) -> &ViewState<T> {
        &self.state
    }

    /// Wait for the next successful snapshot
    pub async fn next_state(&mut self) -> Option<&ViewState<T>>
    where
        T: Unpin,
    {
        self.next().await?;
        Some(&self.state)
    }

    /// Process the next snapshot, failed or not
    pub async fn next_result(&mut self) -> Option<StoreResult<T>> {
        let snapshot = self.source.next().await?;
        Some(self.accept(snapshot))
    }

    /// Stop listening
    pub fn unsubscribe(self) {
        drop(self);
    }

    fn accept(&mut self, snapshot: StoreResult<Vec<Document>>) -> StoreResult<T> {
        match snapshot.and_then(|docs| (self.project)(docs)) {
            Ok(value) => {
                self.state = ViewState::Ready(value.clone());
                Ok(value)
            }
            Err(e) => {
                tracing::warn!(error = %e, notice = %self.failure.title, "View snapshot failed");
                if let Some(notices) = &self.notices {
                    let _ = notices.send(self.failure.clone());
                }
                Err(e)
            }
        }
    }
}

impl<T: Clone + Send + Unpin + 'static> Stream for View<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        loop {
            match ready!(this.source.poll_next_unpin(cx)) {
                Some(snapshot) => {
                    if let Ok(value) = this.accept(snapshot) {
                        return Poll::Ready(Some(value));
                    }
                }
                None => return Poll::Ready(None),
            }
        }
    }
}

impl<T> std::fmt::Debug for View<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("View")
            .field("loading", &matches!(self.state, ViewState::Loading))
            .finish_non_exhaustive()
    }
}

pub type FeedView = View<Vec<BathEntry>>;
pub type PlannedBathsView = View<Vec<PlannedBath>>;
pub type LeaderboardView = View<Vec<UserProfile>>;
pub type ActivityView = View<Vec<BathEntry>>;
pub type CommentsView = View<Vec<BathComment>>;

/// Every entry, newest first
pub fn feed_view(store: &dyn DocumentStore) -> FeedView {
    View::new(
        store.listen(feed_query()),
        |docs| Ok(decode_valid(&docs)),
        Notice::error("Feil", "Kunne ikke laste feed."),
    )
}

/// Planned baths that have not started, soonest first
pub fn planned_view(store: &dyn DocumentStore) -> PlannedBathsView {
    View::new(
        store.listen(planned_query()),
        |docs| {
            let entries: Vec<BathEntry> = decode_valid(&docs);
            Ok(upcoming(entries, chrono::Local::now().naive_local()))
        },
        Notice::error("Feil", "Kunne ikke laste planlagte bad."),
    )
}

/// Top users by logged baths, ties by name
pub fn leaderboard_view(store: &dyn DocumentStore) -> LeaderboardView {
    View::new(
        store.listen(leaderboard_query()),
        |docs| Ok(decode_valid(&docs)),
        Notice::error("Feil", "Kunne ikke laste ledertavlen."),
    )
}

/// One user's entries, newest first
pub fn activity_view(store: &dyn DocumentStore, uid: &str) -> ActivityView {
    View::new(
        store.listen(activity_query(uid)),
        |docs| Ok(decode_valid(&docs)),
        Notice::error("Feil", "Kunne ikke laste aktivitetslogg."),
    )
}

/// Comments on a bath, oldest first
pub fn comments_view(store: &dyn DocumentStore, bath_id: &str) -> CommentsView {
    View::new(
        store.listen(comments_query(bath_id)),
        |docs| Ok(decode_valid(&docs)),
        Notice::error("Feil", "Kunne ikke laste kommentarer."),
    )
}

pub fn feed_query() -> Query {
    Query::collection(collections::BATHS).order_by("createdAt", Direction::Descending)
}

pub fn planned_query() -> Query {
    Query::collection(collections::BATHS).where_eq("type", "planned")
}

pub fn leaderboard_query() -> Query {
    Query::collection(collections::USERS)
        .order_by("currentBaths", Direction::Descending)
        .order_by("name", Direction::Ascending)
        .limit(LEADERBOARD_LIMIT)
}

pub fn activity_query(uid: &str) -> Query {
    Query::collection(collections::BATHS)
        .where_eq("userId", uid)
        .order_by("createdAt", Direction::Descending)
}

pub fn comments_query(bath_id: &str) -> Query {
    Query::collection(collections::comments_of(bath_id))
        .order_by("createdAt", Direction::Ascending)
}

/// Planned baths starting at or after `now`, soonest first.
///
/// Entries with an unparseable date or time are left out.
pub fn upcoming(entries: Vec<BathEntry>, now: NaiveDateTime) -> Vec<PlannedBath> {
    let mut planned: Vec<(NaiveDateTime, PlannedBath)> = entries
        .into_iter()
        .filter_map(|entry| match entry {
            BathEntry::Planned(bath) => bath.starts_at().map(|at| (at, bath)),
            BathEntry::Logged(_) => None,
        })
        .filter(|(at, _)| *at >= now)
        .collect();
    planned.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.common.id.cmp(&b.1.common.id)));
    planned.into_iter().map(|(_, bath)| bath).collect()
}
