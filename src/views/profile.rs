//! A user's profile page: the profile itself plus their activity log

use crate::backend::{DocumentStore, StoreResult};
use crate::model::{collections, UserProfile};
use crate::notice::Notice;

use super::{activity_view, ActivityView, NoticeSender};

pub struct ProfileView {
    /// `None` when the user does not exist
    pub profile: Option<UserProfile>,
    /// Live list of the user's entries
    pub activity: ActivityView,
}

impl ProfileView {
    /// Read the profile once and start following the activity log
    pub async fn open(
        store: &dyn DocumentStore,
        uid: &str,
        notices: Option<NoticeSender>,
    ) -> StoreResult<Self> {
        let path = format!("{}/{}", collections::USERS, uid);
        let profile = match store.get(&path).await? {
            Some(doc) => Some(doc.decode::<UserProfile>()?),
            None => {
                tracing::debug!(uid, "Profile view for unknown user");
                if let Some(notices) = &notices {
                    let _ = notices.send(not_found_notice());
                }
                None
            }
        };

        let mut activity = activity_view(store, uid);
        if let Some(notices) = notices {
            activity = activity.with_notices(notices);
        }

        Ok(Self { profile, activity })
    }
}

pub fn not_found_notice() -> Notice {
    Notice::error("Bruker Ikke Funnet", "Profilen du leter etter finnes ikke.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryStore;
    use crate::views::ViewState;
    use futures_util::StreamExt;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_profile_with_activity() {
        let store = MemoryStore::in_memory();
        store
            .set(
                "users/u1",
                json!({"uid": "u1", "email": "anna@badekompis.app", "username": "anna",
                       "name": "Anna", "targetBaths": 30, "currentBaths": 1})
                .as_object()
                .cloned()
                .unwrap(),
            )
            .await
            .unwrap();
        store
            .add(
                "baths",
                json!({"type": "logged", "userId": "u1", "userName": "Anna",
                       "date": "2024-01-05", "time": "07:30", "createdAt": 5})
                .as_object()
                .cloned()
                .unwrap(),
            )
            .await
            .unwrap();

        let mut view = ProfileView::open(&store, "u1", None).await.unwrap();
        assert_eq!(view.profile.as_ref().unwrap().name, "Anna");
        assert!(view.activity.state().is_loading());

        let entries = view.activity.next().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(matches!(view.activity.state(), ViewState::Ready(e) if e.len() == 1));
    }

    #[tokio::test]
    async fn test_unknown_user_sends_notice() {
        let store = MemoryStore::in_memory();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let view = ProfileView::open(&store, "ghost", Some(tx)).await.unwrap();
        assert!(view.profile.is_none());
        assert_eq!(rx.try_recv().unwrap().title, "Bruker Ikke Funnet");
    }
}
