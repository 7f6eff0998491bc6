//! Writing baths, comments and reactions
//!
//! Every write goes through the signed-in session: the author fields on a
//! new entry are copied from the session's profile at write time. Counters
//! (`currentBaths`, `commentCount`, `reactions.*`) only move through
//! atomic increments.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::NaiveDate;
use thiserror::Error;

use crate::backend::{
    to_fields, Backend, FieldOp, StoreError, StoreResult, Transaction, UploadError, Upload,
};
use crate::forms::{validate_comment, LogBathForm, PlanBathForm, ValidationErrors};
use crate::geocoding::{GeocodeError, Location};
use crate::model::{
    collections, now_millis, BathComment, BathCommon, BathEntry, LoggedBath, PlannedBath,
    ReactionKind, Reactions,
};
use crate::notice::Notice;
use crate::session::{Session, SessionError};

#[derive(Debug, Error)]
pub enum BathError {
    #[error("Not signed in")]
    NotSignedIn,

    #[error("Profile document is missing")]
    ProfileMissing,

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Upload failed: {0}")]
    Upload(#[from] UploadError),

    #[error("Bath not found: {0}")]
    NotFound(String),

    #[error("Reactions are only allowed on logged baths")]
    NotLogged,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Geocode(#[from] GeocodeError),

    #[error(transparent)]
    Session(SessionError),
}

impl From<SessionError> for BathError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotSignedIn => BathError::NotSignedIn,
            SessionError::ProfileMissing => BathError::ProfileMissing,
            SessionError::Validation(errors) => BathError::Validation(errors),
            other => BathError::Session(other),
        }
    }
}

impl BathError {
    /// Message shown to the user
    pub fn user_message(&self) -> String {
        match self {
            BathError::NotSignedIn => "Du må være logget inn.".to_string(),
            BathError::ProfileMissing => {
                "Vi fant ikke profildataene dine. Prøv å logge ut og inn.".to_string()
            }
            BathError::Validation(errors) => errors.first_message().to_string(),
            BathError::Upload(_) => "Kunne ikke laste opp bildet.".to_string(),
            BathError::NotFound(_) => "Badet finnes ikke.".to_string(),
            BathError::NotLogged => "Du kan bare reagere på loggede bad.".to_string(),
            BathError::Store(_) => "Kunne ikke lagre. Prøv igjen.".to_string(),
            BathError::Geocode(_) => "Fant ikke stedet.".to_string(),
            BathError::Session(err) => err.user_message(),
        }
    }

    pub fn notice(&self, title: &str) -> Notice {
        let title = match self {
            BathError::NotSignedIn => "Logg Inn",
            BathError::Upload(_) => "Feil ved bildeopplasting",
            _ => title,
        };
        Notice::error(title, self.user_message())
    }
}

#[derive(Clone)]
pub struct BathService {
    backend: Backend,
}

impl BathService {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    /// Record a bath that took place
    pub async fn log_bath(
        &self,
        session: &Session,
        form: LogBathForm,
        image: Option<Upload>,
    ) -> Result<(BathEntry, Notice), BathError> {
        let (user, profile) = session.require_profile()?;
        let valid = form.validate()?;
        let created_at = now_millis();

        let image_url = match image {
            Some(image) => {
                let path = format!(
                    "{}/{}/{}-{}",
                    collections::BATHS,
                    user.uid,
                    created_at,
                    image.safe_filename()
                );
                Some(
                    self.backend
                        .blobs
                        .upload(&path, image.data, image.content_type.as_deref())
                        .await?,
                )
            }
            None => None,
        };

        let mut entry = BathEntry::Logged(LoggedBath {
            common: BathCommon {
                id: String::new(),
                author: profile.author(),
                date: valid.date.format("%Y-%m-%d").to_string(),
                time: valid.time,
                location: valid.location,
                created_at,
            },
            comments: valid.comments,
            image_url,
            reactions: Reactions::default(),
            comment_count: 0,
            water_temperature: valid.water_temperature,
        });

        let doc = self
            .backend
            .store
            .add(collections::BATHS, to_fields(&entry)?)
            .await?;
        self.backend
            .store
            .update(
                &format!("{}/{}", collections::USERS, user.uid),
                vec![FieldOp::increment("currentBaths", 1)],
            )
            .await?;

        if let Err(e) = session.refresh_profile().await {
            tracing::warn!(uid = %user.uid, error = %e, "Profile refresh after logging failed");
        }

        set_id(&mut entry, doc.id());
        tracing::info!(bath_id = %doc.id(), uid = %user.uid, "Bath logged");

        let location = &entry.common().location;
        let description = if location.is_empty() {
            "Ditt bad er logget.".to_string()
        } else {
            format!("Ditt bad ved {} er logget.", location)
        };
        Ok((entry, Notice::info("Bad Logget!", description)))
    }

    /// Create a planned group bath with the author as first attendee
    pub async fn plan_bath(
        &self,
        session: &Session,
        form: PlanBathForm,
        today: NaiveDate,
    ) -> Result<(BathEntry, Notice), BathError> {
        let (user, profile) = session.require_profile()?;
        let valid = form.validate(today)?;

        let mut entry = BathEntry::Planned(PlannedBath {
            common: BathCommon {
                id: String::new(),
                author: profile.author(),
                date: valid.date.format("%Y-%m-%d").to_string(),
                time: valid.time.clone(),
                location: valid.location.clone(),
                created_at: now_millis(),
            },
            description: valid.description.clone(),
            attendees: vec![user.uid.clone()],
        });

        let doc = self
            .backend
            .store
            .add(collections::BATHS, to_fields(&entry)?)
            .await?;
        set_id(&mut entry, doc.id());
        tracing::info!(bath_id = %doc.id(), uid = %user.uid, "Bath planned");

        let notice = Notice::info(
            "Bad Planlagt!",
            format!(
                "Tittel: {}. Dato: {} kl. {}. Sted: {}.",
                valid.description,
                valid.date.format("%d.%m.%Y"),
                valid.time,
                valid.location
            ),
        );
        Ok((entry, notice))
    }

    /// Bump the bath's comment counter, then post the comment
    pub async fn add_comment(
        &self,
        session: &Session,
        bath_id: &str,
        text: &str,
    ) -> Result<BathComment, BathError> {
        let (user, profile) = session.require_profile()?;
        let text = validate_comment(text)?;

        // createdAt is allocated on the bath document so concurrent comments
        // never share a timestamp
        let bath_path = format!("{}/{}", collections::BATHS, bath_id);
        let allocated = AtomicI64::new(0);
        let body = |tx: &mut Transaction<'_>| -> StoreResult<()> {
            let doc = tx
                .get(&bath_path)?
                .ok_or_else(|| StoreError::NotFound(bath_id.to_string()))?;
            let last = doc.get("lastCommentAt").and_then(|v| v.as_i64());
            let created_at = match last {
                Some(last) => now_millis().max(last + 1),
                None => now_millis(),
            };
            tx.update(
                &bath_path,
                vec![
                    FieldOp::set("lastCommentAt", created_at),
                    FieldOp::increment("commentCount", 1),
                ],
            )?;
            allocated.store(created_at, Ordering::SeqCst);
            Ok(())
        };
        match self.backend.store.run_transaction(&body).await {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => return Err(BathError::NotFound(bath_id.to_string())),
            Err(e) => return Err(e.into()),
        }
        let created_at = allocated.load(Ordering::SeqCst);

        let mut comment = BathComment {
            id: String::new(),
            author: profile.author(),
            text,
            created_at,
        };
        let comments = collections::comments_of(bath_id);
        let doc = self
            .backend
            .store
            .add(&comments, to_fields(&comment)?)
            .await?;

        comment.id = doc.id().to_string();
        tracing::info!(bath_id, comment_id = %comment.id, uid = %user.uid, "Comment added");
        Ok(comment)
    }

    /// Count one reaction on a logged bath
    pub async fn react(
        &self,
        session: &Session,
        bath_id: &str,
        kind: ReactionKind,
    ) -> Result<(), BathError> {
        let user = session.require_user()?;

        let path = format!("{}/{}", collections::BATHS, bath_id);
        let doc = self
            .backend
            .store
            .get(&path)
            .await?
            .ok_or_else(|| BathError::NotFound(bath_id.to_string()))?;
        match doc.decode::<BathEntry>()? {
            BathEntry::Logged(_) => {}
            BathEntry::Planned(_) => return Err(BathError::NotLogged),
        }

        self.backend
            .store
            .update(&path, vec![FieldOp::increment(kind.field_path(), 1)])
            .await?;
        tracing::debug!(bath_id, uid = %user.uid, reaction = ?kind, "Reaction counted");
        Ok(())
    }

    /// Coordinates for a place name typed into the plan form
    pub async fn resolve_location(&self, address: &str) -> Result<Location, BathError> {
        Ok(self.backend.geocoder.coordinates(address).await?)
    }
}

fn set_id(entry: &mut BathEntry, id: &str) {
    match entry {
        BathEntry::Logged(b) => b.common.id = id.to_string(),
        BathEntry::Planned(b) => b.common.id = id.to_string(),
    }
}
