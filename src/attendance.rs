//! Attendance on planned baths
//!
//! Joining and leaving run inside a store transaction and write with
//! `ArrayUnion`/`ArrayRemove`, so concurrent joins never clobber each other
//! or the counters on the same document. Only the attendee themself may
//! join or leave.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::backend::{AuthUser, DocumentStore, FieldOp, StoreError, StoreResult, Transaction};
use crate::model::{collections, BathEntry};
use crate::notice::Notice;

#[derive(Debug, Error)]
pub enum AttendanceError {
    #[error("Only the attendee can change their own attendance")]
    Unauthorized,

    #[error("Bath does not exist: {0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for AttendanceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(path) => AttendanceError::NotFound(path),
            StoreError::Validation(msg) => AttendanceError::Validation(msg),
            StoreError::Unauthorized(_) => AttendanceError::Unauthorized,
            other => AttendanceError::Store(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Join,
    Leave,
}

/// Whether a call changed the attendee set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceOutcome {
    Changed,
    Unchanged,
}

/// Confirmation after joining a planned bath
pub fn joined_notice(description: &str) -> Notice {
    Notice::info("Påmeldt!", format!("Du er nå påmeldt \"{}\".", description))
}

/// Confirmation after leaving a planned bath
pub fn left_notice(description: &str) -> Notice {
    Notice::info("Avmeldt!", format!("Du er nå avmeldt \"{}\".", description))
}

#[derive(Clone)]
pub struct AttendanceService {
    store: Arc<dyn DocumentStore>,
}

impl AttendanceService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Add `uid` to the attendees of a planned bath
    pub async fn join(
        &self,
        caller: Option<&AuthUser>,
        bath_id: &str,
        uid: &str,
    ) -> Result<AttendanceOutcome, AttendanceError> {
        self.apply(caller, bath_id, uid, Change::Join).await
    }

    /// Remove `uid` from the attendees. Leaving as a non-member is a no-op.
    pub async fn leave(
        &self,
        caller: Option<&AuthUser>,
        bath_id: &str,
        uid: &str,
    ) -> Result<AttendanceOutcome, AttendanceError> {
        self.apply(caller, bath_id, uid, Change::Leave).await
    }

    async fn apply(
        &self,
        caller: Option<&AuthUser>,
        bath_id: &str,
        uid: &str,
        change: Change,
    ) -> Result<AttendanceOutcome, AttendanceError> {
        match caller {
            Some(user) if user.uid == uid => {}
            _ => {
                tracing::warn!(bath_id, uid, "Rejected attendance change for another user");
                return Err(AttendanceError::Unauthorized);
            }
        }

        let path = format!("{}/{}", collections::BATHS, bath_id);
        let member = uid.to_string();
        let wrote = AtomicBool::new(false);

        let body = |tx: &mut Transaction<'_>| -> StoreResult<()> {
            wrote.store(false, Ordering::SeqCst);
            let doc = tx
                .get(&path)?
                .ok_or_else(|| StoreError::NotFound(bath_id.to_string()))?;

            let attending = match doc.decode::<BathEntry>()? {
                BathEntry::Planned(planned) => planned.is_attending(&member),
                BathEntry::Logged(_) => {
                    return Err(StoreError::Validation(
                        "Only planned baths have attendees".to_string(),
                    ))
                }
            };

            let op = match (change, attending) {
                (Change::Join, true) | (Change::Leave, false) => return Ok(()),
                (Change::Join, false) => {
                    FieldOp::array_union("attendees", vec![Value::String(member.clone())])
                }
                (Change::Leave, true) => {
                    FieldOp::array_remove("attendees", vec![Value::String(member.clone())])
                }
            };
            tx.update(&path, vec![op])?;
            wrote.store(true, Ordering::SeqCst);
            Ok(())
        };

        self.store.run_transaction(&body).await?;

        let outcome = if wrote.load(Ordering::SeqCst) {
            AttendanceOutcome::Changed
        } else {
            AttendanceOutcome::Unchanged
        };
        tracing::info!(bath_id, uid, ?change, ?outcome, "Attendance updated");
        Ok(outcome)
    }
}
