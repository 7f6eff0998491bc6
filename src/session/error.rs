//! Session errors and their user-facing notices

use serde::Serialize;
use thiserror::Error;

use crate::backend::{AuthError, StoreError, UploadError};
use crate::forms::ValidationErrors;
use crate::local_storage::LocalStorageError;
use crate::notice::Notice;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("Not signed in")]
    NotSignedIn,

    /// Authenticated, but `users/{uid}` does not exist
    #[error("Profile document is missing")]
    ProfileMissing,

    #[error("Profile could not be loaded: {0}")]
    ProfileUnavailable(String),

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Username is already taken")]
    UsernameTaken,

    #[error("Username not found")]
    UsernameNotFound,

    /// Profile exists but has no credential address
    #[error("Account has no credential address")]
    AccountIncomplete,

    #[error("Store error: {0}")]
    Store(String),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Local storage error: {0}")]
    LocalStorage(String),
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        SessionError::Store(err.to_string())
    }
}

impl From<UploadError> for SessionError {
    fn from(err: UploadError) -> Self {
        SessionError::Upload(err.to_string())
    }
}

impl From<LocalStorageError> for SessionError {
    fn from(err: LocalStorageError) -> Self {
        SessionError::LocalStorage(err.to_string())
    }
}

impl SessionError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::NotSignedIn => "NOT_SIGNED_IN",
            SessionError::ProfileMissing => "PROFILE_MISSING",
            SessionError::ProfileUnavailable(_) => "PROFILE_UNAVAILABLE",
            SessionError::Auth(_) => "AUTH_ERROR",
            SessionError::UsernameTaken => "USERNAME_TAKEN",
            SessionError::UsernameNotFound => "USERNAME_NOT_FOUND",
            SessionError::AccountIncomplete => "ACCOUNT_INCOMPLETE",
            SessionError::Store(_) => "STORE_ERROR",
            SessionError::Validation(_) => "VALIDATION_ERROR",
            SessionError::Upload(_) => "UPLOAD_ERROR",
            SessionError::LocalStorage(_) => "LOCAL_STORAGE_ERROR",
        }
    }

    /// Message shown to the user
    pub fn user_message(&self) -> String {
        match self {
            SessionError::NotSignedIn => "Du må være logget inn.".to_string(),
            SessionError::ProfileMissing => {
                "Brukerprofilen din mangler eller kunne ikke lastes. Vennligst prøv å logge ut og inn igjen, eller kontakt support hvis problemet vedvarer."
                    .to_string()
            }
            SessionError::ProfileUnavailable(_) => {
                "Kunne ikke hente brukerprofil. Sjekk internettforbindelsen din.".to_string()
            }
            SessionError::Auth(err) => err.localized_message(),
            SessionError::UsernameTaken => {
                "Dette brukernavnet er allerede tatt. Velg et annet.".to_string()
            }
            SessionError::UsernameNotFound => {
                "Brukernavn ikke funnet. Sjekk at du har skrevet riktig, eller registrer deg."
                    .to_string()
            }
            SessionError::AccountIncomplete => {
                "En intern feil oppstod med din konto (autentiserings-e-post mangler). Kontakt support."
                    .to_string()
            }
            SessionError::Store(_) => "En feil oppstod med databasen. Prøv igjen.".to_string(),
            SessionError::Validation(errors) => errors.first_message().to_string(),
            SessionError::Upload(_) => "Kunne ikke laste opp bildet.".to_string(),
            SessionError::LocalStorage(_) => "Kunne ikke lagre lokale innstillinger.".to_string(),
        }
    }

    /// Notice with a title fitting the failed operation
    pub fn notice(&self, title: &str) -> Notice {
        let title = match self {
            SessionError::ProfileMissing => "Problem med Profil",
            SessionError::AccountIncomplete => "Kontoproblem",
            SessionError::Upload(_) => "Bildeopplasting feilet",
            _ => title,
        };
        Notice::error(title, self.user_message())
    }
}

/// Serializable form of a session error
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionErrorView {
    pub code: &'static str,
    pub message: String,
}

impl From<&SessionError> for SessionErrorView {
    fn from(err: &SessionError) -> Self {
        Self {
            code: err.code(),
            message: err.user_message(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::AuthErrorCode;

    #[test]
    fn test_auth_errors_use_localized_message() {
        let err = SessionError::from(AuthError::new(AuthErrorCode::UserDisabled, "x"));
        assert_eq!(err.user_message(), "Denne brukerkontoen er deaktivert.");
        assert_eq!(err.code(), "AUTH_ERROR");

        let notice = err.notice("Innloggingsfeil");
        assert_eq!(notice.title, "Innloggingsfeil");
        assert!(notice.is_error());
    }

    #[test]
    fn test_profile_missing_notice() {
        let notice = SessionError::ProfileMissing.notice("Innloggingsfeil");
        assert_eq!(notice.title, "Problem med Profil");
    }

    #[test]
    fn test_store_error_conversion() {
        let err: SessionError = StoreError::NotFound("users/u1".into()).into();
        assert!(matches!(err, SessionError::Store(ref m) if m.contains("users/u1")));
    }
}
